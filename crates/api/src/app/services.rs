use std::sync::Arc;

use thiserror::Error;

use tyrehub_events::{BusError, InMemoryMessageBus, MessageBus, QueueBinding};
use tyrehub_infra::consumers::{StockMutationConsumer, TyreQueryConsumer};
use tyrehub_infra::event_bus::RedisStreamsMessageBus;
use tyrehub_infra::store::{InMemoryTyreStore, PostgresTyreStore};
use tyrehub_infra::workers::{ConsumerWorker, WorkerHandle};
use tyrehub_infra::{AppConfig, ConfigError, StoreError, TyreStore};

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("bus setup failed: {0}")]
    Bus(#[from] BusError),
}

/// Shared handles used by every entry point: HTTP handlers and bus consumers.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn TyreStore>,
    pub bus: Arc<dyn MessageBus>,
}

impl AppServices {
    pub fn new(store: Arc<dyn TyreStore>, bus: Arc<dyn MessageBus>) -> Self {
        Self { store, bus }
    }

    /// In-memory store and bus (dev/test).
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryTyreStore::new()),
            Arc::new(InMemoryMessageBus::new()),
        )
    }

    /// Start both bus consumers on this store and bus.
    ///
    /// Each queue, the dead-letter queue included, is declared before this
    /// returns.
    pub async fn spawn_consumers(&self, config: &AppConfig) -> Result<Vec<WorkerHandle>, BusError> {
        // Direct publishes to an undeclared queue are dropped.
        self.bus
            .declare_queue(&QueueBinding::new(config.bus.dead_letter_queue.clone()))
            .await?;

        let stock = StockMutationConsumer::new(
            self.store.clone(),
            self.bus.clone(),
            config.bus.order_queue.clone(),
            config.bus.dead_letter_queue.clone(),
            config.negative_stock_policy,
        );
        let query = TyreQueryConsumer::new(
            self.store.clone(),
            self.bus.clone(),
            config.bus.query_queue.clone(),
        );

        let stock = ConsumerWorker::spawn(self.bus.clone(), stock).await?;
        let query = match ConsumerWorker::spawn(self.bus.clone(), query).await {
            Ok(handle) => handle,
            Err(e) => {
                stock.shutdown().await;
                return Err(e);
            }
        };

        Ok(vec![stock, query])
    }
}

pub async fn build_services(config: &AppConfig) -> Result<AppServices, ServicesError> {
    if config.use_persistent_stores {
        return build_persistent_services(config).await;
    }

    tracing::info!("using in-memory store and bus");
    Ok(AppServices::in_memory())
}

async fn build_persistent_services(config: &AppConfig) -> Result<AppServices, ServicesError> {
    let database = config
        .database
        .as_ref()
        .ok_or(ConfigError::Missing("DATABASE_URL"))?;

    let store = PostgresTyreStore::connect(&database.url, database.max_connections).await?;

    let bus = RedisStreamsMessageBus::connect(
        &config.bus.redis_url,
        config.bus.exchange.clone(),
        config.bus.consumer_name.clone(),
    )
    .await?;

    tracing::info!(
        exchange = %config.bus.exchange,
        consumer = %config.bus.consumer_name,
        "using Postgres store and Redis Streams bus"
    );

    Ok(AppServices::new(Arc::new(store), Arc::new(bus)))
}
