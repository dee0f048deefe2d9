//! Bus consumers: the stock mutation handler and the query (RPC) handler.
//!
//! Each consumer is a `MessageHandler`; `workers::ConsumerWorker` owns the
//! receive/ack loop around it.

pub mod stock_mutation;
pub mod tyre_query;

use async_trait::async_trait;
use thiserror::Error;

use tyrehub_events::{BusError, Delivery, QueueBinding};

use crate::store::StoreError;

pub use stock_mutation::StockMutationConsumer;
pub use tyre_query::TyreQueryConsumer;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("unparsable message: {0}")]
    Parse(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

/// Processes one delivery to completion.
///
/// Acking is not the handler's job: the worker acks after `handle` returns,
/// whatever the result.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Worker name used in logs.
    fn name(&self) -> &'static str;

    /// The queue (and bindings) this handler consumes from.
    fn binding(&self) -> QueueBinding;

    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumerError>;
}
