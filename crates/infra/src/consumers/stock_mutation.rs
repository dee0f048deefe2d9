use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info, instrument, warn};

use tyrehub_events::integration::{ORDER_CREATED, OrderCreated};
use tyrehub_events::{Delivery, Message, MessageBus, QueueBinding};
use tyrehub_inventory::{NegativeStockPolicy, order_deltas};

use super::{ConsumerError, MessageHandler};
use crate::store::{StockOrderOutcome, TyreStore};

pub const HEADER_ERROR: &str = "x-error";
pub const HEADER_ORIGINAL_ROUTING_KEY: &str = "x-original-routing-key";
pub const HEADER_FAILED_AT: &str = "x-failed-at";

/// Applies `order.created` events to stock quantities.
///
/// One message is one store transaction. A message that cannot be parsed or
/// whose transaction rolls back is copied to the dead-letter queue; it is
/// still acked on its own queue so it is never redelivered.
pub struct StockMutationConsumer {
    store: Arc<dyn TyreStore>,
    bus: Arc<dyn MessageBus>,
    queue: String,
    dead_letter_queue: String,
    policy: NegativeStockPolicy,
}

impl StockMutationConsumer {
    pub fn new(
        store: Arc<dyn TyreStore>,
        bus: Arc<dyn MessageBus>,
        queue: impl Into<String>,
        dead_letter_queue: impl Into<String>,
        policy: NegativeStockPolicy,
    ) -> Self {
        Self {
            store,
            bus,
            queue: queue.into(),
            dead_letter_queue: dead_letter_queue.into(),
            policy,
        }
    }

    /// Parse and apply one message.
    pub async fn process(&self, message: &Message) -> Result<StockOrderOutcome, ConsumerError> {
        let order: OrderCreated = message
            .decode()
            .map_err(|e| ConsumerError::Parse(e.to_string()))?;

        if message.message_id.is_none() {
            warn!("order message has no message_id; applying without duplicate protection");
        }

        let deltas = order_deltas(&order);
        let outcome = self
            .store
            .apply_stock_order(message.message_id.as_deref(), &deltas, self.policy)
            .await?;
        Ok(outcome)
    }

    async fn dead_letter(&self, delivery: &Delivery, err: &ConsumerError) {
        let copy = delivery
            .message
            .clone()
            .with_header(HEADER_ERROR, err.to_string())
            .with_header(HEADER_ORIGINAL_ROUTING_KEY, delivery.routing_key.clone())
            .with_header(HEADER_FAILED_AT, Utc::now().to_rfc3339());

        if let Err(e) = self.bus.publish_direct(&self.dead_letter_queue, copy).await {
            error!(
                dead_letter_queue = %self.dead_letter_queue,
                error = %e,
                "failed to dead-letter stock message"
            );
        } else {
            warn!(dead_letter_queue = %self.dead_letter_queue, "stock message dead-lettered");
        }
    }
}

#[async_trait]
impl MessageHandler for StockMutationConsumer {
    fn name(&self) -> &'static str {
        "stock-mutation"
    }

    fn binding(&self) -> QueueBinding {
        QueueBinding::new(self.queue.clone()).bind(ORDER_CREATED)
    }

    #[instrument(
        skip(self, delivery),
        fields(
            message_id = delivery.message.message_id.as_deref().unwrap_or("-"),
            redelivered = delivery.redelivered
        )
    )]
    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumerError> {
        match self.process(&delivery.message).await {
            Ok(StockOrderOutcome::Applied(report)) => {
                for tyre_id in &report.skipped {
                    warn!(%tyre_id, "tyre not found; line item skipped");
                }
                for line in &report.applied {
                    info!(tyre_id = %line.tyre_id, delta = line.delta, quantity = line.quantity, "stock updated");
                }
                Ok(())
            }
            Ok(StockOrderOutcome::Duplicate) => {
                info!("order already applied; skipping duplicate delivery");
                Ok(())
            }
            Err(err) => {
                self.dead_letter(delivery, &err).await;
                Err(err)
            }
        }
    }
}
