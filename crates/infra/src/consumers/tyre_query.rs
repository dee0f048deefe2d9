use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use tyrehub_events::integration::{TYRES_GET, TyreQuery, TyreQueryReply};
use tyrehub_events::{Delivery, Message, MessageBus, QueueBinding};

use super::{ConsumerError, MessageHandler};
use crate::store::TyreStore;

/// Answers `tyres.get` lookups over the bus.
///
/// The reply goes through the default exchange to the request's `reply_to`,
/// tagged with its `correlation_id`. Lookup failures of any kind answer
/// `{"ok": false}`; there is at most one reply per request.
pub struct TyreQueryConsumer {
    store: Arc<dyn TyreStore>,
    bus: Arc<dyn MessageBus>,
    queue: String,
}

impl TyreQueryConsumer {
    pub fn new(store: Arc<dyn TyreStore>, bus: Arc<dyn MessageBus>, queue: impl Into<String>) -> Self {
        Self {
            store,
            bus,
            queue: queue.into(),
        }
    }

    /// Build the reply for one request body.
    pub async fn answer(&self, message: &Message) -> TyreQueryReply {
        let query: TyreQuery = match message.decode() {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, "unparsable tyre query");
                return TyreQueryReply::not_found();
            }
        };

        match self.store.get(query.tyre_id).await {
            Ok(Some(tyre)) => TyreQueryReply::found(tyre.snapshot()),
            Ok(None) => TyreQueryReply::not_found(),
            Err(e) => {
                warn!(tyre_id = %query.tyre_id, error = %e, "tyre lookup failed");
                TyreQueryReply::not_found()
            }
        }
    }
}

#[async_trait]
impl MessageHandler for TyreQueryConsumer {
    fn name(&self) -> &'static str {
        "tyre-query"
    }

    fn binding(&self) -> QueueBinding {
        QueueBinding::new(self.queue.clone()).bind(TYRES_GET)
    }

    #[instrument(
        skip(self, delivery),
        fields(correlation_id = delivery.message.correlation_id.as_deref().unwrap_or("-"))
    )]
    async fn handle(&self, delivery: &Delivery) -> Result<(), ConsumerError> {
        let reply = self.answer(&delivery.message).await;

        let (Some(reply_to), Some(correlation_id)) =
            (&delivery.message.reply_to, &delivery.message.correlation_id)
        else {
            debug!(ok = reply.ok, "no reply address; reply discarded");
            return Ok(());
        };

        let message = Message::json(&reply)?.with_correlation_id(correlation_id.clone());
        self.bus.publish_direct(reply_to, message).await?;
        debug!(ok = reply.ok, %reply_to, "reply sent");
        Ok(())
    }
}
