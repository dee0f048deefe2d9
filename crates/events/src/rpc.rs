//! Request/reply over the bus.
//!
//! The caller owns a private reply queue, publishes the request through the
//! topic exchange with `reply_to` + `correlation_id` set, and waits for the
//! reply carrying the same correlation id.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::bus::{BusError, MessageBus, RecvTimeoutError};
use crate::message::{Message, QueueBinding};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("reply queue closed")]
    Closed,
}

/// Publish `message` on `routing_key` and wait up to `timeout` for its reply.
///
/// Any `reply_to`/`correlation_id` already on `message` is overwritten.
#[instrument(skip(bus, message), fields(correlation_id = tracing::field::Empty), err)]
pub async fn request<B>(
    bus: &B,
    routing_key: &str,
    message: Message,
    timeout: Duration,
) -> Result<Message, RpcError>
where
    B: MessageBus + ?Sized,
{
    let correlation_id = Uuid::now_v7().to_string();
    let reply_queue = format!("rpc.reply.{correlation_id}");
    tracing::Span::current().record("correlation_id", correlation_id.as_str());

    // Listen before publishing so a fast reply cannot be missed.
    let mut replies = bus.consume(QueueBinding::new(reply_queue.clone())).await?;

    let message = message
        .with_reply_to(reply_queue.clone())
        .with_correlation_id(correlation_id.clone());

    let outcome = async {
        bus.publish(routing_key, message).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let delivery = match replies.recv_timeout(remaining).await {
                Ok(delivery) => delivery,
                Err(RecvTimeoutError::Timeout) => return Err(RpcError::Timeout(timeout)),
                Err(RecvTimeoutError::Closed) => return Err(RpcError::Closed),
            };
            bus.ack(&delivery).await?;

            if delivery.message.correlation_id.as_deref() == Some(correlation_id.as_str()) {
                return Ok(delivery.message);
            }
            debug!(
                got = ?delivery.message.correlation_id,
                "ignoring reply for another request"
            );
        }
    }
    .await;

    bus.delete_queue(&reply_queue).await?;
    outcome
}
