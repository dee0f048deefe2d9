//! Message publishing/consumption abstraction (mechanics only).
//!
//! This module provides the **message bus pattern** used by the tyre service:
//! a topic exchange for events and requests, and a default exchange for
//! point-to-point replies.
//!
//! ## Delivery Guarantees
//!
//! - **At-least-once**: a delivery that is not acked before the consumer
//!   stops is handed out again. Consumers must tolerate duplicates (the stock
//!   consumer keys on `Message::message_id`).
//! - **Per-queue FIFO**: a single consumer on a single queue sees messages in
//!   publish order. Nothing is ordered relative to other queues or to writes
//!   that bypass the bus.
//! - **Unrouted messages are dropped**: publishing to a routing key with no
//!   bound queue, or directly to an undeclared queue, is not an error.
//!
//! ## Acknowledgement
//!
//! Acking is explicit and separate from receiving. A consumer receives a
//! `Delivery`, processes it to completion, then calls `MessageBus::ack`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::{Delivery, Message, QueueBinding};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("bus connection error: {0}")]
    Connection(String),

    #[error("bus command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("bus state poisoned")]
    Poisoned,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Closed,
}

/// A live consumer on one queue.
///
/// Deliveries arrive in queue order. Dropping the subscription stops the
/// background reader; unacked deliveries stay pending on the bus.
#[derive(Debug)]
pub struct Subscription {
    queue: String,
    receiver: mpsc::Receiver<Delivery>,
}

impl Subscription {
    pub fn new(queue: impl Into<String>, receiver: mpsc::Receiver<Delivery>) -> Self {
        Self {
            queue: queue.into(),
            receiver,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Wait for the next delivery. `None` once the bus side has closed.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.receiver.recv().await
    }

    /// Wait for up to `timeout` for the next delivery.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Delivery, RecvTimeoutError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(delivery)) => Ok(delivery),
            Ok(None) => Err(RecvTimeoutError::Closed),
            Err(_) => Err(RecvTimeoutError::Timeout),
        }
    }
}

/// Transport-agnostic message bus.
///
/// Implementations must be safe to share across tasks; publishing and acking
/// may happen concurrently from many callers.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish through the topic exchange to every queue bound to `routing_key`.
    async fn publish(&self, routing_key: &str, message: Message) -> Result<(), BusError>;

    /// Publish through the default exchange straight to the queue named `queue`.
    async fn publish_direct(&self, queue: &str, message: Message) -> Result<(), BusError>;

    /// Declare a durable queue and its bindings. Idempotent.
    async fn declare_queue(&self, binding: &QueueBinding) -> Result<(), BusError>;

    /// Declare `binding` and start consuming from its queue.
    async fn consume(&self, binding: QueueBinding) -> Result<Subscription, BusError>;

    /// Acknowledge a delivery; it will not be handed out again.
    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError>;

    /// Remove a queue and anything pending on it.
    async fn delete_queue(&self, queue: &str) -> Result<(), BusError>;
}

#[async_trait]
impl<B> MessageBus for Arc<B>
where
    B: MessageBus + ?Sized,
{
    async fn publish(&self, routing_key: &str, message: Message) -> Result<(), BusError> {
        (**self).publish(routing_key, message).await
    }

    async fn publish_direct(&self, queue: &str, message: Message) -> Result<(), BusError> {
        (**self).publish_direct(queue, message).await
    }

    async fn declare_queue(&self, binding: &QueueBinding) -> Result<(), BusError> {
        (**self).declare_queue(binding).await
    }

    async fn consume(&self, binding: QueueBinding) -> Result<Subscription, BusError> {
        (**self).consume(binding).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        (**self).ack(delivery).await
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BusError> {
        (**self).delete_queue(queue).await
    }
}
