//! In-memory message bus for tests/dev.
//!
//! - One topic exchange, routing by `topic::topic_matches`
//! - One consumer per queue; a new `consume` on the same queue replaces the
//!   previous consumer and requeues whatever it left unacked (marked
//!   `redelivered`), the way a broker requeues when a channel closes
//! - Nothing survives a process restart

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

use crate::bus::{BusError, MessageBus, Subscription};
use crate::message::{Delivery, Message, QueueBinding};
use crate::topic::topic_matches;

/// Deliveries buffered between the queue pump and the consumer.
const PREFETCH: usize = 1;

#[derive(Debug)]
struct QueueState {
    bindings: Vec<String>,
    ready: VecDeque<Delivery>,
    unacked: BTreeMap<u64, Delivery>,
    consumer_epoch: u64,
    notify: Arc<Notify>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            bindings: Vec::new(),
            ready: VecDeque::new(),
            unacked: BTreeMap::new(),
            consumer_epoch: 0,
            notify: Arc::new(Notify::new()),
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    queues: Mutex<HashMap<String, QueueState>>,
    next_tag: AtomicU64,
}

/// In-memory topic exchange + default exchange.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageBus {
    inner: Arc<Inner>,
}

impl InMemoryMessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages handed to a consumer but not yet acked.
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.unacked.len()).unwrap_or(0)
    }

    /// Messages waiting for a consumer.
    pub fn ready_count(&self, queue: &str) -> usize {
        self.with_queue(queue, |q| q.ready.len()).unwrap_or(0)
    }

    /// Remove and return everything waiting on `queue` (dead-letter inspection).
    pub fn drain_ready(&self, queue: &str) -> Vec<Message> {
        self.with_queue_mut(queue, |q| q.ready.drain(..).map(|d| d.message).collect())
            .unwrap_or_default()
    }

    fn with_queue<T>(&self, queue: &str, f: impl FnOnce(&QueueState) -> T) -> Option<T> {
        let queues = self.inner.queues.lock().ok()?;
        queues.get(queue).map(f)
    }

    fn with_queue_mut<T>(&self, queue: &str, f: impl FnOnce(&mut QueueState) -> T) -> Option<T> {
        let mut queues = self.inner.queues.lock().ok()?;
        queues.get_mut(queue).map(f)
    }

    fn enqueue(&self, queue: &mut QueueState, queue_name: &str, routing_key: &str, message: Message) {
        let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
        queue.ready.push_back(Delivery {
            queue: queue_name.to_string(),
            routing_key: routing_key.to_string(),
            delivery_tag: tag.to_string(),
            redelivered: false,
            message,
        });
        queue.notify.notify_one();
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, routing_key: &str, message: Message) -> Result<(), BusError> {
        let mut queues = self.inner.queues.lock().map_err(|_| BusError::Poisoned)?;

        let mut routed = 0usize;
        for (name, queue) in queues.iter_mut() {
            if queue.bindings.iter().any(|pattern| topic_matches(pattern, routing_key)) {
                self.enqueue(queue, name, routing_key, message.clone());
                routed += 1;
            }
        }

        if routed == 0 {
            debug!(routing_key, "message unroutable; dropped");
        }
        Ok(())
    }

    async fn publish_direct(&self, queue: &str, message: Message) -> Result<(), BusError> {
        let mut queues = self.inner.queues.lock().map_err(|_| BusError::Poisoned)?;
        match queues.get_mut(queue) {
            Some(state) => self.enqueue(state, queue, queue, message),
            None => debug!(queue, "direct publish to undeclared queue; dropped"),
        }
        Ok(())
    }

    async fn declare_queue(&self, binding: &QueueBinding) -> Result<(), BusError> {
        let mut queues = self.inner.queues.lock().map_err(|_| BusError::Poisoned)?;
        let state = queues.entry(binding.queue.clone()).or_insert_with(QueueState::new);
        for key in &binding.routing_keys {
            if !state.bindings.contains(key) {
                state.bindings.push(key.clone());
            }
        }
        Ok(())
    }

    async fn consume(&self, binding: QueueBinding) -> Result<Subscription, BusError> {
        self.declare_queue(&binding).await?;

        let (epoch, notify) = {
            let mut queues = self.inner.queues.lock().map_err(|_| BusError::Poisoned)?;
            let state = queues
                .get_mut(&binding.queue)
                .ok_or_else(|| BusError::Command(format!("queue {} vanished", binding.queue)))?;

            // The previous consumer (if any) is gone; requeue its in-flight work first.
            let orphaned = std::mem::take(&mut state.unacked);
            for (_, mut delivery) in orphaned.into_iter().rev() {
                delivery.redelivered = true;
                state.ready.push_front(delivery);
            }

            state.consumer_epoch += 1;
            state.notify.notify_one();
            (state.consumer_epoch, state.notify.clone())
        };

        let (tx, rx) = mpsc::channel(PREFETCH);
        tokio::spawn(pump(self.inner.clone(), binding.queue.clone(), epoch, notify, tx));

        Ok(Subscription::new(binding.queue, rx))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        let tag: u64 = delivery
            .delivery_tag
            .parse()
            .map_err(|_| BusError::Command(format!("unknown delivery tag {}", delivery.delivery_tag)))?;

        let mut queues = self.inner.queues.lock().map_err(|_| BusError::Poisoned)?;
        if let Some(state) = queues.get_mut(&delivery.queue) {
            state.unacked.remove(&tag);
        }
        Ok(())
    }

    async fn delete_queue(&self, queue: &str) -> Result<(), BusError> {
        let mut queues = self.inner.queues.lock().map_err(|_| BusError::Poisoned)?;
        if let Some(state) = queues.remove(queue) {
            state.notify.notify_one();
        }
        Ok(())
    }
}

/// Moves ready deliveries from one queue to its current consumer.
async fn pump(
    inner: Arc<Inner>,
    queue: String,
    epoch: u64,
    notify: Arc<Notify>,
    tx: mpsc::Sender<Delivery>,
) {
    loop {
        let next = {
            let Ok(mut queues) = inner.queues.lock() else {
                return;
            };
            let Some(state) = queues.get_mut(&queue) else {
                return;
            };
            if state.consumer_epoch != epoch {
                // Superseded: hand any wakeup we may have swallowed to the new pump.
                state.notify.notify_one();
                return;
            }
            match state.ready.pop_front() {
                Some(delivery) => {
                    if let Ok(tag) = delivery.delivery_tag.parse::<u64>() {
                        state.unacked.insert(tag, delivery.clone());
                    }
                    Some(delivery)
                }
                None => None,
            }
        };

        match next {
            Some(delivery) => {
                if tx.send(delivery).await.is_err() {
                    // Consumer dropped; the delivery stays unacked until the next consume.
                    return;
                }
            }
            None => notify.notified().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bus::RecvTimeoutError;

    const WAIT: Duration = Duration::from_millis(500);

    #[tokio::test]
    async fn routes_by_binding_pattern() {
        let bus = InMemoryMessageBus::new();
        let mut orders = bus
            .consume(QueueBinding::new("orders").bind("order.*"))
            .await
            .unwrap();
        let mut gets = bus
            .consume(QueueBinding::new("gets").bind("tyres.get"))
            .await
            .unwrap();

        bus.publish("order.created", Message::new(b"1".to_vec())).await.unwrap();
        bus.publish("tyres.get", Message::new(b"2".to_vec())).await.unwrap();

        let d = orders.recv_timeout(WAIT).await.unwrap();
        assert_eq!(d.routing_key, "order.created");
        assert_eq!(d.message.body, b"1");

        let d = gets.recv_timeout(WAIT).await.unwrap();
        assert_eq!(d.message.body, b"2");

        assert_eq!(
            orders.recv_timeout(Duration::from_millis(20)).await.unwrap_err(),
            RecvTimeoutError::Timeout
        );
    }

    #[tokio::test]
    async fn unroutable_messages_are_dropped() {
        let bus = InMemoryMessageBus::new();
        bus.publish("nobody.listens", Message::new(b"x".to_vec())).await.unwrap();
        bus.publish_direct("no.such.queue", Message::new(b"x".to_vec())).await.unwrap();
    }

    #[tokio::test]
    async fn messages_published_before_consume_wait_in_durable_queue() {
        let bus = InMemoryMessageBus::new();
        let binding = QueueBinding::new("orders").bind("order.created");
        bus.declare_queue(&binding).await.unwrap();

        for i in 0..3u8 {
            bus.publish("order.created", Message::new(vec![i])).await.unwrap();
        }
        assert_eq!(bus.ready_count("orders"), 3);

        let mut sub = bus.consume(binding).await.unwrap();
        for i in 0..3u8 {
            let d = sub.recv_timeout(WAIT).await.unwrap();
            assert_eq!(d.message.body, vec![i]);
            bus.ack(&d).await.unwrap();
        }
        assert_eq!(bus.unacked_count("orders"), 0);
    }

    #[tokio::test]
    async fn unacked_delivery_is_redelivered_to_next_consumer() {
        let bus = InMemoryMessageBus::new();
        let binding = QueueBinding::new("orders").bind("order.created");

        let mut first = bus.consume(binding.clone()).await.unwrap();
        bus.publish("order.created", Message::new(b"once".to_vec())).await.unwrap();

        let d = first.recv_timeout(WAIT).await.unwrap();
        assert!(!d.redelivered);
        drop(first);

        let mut second = bus.consume(binding).await.unwrap();
        let again = second.recv_timeout(WAIT).await.unwrap();
        assert!(again.redelivered);
        assert_eq!(again.message.message_id, d.message.message_id);
    }

    #[tokio::test]
    async fn direct_publish_reaches_named_queue_only() {
        let bus = InMemoryMessageBus::new();
        let mut reply = bus.consume(QueueBinding::new("reply.1")).await.unwrap();

        bus.publish_direct("reply.1", Message::new(b"r".to_vec()).with_correlation_id("c"))
            .await
            .unwrap();

        let d = reply.recv_timeout(WAIT).await.unwrap();
        assert_eq!(d.routing_key, "reply.1");
        assert_eq!(d.message.correlation_id.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn deleted_queue_closes_subscription() {
        let bus = InMemoryMessageBus::new();
        let mut sub = bus.consume(QueueBinding::new("tmp")).await.unwrap();
        bus.delete_queue("tmp").await.unwrap();
        assert_eq!(sub.recv_timeout(WAIT).await.unwrap_err(), RecvTimeoutError::Closed);
    }
}
