//! Redis Streams-backed message bus (durable, at-least-once delivery).
//!
//! Exchange/queue concepts map onto streams as follows:
//! - **Routing key**: stream `{exchange}:{routing_key}`; a publish is one XADD
//! - **Queue**: a consumer group named after the queue on every stream it is
//!   bound to, plus the queue's own stream `{exchange}:queue:{queue}` that
//!   receives direct (default-exchange) publishes
//! - **Consumer**: a stable consumer name, so a restarted process first
//!   re-reads its own pending (delivered, unacked) entries before new ones
//! - **Ack**: XACK on the entry's stream
//!
//! Groups are created at `$`: like an AMQP queue, a queue only sees messages
//! published after it was declared. Bindings must be exact routing keys.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadReply};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use tyrehub_events::{BusError, Delivery, Message, MessageBus, QueueBinding, Subscription};

/// Approximate cap on entries kept per stream.
const STREAM_MAXLEN: usize = 100_000;

/// How long one XREADGROUP waits for new entries.
const BLOCK_MS: usize = 1_000;

const READ_COUNT: usize = 10;

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Deliveries buffered between the stream reader and the consumer.
const PREFETCH: usize = 1;

#[derive(Clone)]
pub struct RedisStreamsMessageBus {
    client: Arc<redis::Client>,
    conn: MultiplexedConnection,
    exchange: String,
    consumer_name: String,
    bindings: Arc<Mutex<HashMap<String, Vec<String>>>>,
}

impl fmt::Debug for RedisStreamsMessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStreamsMessageBus")
            .field("exchange", &self.exchange)
            .field("consumer_name", &self.consumer_name)
            .finish_non_exhaustive()
    }
}

impl RedisStreamsMessageBus {
    /// Connect to Redis.
    ///
    /// * `exchange` - prefix of every stream key (the topic exchange name)
    /// * `consumer_name` - stable name of this process within each queue's group
    pub async fn connect(
        redis_url: &str,
        exchange: impl Into<String>,
        consumer_name: impl Into<String>,
    ) -> Result<Self, BusError> {
        let client = redis::Client::open(redis_url).map_err(connection_error)?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(connection_error)?;

        Ok(Self {
            client: Arc::new(client),
            conn,
            exchange: exchange.into(),
            consumer_name: consumer_name.into(),
            bindings: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn routing_stream(&self, routing_key: &str) -> String {
        format!("{}:{}", self.exchange, routing_key)
    }

    fn queue_stream(&self, queue: &str) -> String {
        format!("{}:queue:{}", self.exchange, queue)
    }

    /// Every stream a queue reads from: its direct stream first, then bindings.
    fn streams_for(&self, binding: &QueueBinding) -> Vec<String> {
        std::iter::once(self.queue_stream(&binding.queue))
            .chain(binding.routing_keys.iter().map(|k| self.routing_stream(k)))
            .collect()
    }

    async fn xadd(&self, stream: &str, routing_key: &str, message: &Message) -> Result<(), BusError> {
        let headers = serde_json::to_string(&message.headers)
            .map_err(|e| BusError::Serialization(e.to_string()))?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAXLEN)
            .arg("*")
            .arg("routing_key")
            .arg(routing_key);
        if let Some(id) = &message.message_id {
            cmd.arg("message_id").arg(id);
        }
        if let Some(id) = &message.correlation_id {
            cmd.arg("correlation_id").arg(id);
        }
        if let Some(reply_to) = &message.reply_to {
            cmd.arg("reply_to").arg(reply_to);
        }
        cmd.arg("headers").arg(headers).arg("body").arg(&message.body[..]);

        let mut conn = self.conn.clone();
        let _: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::Command(format!("XADD failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl MessageBus for RedisStreamsMessageBus {
    #[instrument(skip(self, message), fields(message_id = ?message.message_id), err)]
    async fn publish(&self, routing_key: &str, message: Message) -> Result<(), BusError> {
        self.xadd(&self.routing_stream(routing_key), routing_key, &message).await
    }

    #[instrument(skip(self, message), fields(correlation_id = ?message.correlation_id), err)]
    async fn publish_direct(&self, queue: &str, message: Message) -> Result<(), BusError> {
        self.xadd(&self.queue_stream(queue), queue, &message).await
    }

    #[instrument(skip(self, binding), fields(queue = %binding.queue), err)]
    async fn declare_queue(&self, binding: &QueueBinding) -> Result<(), BusError> {
        validate_binding(binding)?;

        let mut conn = self.conn.clone();
        for stream in self.streams_for(binding) {
            ensure_group(&mut conn, &stream, &binding.queue).await?;
        }

        let mut bindings = self.bindings.lock().map_err(|_| BusError::Poisoned)?;
        let keys = bindings.entry(binding.queue.clone()).or_default();
        for key in &binding.routing_keys {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        Ok(())
    }

    async fn consume(&self, binding: QueueBinding) -> Result<Subscription, BusError> {
        self.declare_queue(&binding).await?;

        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(connection_error)?;

        let (tx, rx) = mpsc::channel(PREFETCH);
        let reader = StreamReader {
            client: self.client.clone(),
            streams: self.streams_for(&binding),
            group: binding.queue.clone(),
            consumer: self.consumer_name.clone(),
        };
        tokio::spawn(reader.run(conn, tx));

        Ok(Subscription::new(binding.queue, rx))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), BusError> {
        let (entry_id, stream) = split_delivery_tag(&delivery.delivery_tag)?;

        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("XACK")
            .arg(stream)
            .arg(&delivery.queue)
            .arg(entry_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::Command(format!("XACK failed: {e}")))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_queue(&self, queue: &str) -> Result<(), BusError> {
        let keys = self
            .bindings
            .lock()
            .map_err(|_| BusError::Poisoned)?
            .remove(queue)
            .unwrap_or_default();

        let mut conn = self.conn.clone();
        let _: u64 = redis::cmd("DEL")
            .arg(self.queue_stream(queue))
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::Command(format!("DEL failed: {e}")))?;

        for key in keys {
            let _: u64 = redis::cmd("XGROUP")
                .arg("DESTROY")
                .arg(self.routing_stream(&key))
                .arg(queue)
                .query_async(&mut conn)
                .await
                .map_err(|e| BusError::Command(format!("XGROUP DESTROY failed: {e}")))?;
        }
        Ok(())
    }
}

/// Background task feeding one subscription.
struct StreamReader {
    client: Arc<redis::Client>,
    streams: Vec<String>,
    group: String,
    consumer: String,
}

impl StreamReader {
    async fn run(self, mut conn: MultiplexedConnection, tx: mpsc::Sender<Delivery>) {
        // Our own pending entries first (redelivery after a crash), then new ones.
        let mut cursors: Vec<String> = vec!["0".to_string(); self.streams.len()];
        let mut pending = true;

        while !tx.is_closed() {
            let ids: Vec<&str> = if pending {
                cursors.iter().map(String::as_str).collect()
            } else {
                vec![">"; self.streams.len()]
            };

            let mut cmd = redis::cmd("XREADGROUP");
            cmd.arg("GROUP")
                .arg(&self.group)
                .arg(&self.consumer)
                .arg("COUNT")
                .arg(READ_COUNT);
            if !pending {
                cmd.arg("BLOCK").arg(BLOCK_MS);
            }
            cmd.arg("STREAMS").arg(&self.streams).arg(&ids);

            let reply: redis::RedisResult<Option<StreamReadReply>> = cmd.query_async(&mut conn).await;
            let reply = match reply {
                Ok(Some(reply)) => reply,
                Ok(None) => {
                    pending = false;
                    continue;
                }
                Err(e) if e.code() == Some("NOGROUP") => {
                    debug!(queue = %self.group, "queue deleted; reader stopping");
                    return;
                }
                Err(e) => {
                    warn!(queue = %self.group, error = %e, "XREADGROUP failed; retrying");
                    pending = false;
                    tokio::time::sleep(RETRY_DELAY).await;
                    if let Ok(fresh) = self.client.get_multiplexed_tokio_connection().await {
                        conn = fresh;
                    }
                    continue;
                }
            };

            let mut read_any = false;
            for stream_key in reply.keys {
                let index = self.streams.iter().position(|s| *s == stream_key.key);
                for entry in stream_key.ids {
                    read_any = true;
                    if let (true, Some(i)) = (pending, index) {
                        cursors[i] = entry.id.clone();
                    }

                    match decode_entry(&stream_key.key, &self.group, &entry, pending) {
                        Ok(delivery) => {
                            if tx.send(delivery).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(queue = %self.group, entry_id = %entry.id, error = %e, "dropping malformed stream entry");
                            let _: redis::RedisResult<u64> = redis::cmd("XACK")
                                .arg(&stream_key.key)
                                .arg(&self.group)
                                .arg(&entry.id)
                                .query_async(&mut conn)
                                .await;
                        }
                    }
                }
            }

            if pending && !read_any {
                pending = false;
            }
        }
    }
}

async fn ensure_group(conn: &mut MultiplexedConnection, stream: &str, group: &str) -> Result<(), BusError> {
    let created: redis::RedisResult<()> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match created {
        Ok(()) => Ok(()),
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(BusError::Command(format!("XGROUP CREATE failed: {e}"))),
    }
}

fn validate_binding(binding: &QueueBinding) -> Result<(), BusError> {
    match binding
        .routing_keys
        .iter()
        .find(|k| k.split('.').any(|word| word == "*" || word == "#"))
    {
        Some(pattern) => Err(BusError::Command(format!(
            "queue {}: pattern binding {pattern:?} is not supported by the Redis bus",
            binding.queue
        ))),
        None => Ok(()),
    }
}

fn delivery_tag(stream: &str, entry_id: &str) -> String {
    format!("{entry_id}@{stream}")
}

fn split_delivery_tag(tag: &str) -> Result<(&str, &str), BusError> {
    tag.split_once('@')
        .ok_or_else(|| BusError::Command(format!("malformed delivery tag {tag:?}")))
}

fn decode_entry(stream: &str, queue: &str, entry: &StreamId, redelivered: bool) -> Result<Delivery, BusError> {
    let routing_key: String = entry
        .get("routing_key")
        .ok_or_else(|| BusError::Deserialization("missing routing_key field".to_string()))?;

    let headers: BTreeMap<String, String> = match entry.get::<String>("headers") {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| BusError::Deserialization(e.to_string()))?,
        None => BTreeMap::new(),
    };

    Ok(Delivery {
        queue: queue.to_string(),
        routing_key,
        delivery_tag: delivery_tag(stream, &entry.id),
        redelivered,
        message: Message {
            message_id: entry.get("message_id"),
            correlation_id: entry.get("correlation_id"),
            reply_to: entry.get("reply_to"),
            headers,
            body: entry.get("body").unwrap_or_default(),
        },
    })
}

fn connection_error(e: redis::RedisError) -> BusError {
    BusError::Connection(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(fields: &[(&str, &[u8])]) -> StreamId {
        StreamId {
            id: "1700000000000-0".to_string(),
            map: fields
                .iter()
                .map(|(k, v)| (k.to_string(), redis::Value::Data(v.to_vec())))
                .collect(),
        }
    }

    #[test]
    fn delivery_tag_round_trips() {
        let tag = delivery_tag("topic_logs:order.created", "1-2");
        assert_eq!(split_delivery_tag(&tag).unwrap(), ("1-2", "topic_logs:order.created"));
        assert!(split_delivery_tag("garbage").is_err());
    }

    #[test]
    fn pattern_bindings_are_rejected() {
        assert!(validate_binding(&QueueBinding::new("q").bind("order.created")).is_ok());
        assert!(validate_binding(&QueueBinding::new("q").bind("order.*")).is_err());
        assert!(validate_binding(&QueueBinding::new("q").bind("#")).is_err());
    }

    #[test]
    fn decodes_stream_entry_into_delivery() {
        let e = entry(&[
            ("routing_key", b"tyres.get"),
            ("message_id", b"m-1"),
            ("correlation_id", b"c-1"),
            ("reply_to", b"rpc.reply.1"),
            ("headers", br#"{"x-error":"boom"}"#),
            ("body", br#"{"tyre_id":3}"#),
        ]);

        let d = decode_entry("topic_logs:tyres.get", "rpc.tyres.get", &e, true).unwrap();

        assert_eq!(d.queue, "rpc.tyres.get");
        assert_eq!(d.routing_key, "tyres.get");
        assert!(d.redelivered);
        assert_eq!(d.message.message_id.as_deref(), Some("m-1"));
        assert_eq!(d.message.correlation_id.as_deref(), Some("c-1"));
        assert_eq!(d.message.reply_to.as_deref(), Some("rpc.reply.1"));
        assert_eq!(d.message.header("x-error"), Some("boom"));
        assert_eq!(d.message.body, br#"{"tyre_id":3}"#);
        assert_eq!(
            split_delivery_tag(&d.delivery_tag).unwrap(),
            ("1700000000000-0", "topic_logs:tyres.get")
        );
    }

    #[test]
    fn entry_without_routing_key_is_malformed() {
        let e = entry(&[("body", b"{}")]);
        assert!(decode_entry("s", "q", &e, false).is_err());
    }
}
