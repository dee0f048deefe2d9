use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::BusError;

/// A message as published to the bus.
///
/// `message_id` identifies one logical publication and survives redelivery,
/// which is what consumers key idempotency on. `correlation_id` and
/// `reply_to` carry request/reply addressing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl Message {
    /// Create a message with a fresh (time-ordered) message id.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_id: Some(Uuid::now_v7().to_string()),
            correlation_id: None,
            reply_to: None,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Serialize `payload` as a JSON body.
    pub fn json<T: Serialize + ?Sized>(payload: &T) -> Result<Self, BusError> {
        let body = serde_json::to_vec(payload).map_err(|e| BusError::Serialization(e.to_string()))?;
        Ok(Self::new(body))
    }

    pub fn with_message_id(mut self, message_id: Option<String>) -> Self {
        self.message_id = message_id;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Decode the JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A message handed to a consumer, plus the bookkeeping needed to ack it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Queue the message was consumed from.
    pub queue: String,
    /// Routing key it was published with (the queue name for direct publishes).
    pub routing_key: String,
    /// Opaque, bus-assigned handle used by `MessageBus::ack`.
    pub delivery_tag: String,
    /// True when the bus has handed this message out before without an ack.
    pub redelivered: bool,
    pub message: Message,
}

/// A named durable queue and the routing-key patterns bound to it.
///
/// A queue with no bindings only receives direct publishes (reply queues).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueBinding {
    pub queue: String,
    pub routing_keys: Vec<String>,
}

impl QueueBinding {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            routing_keys: Vec::new(),
        }
    }

    pub fn bind(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_keys.push(routing_key.into());
        self
    }
}
