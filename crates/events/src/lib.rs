//! Message bus mechanics and integration payloads.
//!
//! The bus is modelled as one topic exchange plus a default (direct)
//! exchange: publishers address routing keys, consumers read from named
//! durable queues bound to routing-key patterns, and replies go straight to a
//! queue by name.

pub mod bus;
pub mod in_memory_bus;
pub mod integration;
pub mod message;
pub mod rpc;
pub mod topic;

pub use bus::{BusError, MessageBus, RecvTimeoutError, Subscription};
pub use in_memory_bus::InMemoryMessageBus;
pub use message::{Delivery, Message, QueueBinding};
