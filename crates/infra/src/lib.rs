//! Infrastructure layer: storage, message bus adapters, consumers, config.

pub mod config;
pub mod consumers;
pub mod event_bus;
pub mod store;
pub mod workers;


pub use config::{AppConfig, BusConfig, ConfigError, DatabaseConfig};
pub use store::{StoreError, TyreStore};
