//! Tyre inventory domain.
//!
//! This crate contains business rules for the tyre catalog, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage).

pub mod pricing;
pub mod stock;
pub mod tyre;

pub use pricing::{MARKUP, retail_cost};
pub use stock::{NegativeStockPolicy, StockDelta, apply_delta, order_deltas};
pub use tyre::{EfficiencyClass, Season, SpeedRate, Tyre, TyreFields, TyrePatch};
