//! Stock deltas driven by order events.

use core::fmt;
use core::str::FromStr;

use tyrehub_core::{DomainError, DomainResult, TyreId};
use tyrehub_events::integration::{OrderCreated, OrderLine, OrderType};

/// What to do when a delta would take stock below zero.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum NegativeStockPolicy {
    /// Fail the whole order.
    #[default]
    Reject,
    /// Floor the quantity at zero.
    Clamp,
}

impl NegativeStockPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reject => "reject",
            Self::Clamp => "clamp",
        }
    }
}

impl fmt::Display for NegativeStockPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NegativeStockPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "clamp" => Ok(Self::Clamp),
            other => Err(DomainError::validation(format!(
                "unknown negative stock policy: {other} (expected reject|clamp)"
            ))),
        }
    }
}

/// A signed change to one tyre's quantity.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StockDelta {
    pub tyre_id: TyreId,
    pub delta: i64,
}

impl StockDelta {
    pub fn from_line(order_type: OrderType, line: &OrderLine) -> Self {
        let quantity = i64::from(line.quantity);
        let delta = match order_type {
            OrderType::Buy => quantity,
            OrderType::Sell => -quantity,
        };
        Self {
            tyre_id: line.tyre_id,
            delta,
        }
    }
}

/// Deltas for every line item, in order.
pub fn order_deltas(order: &OrderCreated) -> Vec<StockDelta> {
    order
        .items
        .iter()
        .map(|line| StockDelta::from_line(order.order_type, line))
        .collect()
}

/// New quantity after applying `delta` to `current` under `policy`.
pub fn apply_delta(current: i64, delta: i64, policy: NegativeStockPolicy) -> DomainResult<i64> {
    let next = current
        .checked_add(delta)
        .ok_or_else(|| DomainError::invariant("stock quantity overflow"))?;

    if next >= 0 {
        return Ok(next);
    }
    match policy {
        NegativeStockPolicy::Reject => Err(DomainError::invariant(format!(
            "stock cannot go negative (have {current}, change {delta})"
        ))),
        NegativeStockPolicy::Clamp => Ok(0),
    }
}
