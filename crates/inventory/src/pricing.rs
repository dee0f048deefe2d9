//! Retail pricing.

use rust_decimal::Decimal;
use tyrehub_core::Money;

/// Fixed retail markup applied to supplier cost (1.35).
pub const MARKUP: Decimal = Decimal::from_parts(135, 0, 0, false, 2);

/// `round(cost * 1.35, 2)`, half away from zero.
pub fn retail_cost(cost: Money) -> Money {
    cost.multiply(MARKUP)
}
