//! Currency amounts.

use core::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// A currency amount with exactly two decimal places.
///
/// Construction always rounds half away from zero ("round half up" for
/// positive amounts), matching currency conventions rather than binary float
/// rounding. The scale is fixed at 2 so `100` and `100.0` both display as
/// `100.00`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Number of decimal places carried by every amount.
    pub const SCALE: u32 = 2;

    /// Round an arbitrary decimal to currency precision.
    pub fn from_decimal(amount: Decimal) -> Self {
        let mut rounded = amount.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(Self::SCALE);
        Self(rounded)
    }

    pub fn zero() -> Self {
        Self::from_decimal(Decimal::ZERO)
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Multiply by a factor, rounding the product back to currency precision.
    pub fn multiply(&self, factor: Decimal) -> Self {
        Self::from_decimal(self.0 * factor)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self::from_decimal(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}
