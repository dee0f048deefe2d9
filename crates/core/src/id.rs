//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a tyre record.
///
/// Assigned by the store on insert and immutable afterwards. Serialized as a
/// plain JSON number.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TyreId(i64);

impl TyreId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl core::fmt::Display for TyreId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<i64> for TyreId {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<TyreId> for i64 {
    fn from(value: TyreId) -> Self {
        value.0
    }
}

impl FromStr for TyreId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|e| DomainError::invalid_id(format!("TyreId: {e}")))?;
        Ok(Self(value))
    }
}
