//! Errors raised by tyre domain rules.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// A rule rejected a value or a state change.
///
/// Lookups that find nothing are not errors at this layer; stores return
/// `Option` and the caller decides what "missing" means.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input outside the accepted shape or range (bad enum code, empty
    /// brand, non-positive cost).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A change that would leave a record in an impossible state, such as
    /// negative stock on hand.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// `Validation` naming the offending field.
    pub fn field(field: &str, msg: impl std::fmt::Display) -> Self {
        Self::Validation(format!("{field}: {msg}"))
    }
}
