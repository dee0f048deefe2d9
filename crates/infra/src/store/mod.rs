//! Tyre record storage.
//!
//! Every method is one unit of work: it opens whatever session/transaction
//! the backend needs, commits or rolls back, and releases it before
//! returning. Nothing is held across calls.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use tyrehub_core::{DomainError, TyreId};
use tyrehub_inventory::{NegativeStockPolicy, StockDelta, Tyre, TyreFields, TyrePatch};

pub use in_memory::InMemoryTyreStore;
pub use postgres::PostgresTyreStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Uniqueness violation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other constraint the store enforces (e.g. `quantity >= 0`).
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// The change was rejected by a domain rule before being written.
    #[error(transparent)]
    Rejected(#[from] DomainError),

    /// A stored row could not be mapped back to a record.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(String),
}

/// One line of a stock order that found its tyre.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AppliedLine {
    pub tyre_id: TyreId,
    pub delta: i64,
    /// Quantity after this line.
    pub quantity: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockOrderReport {
    pub applied: Vec<AppliedLine>,
    /// Line items whose tyre does not exist, in order.
    pub skipped: Vec<TyreId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockOrderOutcome {
    Applied(StockOrderReport),
    /// The message id was already recorded; nothing was changed.
    Duplicate,
}

#[async_trait]
pub trait TyreStore: Send + Sync {
    /// All records, ordered by id ascending.
    async fn list(&self) -> Result<Vec<Tyre>, StoreError>;

    async fn get(&self, id: TyreId) -> Result<Option<Tyre>, StoreError>;

    /// Insert a new record. The store assigns the id.
    async fn insert(&self, fields: TyreFields) -> Result<Tyre, StoreError>;

    /// Full update. `None` when the id does not exist.
    async fn replace(&self, id: TyreId, fields: TyreFields) -> Result<Option<Tyre>, StoreError>;

    /// Read-merge-write under one transaction. `None` when the id does not exist.
    async fn patch(&self, id: TyreId, patch: &TyrePatch) -> Result<Option<Tyre>, StoreError>;

    /// `false` when the id does not exist.
    async fn delete(&self, id: TyreId) -> Result<bool, StoreError>;

    /// Apply all deltas of one order atomically, in order.
    ///
    /// Missing tyres are skipped. When `message_id` is given it is recorded in
    /// the same transaction; a repeated id yields `Duplicate` and changes
    /// nothing.
    async fn apply_stock_order(
        &self,
        message_id: Option<&str>,
        deltas: &[StockDelta],
        policy: NegativeStockPolicy,
    ) -> Result<StockOrderOutcome, StoreError>;
}

#[async_trait]
impl<S> TyreStore for Arc<S>
where
    S: TyreStore + ?Sized,
{
    async fn list(&self) -> Result<Vec<Tyre>, StoreError> {
        (**self).list().await
    }

    async fn get(&self, id: TyreId) -> Result<Option<Tyre>, StoreError> {
        (**self).get(id).await
    }

    async fn insert(&self, fields: TyreFields) -> Result<Tyre, StoreError> {
        (**self).insert(fields).await
    }

    async fn replace(&self, id: TyreId, fields: TyreFields) -> Result<Option<Tyre>, StoreError> {
        (**self).replace(id, fields).await
    }

    async fn patch(&self, id: TyreId, patch: &TyrePatch) -> Result<Option<Tyre>, StoreError> {
        (**self).patch(id, patch).await
    }

    async fn delete(&self, id: TyreId) -> Result<bool, StoreError> {
        (**self).delete(id).await
    }

    async fn apply_stock_order(
        &self,
        message_id: Option<&str>,
        deltas: &[StockDelta],
        policy: NegativeStockPolicy,
    ) -> Result<StockOrderOutcome, StoreError> {
        (**self).apply_stock_order(message_id, deltas, policy).await
    }
}
