use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use tyrehub_core::TyreId;
use tyrehub_inventory::{NegativeStockPolicy, StockDelta, Tyre, TyreFields, TyrePatch, apply_delta};

use super::{AppliedLine, StockOrderOutcome, StockOrderReport, StoreError, TyreStore};

#[derive(Debug, Default)]
struct State {
    tyres: BTreeMap<TyreId, Tyre>,
    last_id: i64,
    processed_messages: HashSet<String>,
}

/// In-memory tyre store for tests/dev.
///
/// One write lock per call gives the same all-or-nothing behaviour as a
/// database transaction.
#[derive(Debug, Default)]
pub struct InMemoryTyreStore {
    inner: RwLock<State>,
}

impl InMemoryTyreStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Database("store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Database("store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TyreStore for InMemoryTyreStore {
    async fn list(&self) -> Result<Vec<Tyre>, StoreError> {
        Ok(self.read()?.tyres.values().cloned().collect())
    }

    async fn get(&self, id: TyreId) -> Result<Option<Tyre>, StoreError> {
        Ok(self.read()?.tyres.get(&id).cloned())
    }

    async fn insert(&self, fields: TyreFields) -> Result<Tyre, StoreError> {
        let mut state = self.write()?;
        state.last_id += 1;
        let tyre = Tyre::new(TyreId::new(state.last_id), fields);
        state.tyres.insert(tyre.id, tyre.clone());
        Ok(tyre)
    }

    async fn replace(&self, id: TyreId, fields: TyreFields) -> Result<Option<Tyre>, StoreError> {
        let mut state = self.write()?;
        let Some(tyre) = state.tyres.get_mut(&id) else {
            return Ok(None);
        };
        tyre.replace(fields);
        Ok(Some(tyre.clone()))
    }

    async fn patch(&self, id: TyreId, patch: &TyrePatch) -> Result<Option<Tyre>, StoreError> {
        let mut state = self.write()?;
        let Some(tyre) = state.tyres.get_mut(&id) else {
            return Ok(None);
        };
        tyre.patch(patch)?;
        Ok(Some(tyre.clone()))
    }

    async fn delete(&self, id: TyreId) -> Result<bool, StoreError> {
        Ok(self.write()?.tyres.remove(&id).is_some())
    }

    async fn apply_stock_order(
        &self,
        message_id: Option<&str>,
        deltas: &[StockDelta],
        policy: NegativeStockPolicy,
    ) -> Result<StockOrderOutcome, StoreError> {
        let mut state = self.write()?;

        if let Some(id) = message_id {
            if state.processed_messages.contains(id) {
                return Ok(StockOrderOutcome::Duplicate);
            }
        }

        // Stage every line first; only commit if all of them succeed.
        let mut staged: HashMap<TyreId, i64> = HashMap::new();
        let mut report = StockOrderReport::default();
        for d in deltas {
            let current = match staged.get(&d.tyre_id) {
                Some(q) => *q,
                None => match state.tyres.get(&d.tyre_id) {
                    Some(tyre) => tyre.fields.quantity,
                    None => {
                        report.skipped.push(d.tyre_id);
                        continue;
                    }
                },
            };
            let quantity = apply_delta(current, d.delta, policy)?;
            staged.insert(d.tyre_id, quantity);
            report.applied.push(AppliedLine {
                tyre_id: d.tyre_id,
                delta: d.delta,
                quantity,
            });
        }

        for (id, quantity) in staged {
            if let Some(tyre) = state.tyres.get_mut(&id) {
                tyre.fields.quantity = quantity;
            }
        }
        if let Some(id) = message_id {
            state.processed_messages.insert(id.to_string());
        }

        Ok(StockOrderOutcome::Applied(report))
    }
}
