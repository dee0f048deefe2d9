//! Postgres-backed tyre store.
//!
//! ## Error Mapping
//!
//! | PostgreSQL Error Code | StoreError | Scenario |
//! |----------------------|------------|----------|
//! | `23505` | `Conflict` | Unique violation |
//! | `23514` | `Constraint` | Check violation (e.g. stock would go below zero) |
//! | any other | `Database` | Connection failures, syntax, pool closed, ... |
//!
//! ## Stock Deltas
//!
//! Quantity changes from orders are a single `UPDATE ... SET quantity =
//! quantity + $1 ... RETURNING quantity` per line, so concurrent orders never
//! lose an update. The schema's `CHECK (quantity >= 0)` rejects a line that
//! would oversell; the whole order transaction then rolls back.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{Span, debug, instrument};

use tyrehub_core::{Money, TyreId};
use tyrehub_inventory::{
    EfficiencyClass, NegativeStockPolicy, Season, SpeedRate, StockDelta, Tyre, TyreFields, TyrePatch,
};

use super::{AppliedLine, StockOrderOutcome, StockOrderReport, StoreError, TyreStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tyres (
        id                 BIGSERIAL PRIMARY KEY,
        brand              VARCHAR(50)   NOT NULL,
        model              VARCHAR(50)   NOT NULL,
        size               VARCHAR(20)   NOT NULL,
        load_rate          INTEGER       NOT NULL CHECK (load_rate > 0),
        speed_rate         VARCHAR(2)    NOT NULL,
        season             VARCHAR(20)   NOT NULL,
        supplier           VARCHAR(100)  NOT NULL,
        fuel_efficiency    CHAR(1)       NOT NULL,
        weather_efficiency CHAR(1)       NOT NULL,
        noise_level        INTEGER       NOT NULL CHECK (noise_level > 0),
        ev_approved        BOOLEAN       NOT NULL DEFAULT FALSE,
        cost               NUMERIC(10,2) NOT NULL CHECK (cost > 0),
        quantity           BIGINT        NOT NULL DEFAULT 0 CHECK (quantity >= 0),
        retail_cost        NUMERIC(12,2) NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS processed_messages (
        message_id   TEXT PRIMARY KEY,
        processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
];

const TYRE_COLUMNS: &str = "id, brand, model, size, load_rate, speed_rate, season, supplier, \
     fuel_efficiency, weather_efficiency, noise_level, ev_approved, cost, quantity, retail_cost";

#[derive(Debug, Clone)]
pub struct PostgresTyreStore {
    pool: Arc<PgPool>,
}

impl PostgresTyreStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Connect a pool and make sure the schema exists.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create tables if absent. Idempotent.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        }
        Ok(())
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, StoreError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

#[async_trait]
impl TyreStore for PostgresTyreStore {
    #[instrument(skip(self), fields(count = tracing::field::Empty), err)]
    async fn list(&self) -> Result<Vec<Tyre>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {TYRE_COLUMNS} FROM tyres ORDER BY id ASC"))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list", e))?;

        let tyres = rows
            .iter()
            .map(tyre_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        Span::current().record("count", tyres.len());
        Ok(tyres)
    }

    #[instrument(skip(self), fields(tyre_id = %id), err)]
    async fn get(&self, id: TyreId) -> Result<Option<Tyre>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TYRE_COLUMNS} FROM tyres WHERE id = $1"))
            .bind(id.value())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(tyre_from_row).transpose()
    }

    #[instrument(skip(self, fields), fields(tyre_id = tracing::field::Empty), err)]
    async fn insert(&self, fields: TyreFields) -> Result<Tyre, StoreError> {
        let draft = Tyre::new(TyreId::new(0), fields);

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tyres (
                brand, model, size, load_rate, speed_rate, season, supplier,
                fuel_efficiency, weather_efficiency, noise_level, ev_approved,
                cost, quantity, retail_cost
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {TYRE_COLUMNS}
            "#
        ))
        .bind(&draft.fields.brand)
        .bind(&draft.fields.model)
        .bind(&draft.fields.size)
        .bind(draft.fields.load_rate)
        .bind(draft.fields.speed_rate.as_str())
        .bind(draft.fields.season.as_str())
        .bind(&draft.fields.supplier)
        .bind(draft.fields.fuel_efficiency.as_str())
        .bind(draft.fields.weather_efficiency.as_str())
        .bind(draft.fields.noise_level)
        .bind(draft.fields.ev_approved)
        .bind(draft.fields.cost.amount())
        .bind(draft.fields.quantity)
        .bind(draft.retail_cost.amount())
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert", e))?;

        let tyre = tyre_from_row(&row)?;
        Span::current().record("tyre_id", tyre.id.value());
        Ok(tyre)
    }

    #[instrument(skip(self, fields), fields(tyre_id = %id), err)]
    async fn replace(&self, id: TyreId, fields: TyreFields) -> Result<Option<Tyre>, StoreError> {
        let mut tx = self.begin().await?;
        let updated = write_tyre(&mut tx, &Tyre::new(id, fields)).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(updated)
    }

    #[instrument(skip(self, patch), fields(tyre_id = %id), err)]
    async fn patch(&self, id: TyreId, patch: &TyrePatch) -> Result<Option<Tyre>, StoreError> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {TYRE_COLUMNS} FROM tyres WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.value())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("patch_select", e))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(None);
        };

        let mut tyre = tyre_from_row(&row)?;
        if let Err(e) = tyre.patch(patch) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(e.into());
        }

        let updated = write_tyre(&mut tx, &tyre).await?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(updated)
    }

    #[instrument(skip(self), fields(tyre_id = %id), err)]
    async fn delete(&self, id: TyreId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tyres WHERE id = $1")
            .bind(id.value())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(
        skip(self, deltas),
        fields(message_id = message_id.unwrap_or("-"), lines = deltas.len(), policy = %policy),
        err
    )]
    async fn apply_stock_order(
        &self,
        message_id: Option<&str>,
        deltas: &[StockDelta],
        policy: NegativeStockPolicy,
    ) -> Result<StockOrderOutcome, StoreError> {
        let mut tx = self.begin().await?;

        if let Some(message_id) = message_id {
            let recorded = sqlx::query(
                "INSERT INTO processed_messages (message_id) VALUES ($1) ON CONFLICT DO NOTHING",
            )
            .bind(message_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("record_message", e))?;

            if recorded.rows_affected() == 0 {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Ok(StockOrderOutcome::Duplicate);
            }
        }

        let statement = match policy {
            NegativeStockPolicy::Reject => {
                "UPDATE tyres SET quantity = quantity + $1 WHERE id = $2 RETURNING quantity"
            }
            NegativeStockPolicy::Clamp => {
                "UPDATE tyres SET quantity = GREATEST(quantity + $1, 0) WHERE id = $2 RETURNING quantity"
            }
        };

        let mut report = StockOrderReport::default();
        for d in deltas {
            // On error the transaction is dropped, which rolls it back.
            let quantity: Option<i64> = sqlx::query_scalar(statement)
                .bind(d.delta)
                .bind(d.tyre_id.value())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("apply_delta", e))?;

            match quantity {
                Some(quantity) => report.applied.push(AppliedLine {
                    tyre_id: d.tyre_id,
                    delta: d.delta,
                    quantity,
                }),
                None => {
                    debug!(tyre_id = %d.tyre_id, "no such tyre");
                    report.skipped.push(d.tyre_id);
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(StockOrderOutcome::Applied(report))
    }
}

/// Overwrite every mutable column of an existing row.
async fn write_tyre(
    tx: &mut Transaction<'static, Postgres>,
    tyre: &Tyre,
) -> Result<Option<Tyre>, StoreError> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE tyres SET
            brand = $2,
            model = $3,
            size = $4,
            load_rate = $5,
            speed_rate = $6,
            season = $7,
            supplier = $8,
            fuel_efficiency = $9,
            weather_efficiency = $10,
            noise_level = $11,
            ev_approved = $12,
            cost = $13,
            quantity = $14,
            retail_cost = $15
        WHERE id = $1
        RETURNING {TYRE_COLUMNS}
        "#
    ))
    .bind(tyre.id.value())
    .bind(&tyre.fields.brand)
    .bind(&tyre.fields.model)
    .bind(&tyre.fields.size)
    .bind(tyre.fields.load_rate)
    .bind(tyre.fields.speed_rate.as_str())
    .bind(tyre.fields.season.as_str())
    .bind(&tyre.fields.supplier)
    .bind(tyre.fields.fuel_efficiency.as_str())
    .bind(tyre.fields.weather_efficiency.as_str())
    .bind(tyre.fields.noise_level)
    .bind(tyre.fields.ev_approved)
    .bind(tyre.fields.cost.amount())
    .bind(tyre.fields.quantity)
    .bind(tyre.retail_cost.amount())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("update", e))?;

    row.as_ref().map(tyre_from_row).transpose()
}

fn tyre_from_row(row: &PgRow) -> Result<Tyre, StoreError> {
    let corrupt = |e: sqlx::Error| StoreError::Corrupt(e.to_string());
    let invalid = |e: tyrehub_core::DomainError| StoreError::Corrupt(e.to_string());

    let speed_rate: String = row.try_get("speed_rate").map_err(corrupt)?;
    let season: String = row.try_get("season").map_err(corrupt)?;
    let fuel: String = row.try_get("fuel_efficiency").map_err(corrupt)?;
    let weather: String = row.try_get("weather_efficiency").map_err(corrupt)?;
    let cost: Decimal = row.try_get("cost").map_err(corrupt)?;
    let retail_cost: Decimal = row.try_get("retail_cost").map_err(corrupt)?;

    let fields = TyreFields {
        brand: row.try_get("brand").map_err(corrupt)?,
        model: row.try_get("model").map_err(corrupt)?,
        size: row.try_get("size").map_err(corrupt)?,
        load_rate: row.try_get("load_rate").map_err(corrupt)?,
        speed_rate: SpeedRate::from_str(speed_rate.trim()).map_err(invalid)?,
        season: Season::from_str(season.trim()).map_err(invalid)?,
        supplier: row.try_get("supplier").map_err(corrupt)?,
        fuel_efficiency: EfficiencyClass::from_str(fuel.trim()).map_err(invalid)?,
        weather_efficiency: EfficiencyClass::from_str(weather.trim()).map_err(invalid)?,
        noise_level: row.try_get("noise_level").map_err(corrupt)?,
        ev_approved: row.try_get("ev_approved").map_err(corrupt)?,
        cost: Money::from_decimal(cost),
        quantity: row.try_get("quantity").map_err(corrupt)?,
    };

    Ok(Tyre {
        id: TyreId::new(row.try_get("id").map_err(corrupt)?),
        fields,
        retail_cost: Money::from_decimal(retail_cost),
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23514") => StoreError::Constraint(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}
