//! Payloads exchanged with other services over the bus.
//!
//! These are wire contracts: field names and casing are fixed by the
//! publishers and callers on the other side.

use serde::{Deserialize, Serialize};
use tyrehub_core::{Money, TyreId};

/// Routing key of order events published by the order service.
pub const ORDER_CREATED: &str = "order.created";

/// Routing key of point lookups answered by the query consumer.
pub const TYRES_GET: &str = "tyres.get";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub tyre_id: TyreId,
    pub quantity: u32,
}

/// `order.created` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub items: Vec<OrderLine>,
}

/// `tyres.get` request body.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TyreQuery {
    pub tyre_id: TyreId,
}

/// The subset of a tyre record returned to bus callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TyreSnapshot {
    pub id: TyreId,
    pub brand: String,
    pub model: String,
    pub size: String,
    pub supplier: String,
    pub retail_cost: Money,
    pub quantity: i64,
}

/// `tyres.get` reply body: `{"ok": true, "tyre": {..}}` or `{"ok": false}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TyreQueryReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tyre: Option<TyreSnapshot>,
}

impl TyreQueryReply {
    pub fn found(tyre: TyreSnapshot) -> Self {
        Self {
            ok: true,
            tyre: Some(tyre),
        }
    }

    pub fn not_found() -> Self {
        Self { ok: false, tyre: None }
    }
}
