use tyrehub_core::TyreId;
use tyrehub_inventory::{TyreFields, TyrePatch};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

/// Body of `POST` and `PUT`: the complete mutable field set.
///
/// Unknown keys are ignored, so a client-sent `id` or `retail_cost` never
/// reaches the store.
pub type TyreRequest = TyreFields;

/// Body of `PATCH`: any subset of the mutable fields.
pub type TyrePatchRequest = TyrePatch;

// -------------------------
// Path helpers
// -------------------------

pub fn parse_tyre_id(raw: &str) -> Result<TyreId, axum::response::Response> {
    raw.parse::<TyreId>()
        .map_err(errors::domain_error_to_response)
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    #[test]
    fn parses_numeric_ids() {
        assert_eq!(parse_tyre_id("42").unwrap(), TyreId::new(42));
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let res = parse_tyre_id("abc").unwrap_err();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn request_body_ignores_retail_cost() {
        let body: TyreRequest = serde_json::from_value(serde_json::json!({
            "brand": "Michelin",
            "model": "Pilot Sport 5",
            "size": "225/45R17",
            "load_rate": 94,
            "speed_rate": "Y",
            "season": "Summer",
            "supplier": "EuroTyre",
            "fuel_efficiency": "B",
            "weather_efficiency": "A",
            "noise_level": 71,
            "ev_approved": false,
            "cost": "100.00",
            "quantity": 4,
            "retail_cost": "1.00"
        }))
        .unwrap();
        assert_eq!(body.cost.to_string(), "100.00");
    }
}
