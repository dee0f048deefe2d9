use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tyrehub_core::DomainError;
use tyrehub_infra::StoreError;

pub fn store_error_to_response(err: StoreError) -> axum::response::Response {
    match err {
        StoreError::Rejected(e) => domain_error_to_response(e),
        StoreError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        StoreError::Constraint(msg) => json_error(StatusCode::CONFLICT, "constraint_violation", msg),
        StoreError::Corrupt(msg) => {
            tracing::error!(error = %msg, "corrupt tyre record");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "stored record is unreadable")
        }
        StoreError::Database(msg) => {
            tracing::error!(error = %msg, "store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", "store failure")
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg)
        }
        DomainError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        DomainError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
    }
}

/// Every body the JSON extractor refuses (bad syntax, wrong shape, missing
/// content type) is reported as a validation failure.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "validation_error",
        rejection.body_text(),
    )
}

pub fn not_found() -> axum::response::Response {
    json_error(StatusCode::NOT_FOUND, "not_found", "tyre not found")
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (StoreError::Conflict("dup".into()), StatusCode::CONFLICT),
            (StoreError::Constraint("qty".into()), StatusCode::CONFLICT),
            (StoreError::Database("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (StoreError::Corrupt("bad".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                StoreError::Rejected(DomainError::validation("cost")),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(store_error_to_response(err).status(), status);
        }
    }

    #[test]
    fn invalid_id_is_a_bad_request() {
        let res = domain_error_to_response(DomainError::invalid_id("abc"));
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }
}
