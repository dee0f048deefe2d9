use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::app::dto::{self, TyrePatchRequest, TyreRequest};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_tyres).post(create_tyre))
        .route(
            "/:id",
            get(get_tyre)
                .put(replace_tyre)
                .patch(patch_tyre)
                .delete(delete_tyre),
        )
}

pub async fn list_tyres(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.store.list().await {
        Ok(tyres) => Json(tyres).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn create_tyre(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<TyreRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(fields) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    if let Err(e) = fields.validate() {
        return errors::domain_error_to_response(e);
    }

    match services.store.insert(fields).await {
        Ok(tyre) => {
            tracing::info!(tyre_id = %tyre.id, retail_cost = %tyre.retail_cost, "tyre created");
            (StatusCode::CREATED, Json(tyre)).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_tyre(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_tyre_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services.store.get(id).await {
        Ok(Some(tyre)) => Json(tyre).into_response(),
        Ok(None) => errors::not_found(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn replace_tyre(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<TyreRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match dto::parse_tyre_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };
    let Json(fields) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };
    if let Err(e) = fields.validate() {
        return errors::domain_error_to_response(e);
    }

    match services.store.replace(id, fields).await {
        Ok(Some(tyre)) => {
            tracing::info!(tyre_id = %tyre.id, retail_cost = %tyre.retail_cost, "tyre replaced");
            Json(tyre).into_response()
        }
        Ok(None) => errors::not_found(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn patch_tyre(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<TyrePatchRequest>, JsonRejection>,
) -> axum::response::Response {
    let id = match dto::parse_tyre_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };
    let Json(patch) = match body {
        Ok(body) => body,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    // Validation of the merged record happens inside the store's transaction.
    match services.store.patch(id, &patch).await {
        Ok(Some(tyre)) => {
            tracing::info!(tyre_id = %tyre.id, cost_changed = patch.cost.is_some(), "tyre patched");
            Json(tyre).into_response()
        }
        Ok(None) => errors::not_found(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn delete_tyre(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match dto::parse_tyre_id(&id) {
        Ok(id) => id,
        Err(res) => return res,
    };

    match services.store.delete(id).await {
        Ok(true) => {
            tracing::info!(tyre_id = %id, "tyre deleted");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(false) => errors::not_found(),
        Err(e) => errors::store_error_to_response(e),
    }
}
