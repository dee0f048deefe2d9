use axum::Router;

pub mod system;
pub mod tyres;

/// Router for the resource endpoints.
pub fn router() -> Router {
    Router::new().nest("/api/tyres", tyres::router())
}
