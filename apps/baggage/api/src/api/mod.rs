use crate::error::ApiError;
use crate::state::AppState;
use axum::{Router, http::Method, http::Uri, routing::get};

pub mod events;
pub mod health;

/// Versioned API routes (state applied)
pub fn routes(state: &AppState) -> Router {
    Router::new().nest("/v1", events::router(state.clone()))
}

/// `/health`, `/ready` and `/metrics`
pub fn health_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/ready", get(health::ready_handler))
        .route("/metrics", get(health::metrics_handler))
        .with_state(state)
}

pub async fn not_found(method: Method, uri: Uri) -> ApiError {
    ApiError::NotFound {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}
