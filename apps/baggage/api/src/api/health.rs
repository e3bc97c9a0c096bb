//! Liveness, readiness and metrics endpoints.

use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use event_queue::metrics::prometheus_handle;
use serde_json::{Value, json};

pub const SERVICE_NAME: &str = "baggage";

/// Liveness: always healthy while the process serves requests
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "service": SERVICE_NAME,
    }))
}

/// Readiness follows the publisher's broker connection
pub async fn ready_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let connection = state.publisher.connection();
    let (status, ready, broker) = if connection.is_connected() {
        (StatusCode::OK, "ready", "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready", "disconnected")
    };

    (
        status,
        Json(json!({
            "status": ready,
            "service": SERVICE_NAME,
            "version": state.app.version,
            "checks": { "broker": broker },
        })),
    )
}

pub async fn metrics_handler() -> Response {
    match prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Metrics not initialized",
        )
            .into_response(),
    }
}
