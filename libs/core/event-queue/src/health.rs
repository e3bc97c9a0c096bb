//! Health check handlers for queue processes.
//!
//! This module provides reusable Axum handlers for:
//! - Liveness probes (`/health`, `/healthz`)
//! - Readiness probes (`/ready`, `/readyz`), backed by the broker connection state
//! - Topology info (`/queues`)
//! - Prometheus metrics (`/metrics`)

use crate::config::QueueConfig;
use crate::connection::ConnectionManager;
use crate::metrics;
use axum::{
    Json,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// Shared state for health endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Connection whose state decides readiness.
    pub connection: Arc<ConnectionManager>,
    pub app_name: String,
    pub app_version: String,
    pub queues: Vec<String>,
    pub dead_letter_queue: String,
}

impl HealthState {
    pub fn new(
        connection: Arc<ConnectionManager>,
        app_name: impl Into<String>,
        app_version: impl Into<String>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            connection,
            app_name: app_name.into(),
            app_version: app_version.into(),
            queues: config.main_queues().map(str::to_string).to_vec(),
            dead_letter_queue: config.dead_letter_queue.clone(),
        }
    }
}

/// Health response for liveness probes.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Status (always "healthy" if responding).
    pub status: String,
    pub name: String,
    pub version: String,
}

/// Liveness probe handler.
///
/// Always returns OK if the server is running.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        name: state.app_name,
        version: state.app_version,
    })
}

/// Readiness probe handler.
///
/// Ready only while the broker connection and channel are live.
pub async fn ready_handler(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    if state.connection.is_connected() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "broker": "ok" }
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "broker": "disconnected" }
            })),
        )
    }
}

pub async fn queues_handler(State(state): State<HealthState>) -> Json<Value> {
    Json(json!({
        "queues": state.queues,
        "dead_letter_queue": state.dead_letter_queue,
        "dead_letter_exchange": crate::topology::DEAD_LETTER_EXCHANGE,
        "connected": state.connection.is_connected(),
    }))
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized. Call init_metrics() at startup.".to_string(),
        )
            .into_response(),
    }
}

/// Create a router with health, readiness, topology and metrics endpoints.
pub fn health_router(state: HealthState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/queues", get(queues_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(broker: &MemoryBroker) -> HealthState {
        let config = QueueConfig::default();
        let connection = Arc::new(ConnectionManager::new(
            "consumer",
            &config,
            Arc::new(broker.clone()),
        ));
        HealthState::new(connection, "event-worker", "0.1.0", &config)
    }

    async fn get(router: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health_always_ok() {
        let broker = MemoryBroker::new();
        let (status, body) = get(health_router(state(&broker)), "/healthz").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["name"], "event-worker");
    }

    #[tokio::test]
    async fn test_ready_follows_connection() {
        let broker = MemoryBroker::new();
        let state = state(&broker);

        let (status, body) = get(health_router(state.clone()), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"]["broker"], "disconnected");

        state.connection.connect().await.unwrap();
        let (status, body) = get(health_router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ready");

        broker.drop_connections();
        let (status, _) = get(health_router(state), "/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_queues_lists_topology() {
        let broker = MemoryBroker::new();
        let (status, body) = get(health_router(state(&broker)), "/queues").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["queues"],
            json!(["events-high-priority", "events-normal-priority"])
        );
        assert_eq!(body["dead_letter_queue"], "events-dead-letter");
        assert_eq!(body["dead_letter_exchange"], "dlx");
    }
}
