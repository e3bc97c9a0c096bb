//! Event ingestion.

use crate::error::{ApiError, ApiResult};
use crate::middleware::{record_validation_error, require_api_key};
use crate::state::AppState;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use domain_events::{EventError, EventType, validate_payload};
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventResponse {
    pub success: bool,
    pub event_id: Uuid,
    pub message: String,
}

/// Metric label for a rejected body: its `type` if recognized, else `unknown`
fn declared_type(value: &Value) -> &'static str {
    value
        .get("type")
        .and_then(Value::as_str)
        .and_then(|t| t.parse::<EventType>().ok())
        .map(<&'static str>::from)
        .unwrap_or("unknown")
}

/// POST /v1/events
///
/// Validates the event and queues it by priority.
pub async fn create_event(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PushEventResponse>)> {
    let Json(value) = body.map_err(|e| ApiError::InvalidJson(e.body_text()))?;

    let event = validate_payload(&value).map_err(|e| {
        record_validation_error(declared_type(&value));
        match e {
            EventError::Validation(errors) => ApiError::Validation(errors),
            EventError::Malformed(reason) => ApiError::InvalidJson(reason),
        }
    })?;

    let metadata = event.metadata();
    info!(
        event_id = %metadata.event_id,
        priority = %event.priority(),
        "Received {} event from {}",
        event.event_type(),
        metadata.source
    );

    state.publisher.publish(&event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(PushEventResponse {
            success: true,
            event_id: metadata.event_id,
            message: "Event accepted and queued for processing".to_string(),
        }),
    ))
}

/// Event routes, mounted under `/v1`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", post(create_event))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ))
        .with_state(state)
}
