//! API errors and their JSON representation.
//!
//! Every failure leaves the API as:
//!
//! ```json
//! {
//!   "success": false,
//!   "error": {
//!     "code": "VALIDATION_ERROR",
//!     "message": "Event validation failed",
//!     "details": ["metadata.source: must be 1-100 characters"]
//!   }
//! }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use event_queue::QueueError;
use serde::Serialize;
use serde_json::Value;
use strum::{AsRefStr, Display};
use thiserror::Error;

/// Machine-readable error identifiers sent to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MissingApiKey,
    InvalidAuthFormat,
    InvalidApiKey,
    ValidationError,
    InvalidJson,
    NotFound,
    QueueUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::MissingApiKey | ErrorCode::InvalidAuthFormat | ErrorCode::InvalidApiKey => {
                StatusCode::UNAUTHORIZED
            }
            ErrorCode::ValidationError | ErrorCode::InvalidJson => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authorization header is required")]
    MissingApiKey,

    #[error("Auth header must be Bearer type")]
    InvalidAuthFormat,

    #[error("Could not find a valid api key")]
    InvalidApiKey,

    #[error("Event validation failed")]
    Validation(Vec<String>),

    #[error("Request body contains invalid JSON")]
    InvalidJson(String),

    #[error("Route {method} {path} not found")]
    NotFound { method: String, path: String },

    #[error("Event queue is unavailable")]
    QueueUnavailable(#[source] QueueError),

    #[error("An unexpected error occurred while processing the event")]
    Internal(#[source] QueueError),
}

impl From<QueueError> for ApiError {
    /// Encoding failures are ours; anything else means the queue could not take the event
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Serialization(_) => ApiError::Internal(err),
            other => ApiError::QueueUnavailable(other),
        }
    }
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::MissingApiKey => ErrorCode::MissingApiKey,
            ApiError::InvalidAuthFormat => ErrorCode::InvalidAuthFormat,
            ApiError::InvalidApiKey => ErrorCode::InvalidApiKey,
            ApiError::Validation(_) => ErrorCode::ValidationError,
            ApiError::InvalidJson(_) => ErrorCode::InvalidJson,
            ApiError::NotFound { .. } => ErrorCode::NotFound,
            ApiError::QueueUnavailable(_) => ErrorCode::QueueUnavailable,
            ApiError::Internal(_) => ErrorCode::InternalError,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::MissingApiKey | ApiError::InvalidAuthFormat => Some(Value::from(
                "Include 'Authorization: Bearer <api-key>' header",
            )),
            ApiError::InvalidApiKey => Some(Value::from("Please include a valid api key")),
            ApiError::Validation(errors) => Some(Value::from(errors.clone())),
            ApiError::InvalidJson(reason) => Some(Value::from(reason.as_str())),
            ApiError::NotFound { .. } | ApiError::Internal(_) => None,
            ApiError::QueueUnavailable(_) => Some(Value::from("Please retry later")),
        }
    }

    fn field(&self) -> Option<String> {
        match self {
            ApiError::MissingApiKey | ApiError::InvalidAuthFormat | ApiError::InvalidApiKey => {
                Some("authorization".to_string())
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        match &self {
            ApiError::QueueUnavailable(source) => {
                tracing::error!(error_code = %code, error = %source, "Failed to queue event")
            }
            ApiError::Internal(source) => {
                tracing::error!(error_code = %code, error = %source, "Error processing event")
            }
            ApiError::MissingApiKey | ApiError::InvalidAuthFormat | ApiError::InvalidApiKey => {
                tracing::warn!(error_code = %code, "Rejected unauthenticated request")
            }
            _ => tracing::info!(error_code = %code, "{}", self),
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorBody {
                code,
                message: self.to_string(),
                field: self.field(),
                details: self.details(),
            },
        };

        (code.status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn render(error: ApiError) -> (StatusCode, Value) {
        let response = error.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_error_codes_serialize_screaming() {
        assert_eq!(ErrorCode::QueueUnavailable.as_ref(), "QUEUE_UNAVAILABLE");
        assert_eq!(
            serde_json::to_value(ErrorCode::MissingApiKey).unwrap(),
            "MISSING_API_KEY"
        );
    }

    #[tokio::test]
    async fn test_validation_error_body() {
        let (status, body) = render(ApiError::Validation(vec![
            "metadata.source: must be 1-100 characters".to_string(),
        ]))
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(body["error"]["message"], "Event validation failed");
        assert_eq!(
            body["error"]["details"][0],
            "metadata.source: must be 1-100 characters"
        );
        assert!(body["error"].get("field").is_none());
    }

    #[tokio::test]
    async fn test_auth_errors_are_unauthorized() {
        for (error, code) in [
            (ApiError::MissingApiKey, "MISSING_API_KEY"),
            (ApiError::InvalidAuthFormat, "INVALID_AUTH_FORMAT"),
            (ApiError::InvalidApiKey, "INVALID_API_KEY"),
        ] {
            let (status, body) = render(error).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
            assert_eq!(body["error"]["code"], code);
            assert_eq!(body["error"]["field"], "authorization");
        }
    }

    #[tokio::test]
    async fn test_queue_unavailable_hides_broker_detail() {
        let (status, body) = render(ApiError::QueueUnavailable(QueueError::NotConnected)).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], "QUEUE_UNAVAILABLE");
        assert_eq!(body["error"]["message"], "Event queue is unavailable");
    }

    #[tokio::test]
    async fn test_publish_errors_map_by_cause() {
        let encode = ApiError::from(QueueError::Serialization("key must be a string".into()));
        assert_eq!(encode.code(), ErrorCode::InternalError);

        let (status, body) = render(encode).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert!(body["error"].get("details").is_none());

        let broker = ApiError::from(QueueError::NotConnected);
        assert_eq!(broker.code(), ErrorCode::QueueUnavailable);
    }
}
