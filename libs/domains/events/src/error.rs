//! Event domain error types

use event_queue::DecodeError;
use thiserror::Error;

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Event domain errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    /// Payload is not JSON at all
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// Payload violates the event schema; one `"path: message"` entry per problem
    #[error("Event validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

impl EventError {
    /// Individual problems, suitable for an error response's `details`
    pub fn details(&self) -> Vec<String> {
        match self {
            EventError::Malformed(message) => vec![message.clone()],
            EventError::Validation(errors) => errors.clone(),
        }
    }
}

impl From<EventError> for DecodeError {
    fn from(err: EventError) -> Self {
        match err {
            EventError::Malformed(message) => DecodeError::Malformed(message),
            EventError::Validation(errors) => DecodeError::Invalid(errors),
        }
    }
}

impl From<serde_json::Error> for EventError {
    fn from(err: serde_json::Error) -> Self {
        EventError::Malformed(err.to_string())
    }
}
