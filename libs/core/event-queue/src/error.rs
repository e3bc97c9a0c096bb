//! Error types for the publish/consume pipeline
//!
//! - [`BrokerError`]: what the broker client reports (transport, protocol, closed resources)
//! - [`QueueError`]: what the pipeline surfaces to its callers
//! - [`DecodeError`]: why an inbound message could not become an event
//! - [`HandlerError`]: a per-type handler failing on a decoded event
//!
//! Every [`QueueError`] carries an [`ErrorClass`] (see [`crate::classifier`]) that
//! drives retry decisions.

use crate::classifier::{self, ErrorClass};
use crate::retry::RetryError;
use strum::Display;
use thiserror::Error;

/// Broker-side resource that was found closed mid-operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ClosedResource {
    Connection,
    Channel,
    Socket,
}

/// Failures reported by a broker client
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Transport-level failure (refused, reset, timed out, unresolvable host...)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection, channel or socket was already closed
    #[error("{0} closed")]
    Closed(ClosedResource),

    /// Broker refused access (reply code 403)
    #[error("Access refused: {0}")]
    AccessRefused(String),

    /// Credentials were rejected during the handshake
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Any other reply code the broker closed a channel or connection with
    #[error("Broker protocol error {code}: {message}")]
    Protocol { code: u16, message: String },

    /// Client-side failure with no structured detail
    #[error("Broker error: {0}")]
    Other(String),
}

impl BrokerError {
    pub fn class(&self) -> ErrorClass {
        classifier::classify_broker(self)
    }
}

/// Errors surfaced by the connection manager, publisher and consumer
#[derive(Error, Debug)]
pub enum QueueError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Event could not be encoded to bytes
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Event failed schema validation
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// A concurrent connect attempt finished without leaving a usable channel
    #[error("Not connected to broker")]
    NotConnected,

    /// Broker negatively confirmed the publish (back-pressure)
    #[error("Broker did not accept message for queue '{queue}'")]
    NotAccepted { queue: String },

    #[error("Gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        source: Box<QueueError>,
    },

    /// Shutdown was requested while waiting between attempts
    #[error("Operation cancelled by shutdown")]
    Cancelled,
}

impl QueueError {
    /// Classification used by the retry loops
    pub fn class(&self) -> ErrorClass {
        classifier::classify(self)
    }

    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            QueueError::Broker(_) => "broker",
            QueueError::Serialization(_) => "serialization",
            QueueError::Validation(_) => "validation",
            QueueError::NotConnected => "not_connected",
            QueueError::NotAccepted { .. } => "not_accepted",
            QueueError::RetryExhausted { .. } => "retry_exhausted",
            QueueError::Cancelled => "cancelled",
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Serialization(err.to_string())
    }
}

impl From<RetryError<QueueError>> for QueueError {
    fn from(err: RetryError<QueueError>) -> Self {
        match err {
            RetryError::Aborted(inner) => inner,
            RetryError::Exhausted { attempts, last } => QueueError::RetryExhausted {
                attempts,
                source: Box::new(last),
            },
            RetryError::Cancelled => QueueError::Cancelled,
        }
    }
}

/// Why a delivered payload could not be turned into an event
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Bytes are not a structured document at all
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Document decoded but violates the event schema
    #[error("Invalid event: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// A handler failed while processing a decoded event
#[derive(Error, Debug)]
#[error("{handler} failed: {message}")]
pub struct HandlerError {
    pub handler: &'static str,
    pub message: String,
}

impl HandlerError {
    pub fn new(handler: &'static str, message: impl Into<String>) -> Self {
        Self {
            handler,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_error_conversion() {
        let aborted: QueueError = RetryError::Aborted(QueueError::NotConnected).into();
        assert!(matches!(aborted, QueueError::NotConnected));

        let exhausted: QueueError = RetryError::Exhausted {
            attempts: 6,
            last: QueueError::NotAccepted {
                queue: "events-high-priority".into(),
            },
        }
        .into();
        match exhausted {
            QueueError::RetryExhausted { attempts, source } => {
                assert_eq!(attempts, 6);
                assert!(matches!(*source, QueueError::NotAccepted { .. }));
            }
            other => panic!("unexpected {other:?}"),
        }

        let cancelled: QueueError = RetryError::<QueueError>::Cancelled.into();
        assert!(matches!(cancelled, QueueError::Cancelled));
    }

    #[test]
    fn test_display_keeps_cause() {
        let err = QueueError::RetryExhausted {
            attempts: 3,
            source: Box::new(QueueError::Broker(BrokerError::Closed(
                ClosedResource::Channel,
            ))),
        };
        assert_eq!(err.to_string(), "Gave up after 3 attempts: Channel closed");
        assert_eq!(err.kind(), "retry_exhausted");
    }

    #[test]
    fn test_validation_display() {
        let err = QueueError::Validation(vec![
            "metadata.source: length".into(),
            "payload.email: email".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: metadata.source: length; payload.email: email"
        );
    }
}
