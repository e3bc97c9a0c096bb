//! Error classification
//!
//! Maps a failure onto one of three classes that decide retry behavior:
//! - **Transient**: peer or path not reachable right now, or a connection, channel or
//!   socket closed under us. Retry after reconnecting.
//! - **Permanent**: access refused, bad credentials, or a message the broker or schema
//!   will never accept. Abort and surface.
//! - **Unknown**: nothing matched. Callers treat it as retryable.
//!
//! Classification is pure and never touches the broker.

use crate::error::{BrokerError, QueueError};
use std::io::ErrorKind;
use strum::Display;

/// Retry class of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
    Unknown,
}

impl ErrorClass {
    /// Unknown fails open toward retrying
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Permanent)
    }
}

/// AMQP reply codes after which reconnecting can help
const TRANSIENT_REPLY_CODES: &[u16] = &[
    320, // CONNECTION_FORCED
    504, // CHANNEL_ERROR
];

/// AMQP reply codes no amount of retrying will change
const PERMANENT_REPLY_CODES: &[u16] = &[
    403, // ACCESS_REFUSED
    406, // PRECONDITION_FAILED
    530, // NOT_ALLOWED
];

/// Lower-cased fragments of transport failures reported only as text
const TRANSIENT_PATTERNS: &[&str] = &[
    "econnrefused",
    "econnreset",
    "etimedout",
    "enotfound",
    "enetunreach",
    "connection refused",
    "connection reset",
    "timed out",
    "failed to lookup address",
    "name or service not known",
    "network is unreachable",
    "channel closed",
    "connection closed",
    "socket closed",
];

/// Lower-cased fragments of credential failures reported only as text
const PERMANENT_PATTERNS: &[&str] = &["access_refused", "access refused", "authentication"];

/// Classify any pipeline error
pub fn classify(err: &QueueError) -> ErrorClass {
    match err {
        QueueError::Broker(broker) => classify_broker(broker),
        QueueError::Serialization(_) | QueueError::Validation(_) => ErrorClass::Permanent,
        QueueError::NotConnected | QueueError::NotAccepted { .. } => ErrorClass::Transient,
        // the inner policy already spent its budget
        QueueError::RetryExhausted { .. } => ErrorClass::Permanent,
        QueueError::Cancelled => ErrorClass::Permanent,
    }
}

/// Classify a broker client failure
pub fn classify_broker(err: &BrokerError) -> ErrorClass {
    match err {
        BrokerError::Io(io) => match classify_io(io.kind()) {
            ErrorClass::Unknown => classify_message(&io.to_string()),
            class => class,
        },
        BrokerError::Closed(_) => ErrorClass::Transient,
        BrokerError::AccessRefused(_) | BrokerError::Authentication(_) => ErrorClass::Permanent,
        BrokerError::Protocol { code, message } => match classify_reply_code(*code) {
            ErrorClass::Unknown => classify_message(message),
            class => class,
        },
        BrokerError::Other(message) => classify_message(message),
    }
}

/// Classify by the kind of an I/O error
pub fn classify_io(kind: ErrorKind) -> ErrorClass {
    match kind {
        ErrorKind::ConnectionRefused
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::BrokenPipe
        | ErrorKind::TimedOut
        | ErrorKind::UnexpectedEof
        | ErrorKind::NetworkUnreachable
        | ErrorKind::HostUnreachable
        | ErrorKind::NetworkDown => ErrorClass::Transient,
        ErrorKind::PermissionDenied => ErrorClass::Permanent,
        _ => ErrorClass::Unknown,
    }
}

/// Classify by AMQP reply code
pub fn classify_reply_code(code: u16) -> ErrorClass {
    if TRANSIENT_REPLY_CODES.contains(&code) {
        ErrorClass::Transient
    } else if PERMANENT_REPLY_CODES.contains(&code) {
        ErrorClass::Permanent
    } else {
        ErrorClass::Unknown
    }
}

/// Fallback for failures that only carry text
pub fn classify_message(message: &str) -> ErrorClass {
    let message = message.to_ascii_lowercase();

    if PERMANENT_PATTERNS.iter().any(|p| message.contains(p)) {
        ErrorClass::Permanent
    } else if TRANSIENT_PATTERNS.iter().any(|p| message.contains(p)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Unknown
    }
}
