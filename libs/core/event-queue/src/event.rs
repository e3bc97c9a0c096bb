//! Traits the pipeline needs from the event model
//!
//! - `QueueEvent`: anything the publisher can route and the consumer can decode
//! - `EventProcessor`: the consumer's per-event handler

use crate::error::{DecodeError, HandlerError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Delivery priority, one durable queue per level
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum Priority {
    High,
    Normal,
}

/// An event that can travel through the queues.
///
/// # Example
///
/// ```rust,ignore
/// impl QueueEvent for Event {
///     fn event_id(&self) -> Uuid { self.metadata().event_id }
///     fn event_type(&self) -> &'static str { self.type_name() }
///     fn priority(&self) -> Priority { self.priority() }
///     fn timestamp(&self) -> DateTime<Utc> { self.metadata().timestamp }
///     fn decode(payload: &[u8]) -> Result<Self, DecodeError> { /* parse + validate */ }
/// }
/// ```
pub trait QueueEvent: Serialize + Send + Sync + Sized {
    /// Unique per logical event; used as the broker message id.
    fn event_id(&self) -> Uuid;

    /// Discriminant, e.g. `logging.event`.
    fn event_type(&self) -> &'static str;

    fn priority(&self) -> Priority;

    fn timestamp(&self) -> DateTime<Utc>;

    /// Decode and validate a delivered payload.
    fn decode(payload: &[u8]) -> Result<Self, DecodeError>;
}

/// Handles decoded events on the consumer side.
///
/// Returning `Err` rejects the message without requeue, which routes it to the
/// dead-letter queue.
#[async_trait]
pub trait EventProcessor<E: QueueEvent>: Send + Sync {
    async fn process(&self, event: &E) -> Result<(), HandlerError>;

    /// Processor name for logging.
    fn name(&self) -> &'static str;
}
