//! Events Domain
//!
//! The typed events the BAGgage pipeline carries:
//! - `logging.event`: application log records forwarded for processing
//! - `licensing.create`: a license to issue
//! - `licensing.updateidentities`: client identities bound to a license key
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Event Flow                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  JSON ─► validate_payload ─► Event ─► EventPublisher        │
//! │                                           │                 │
//! │                                     priority queue          │
//! │                                           │                 │
//! │                                           ▼                 │
//! │  EventConsumer ─► Event::decode ─► EventDispatcher          │
//! │                                           │                 │
//! │                                           ▼                 │
//! │                                     EventHandlers           │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod error;
#[cfg(any(test, feature = "testing"))]
pub mod fixtures;
mod handlers;
mod models;
mod queue;
mod validation;

pub use error::{EventError, Result};
pub use handlers::{EventDispatcher, EventHandlers, TracingHandlers};
pub use models::{
    ClientIdentity, Event, EventMetadata, EventType, LicenseCreateEvent, LicenseCreatePayload,
    LicenseType, LogEvent, LogLevel, LogPayload, Priority, UpdateIdentitiesEvent,
    UpdateIdentitiesPayload,
};
pub use validation::{decode_event, flatten_errors, validate_payload};
