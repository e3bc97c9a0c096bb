//! Event domain models
//!
//! Wire format is camelCase JSON discriminated by `type`:
//!
//! ```json
//! {
//!   "type": "logging.event",
//!   "priority": "HIGH",
//!   "metadata": { "eventId": "…", "timestamp": "…", "source": "billing", "version": "1.0" },
//!   "payload": { "level": "ERROR", "message": "…" }
//! }
//! ```

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

pub use event_queue::Priority;

/// `major.minor`
static SCHEMA_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+$").expect("valid version regex"));

fn validate_version(version: &str) -> Result<(), ValidationError> {
    if !SCHEMA_VERSION.is_match(version) {
        return Err(ValidationError::new("invalid_version")
            .with_message("must be a major.minor version".into()));
    }
    Ok(())
}

/// Every code must be 1-100 characters
fn validate_codes(codes: &[String]) -> Result<(), ValidationError> {
    if codes.iter().any(|code| code.is_empty() || code.chars().count() > 100) {
        return Err(ValidationError::new("invalid_code")
            .with_message("each code must be 1-100 characters".into()));
    }
    Ok(())
}

/// Event discriminant
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
    IntoStaticStr,
)]
pub enum EventType {
    #[serde(rename = "logging.event")]
    #[strum(serialize = "logging.event")]
    Log,
    #[serde(rename = "licensing.create")]
    #[strum(serialize = "licensing.create")]
    LicenseCreate,
    #[serde(rename = "licensing.updateidentities")]
    #[strum(serialize = "licensing.updateidentities")]
    UpdateIdentities,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseType {
    HardwareLicense,
    SoftwareLicense,
    CloudLicense,
}

/// Envelope metadata shared by every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    /// Unique per logical event; reused on every publish retry
    pub event_id: Uuid,

    pub timestamp: DateTime<Utc>,

    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,

    #[validate(custom(function = "validate_version"))]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<HashMap<String, String>>,
}

impl EventMetadata {
    /// Fresh metadata stamped now, schema version 1.0
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            correlation_id: None,
            version: "1.0".to_string(),
            additional_context: None,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

// ============================================================================
// logging.event
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LogPayload {
    pub level: LogLevel,

    #[validate(length(min = 1, max = 5000, message = "must be 1-5000 characters"))]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 50000, message = "must be at most 50000 characters"))]
    pub stack_trace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(max = 100, message = "must be at most 100 characters"))]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LogEvent {
    pub priority: Priority,
    #[validate(nested)]
    pub metadata: EventMetadata,
    #[validate(nested)]
    pub payload: LogPayload,
}

// ============================================================================
// licensing.create
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LicenseCreatePayload {
    pub license_type: LicenseType,

    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub customer_id: String,

    #[validate(
        length(min = 1, message = "must contain at least one code"),
        custom(function = "validate_codes")
    )]
    pub product_codes: Vec<String>,

    #[validate(
        length(min = 1, message = "must contain at least one code"),
        custom(function = "validate_codes")
    )]
    pub feature_codes: Vec<String>,

    pub expiration_date: DateTime<Utc>,

    #[validate(email(message = "must be a valid email address"))]
    pub email: String,

    #[validate(length(min = 1, message = "must not be empty"))]
    pub xml_payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LicenseCreateEvent {
    pub priority: Priority,
    #[validate(nested)]
    pub metadata: EventMetadata,
    #[validate(nested)]
    pub payload: LicenseCreatePayload,
}

// ============================================================================
// licensing.updateidentities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    #[validate(length(min = 1, max = 200, message = "must be 1-200 characters"))]
    pub issued_to: String,

    #[validate(length(min = 1, max = 500, message = "must be 1-500 characters"))]
    pub identity_string: String,

    pub allow_remote: bool,
    pub allow_detach: bool,
    pub allow_concurrency: bool,

    /// May be empty, but must be present
    #[validate(length(max = 200, message = "must be at most 200 characters"))]
    pub limit_to: String,

    pub max_number_of_auto_registered_machines: u32,

    pub expiration_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateIdentitiesPayload {
    #[validate(length(min = 1, max = 100, message = "must be 1-100 characters"))]
    pub key_id: String,

    #[validate(length(min = 1, message = "must contain at least one identity"), nested)]
    pub identities: Vec<ClientIdentity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct UpdateIdentitiesEvent {
    pub priority: Priority,
    #[validate(nested)]
    pub metadata: EventMetadata,
    #[validate(nested)]
    pub payload: UpdateIdentitiesPayload,
}

// ============================================================================
// Event
// ============================================================================

/// Any event the system accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "logging.event")]
    Log(LogEvent),
    #[serde(rename = "licensing.create")]
    LicenseCreate(LicenseCreateEvent),
    #[serde(rename = "licensing.updateidentities")]
    UpdateIdentities(UpdateIdentitiesEvent),
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Log(_) => EventType::Log,
            Event::LicenseCreate(_) => EventType::LicenseCreate,
            Event::UpdateIdentities(_) => EventType::UpdateIdentities,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Event::Log(e) => e.priority,
            Event::LicenseCreate(e) => e.priority,
            Event::UpdateIdentities(e) => e.priority,
        }
    }

    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Event::Log(e) => &e.metadata,
            Event::LicenseCreate(e) => &e.metadata,
            Event::UpdateIdentities(e) => &e.metadata,
        }
    }
}

impl Validate for Event {
    fn validate(&self) -> Result<(), ValidationErrors> {
        match self {
            Event::Log(e) => e.validate(),
            Event::LicenseCreate(e) => e.validate(),
            Event::UpdateIdentities(e) => e.validate(),
        }
    }
}
