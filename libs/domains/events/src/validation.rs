//! Schema validation
//!
//! Turns an untyped JSON document into an [`Event`] or a list of problems. Each problem
//! reads `path: message`, with the path in wire (camelCase) form, e.g.
//! `payload.identities.0.issuedTo: must be 1-200 characters`.

use crate::error::{EventError, Result};
use crate::models::Event;
use serde::Deserialize;
use serde_json::Value;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

/// Decode raw bytes, then validate
pub fn decode_event(bytes: &[u8]) -> Result<Event> {
    let value: Value = serde_json::from_slice(bytes)?;
    validate_payload(&value)
}

/// Check a JSON document against the event schema
pub fn validate_payload(value: &Value) -> Result<Event> {
    let event = Event::deserialize(value).map_err(|e| EventError::Validation(vec![e.to_string()]))?;

    event
        .validate()
        .map_err(|errors| EventError::Validation(flatten_errors(&errors)))?;

    Ok(event)
}

/// Flatten nested validator output into sorted `path: message` lines
pub fn flatten_errors(errors: &ValidationErrors) -> Vec<String> {
    let mut lines = Vec::new();
    collect(errors, "", &mut lines);
    lines.sort();
    lines
}

fn collect(errors: &ValidationErrors, prefix: &str, lines: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let name = wire_name(field.as_ref());
        let path = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}.{name}")
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                lines.extend(field_errors.iter().map(|e| format!("{path}: {}", message(e))));
            }
            ValidationErrorsKind::Struct(inner) => collect(inner, &path, lines),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect(inner, &format!("{path}.{index}"), lines);
                }
            }
        }
    }
}

fn message(error: &ValidationError) -> String {
    error
        .message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| error.code.to_string())
}

/// `issued_to` -> `issuedTo`
fn wire_name(field: &str) -> String {
    let mut name = String::with_capacity(field.len());
    let mut upper = false;
    for c in field.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            name.extend(c.to_uppercase());
            upper = false;
        } else {
            name.push(c);
        }
    }
    name
}
