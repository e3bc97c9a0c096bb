//! Binds [`Event`] to the event queue

use crate::models::Event;
use crate::validation::decode_event;
use chrono::{DateTime, Utc};
use event_queue::{DecodeError, Priority, QueueEvent};
use uuid::Uuid;

impl QueueEvent for Event {
    fn event_id(&self) -> Uuid {
        self.metadata().event_id
    }

    fn event_type(&self) -> &'static str {
        Event::event_type(self).into()
    }

    fn priority(&self) -> Priority {
        Event::priority(self)
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.metadata().timestamp
    }

    fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        decode_event(payload).map_err(DecodeError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_queue_event_accessors() {
        let bytes = serde_json::to_vec(&fixtures::update_identities_json(2)).unwrap();
        let event = <Event as QueueEvent>::decode(&bytes).unwrap();

        assert_eq!(QueueEvent::event_type(&event), "licensing.updateidentities");
        assert_eq!(QueueEvent::priority(&event), Priority::High);
        assert_eq!(
            QueueEvent::event_id(&event).to_string(),
            "6f1c2a9e-8b3d-4c5e-9f7a-1b2c3d4e5f60"
        );
        assert_eq!(
            QueueEvent::timestamp(&event).to_rfc3339(),
            "2024-05-01T12:00:00+00:00"
        );
    }

    #[test]
    fn test_decode_errors_map_to_consumer_outcomes() {
        assert!(matches!(
            <Event as QueueEvent>::decode(b"\x00\x01garbage"),
            Err(DecodeError::Malformed(_))
        ));

        let mut value = fixtures::log_event_json();
        value["payload"]["message"] = serde_json::json!("");
        let bytes = serde_json::to_vec(&value).unwrap();
        assert_eq!(
            <Event as QueueEvent>::decode(&bytes),
            Err(DecodeError::Invalid(vec![
                "payload.message: must be 1-5000 characters".to_string()
            ]))
        );
    }

    #[test]
    fn test_encoded_event_decodes_to_itself() {
        let event = crate::validate_payload(&fixtures::license_create_json()).unwrap();
        let bytes = serde_json::to_vec(&event).unwrap();
        assert_eq!(<Event as QueueEvent>::decode(&bytes).unwrap(), event);
    }
}
