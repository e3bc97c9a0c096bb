//! Test doubles shared by this crate's tests and downstream crates (`testing` feature)

use crate::error::{DecodeError, HandlerError};
use crate::event::{EventProcessor, Priority, QueueEvent};
use crate::retry::RetryConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Minimal event: decodes any JSON object with an `id`, `priority` and `body`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEvent {
    pub id: Uuid,
    pub priority: Priority,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl TestEvent {
    pub fn new(priority: Priority, body: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            priority,
            body: body.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

impl QueueEvent for TestEvent {
    fn event_id(&self) -> Uuid {
        self.id
    }

    fn event_type(&self) -> &'static str {
        "test.event"
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let event: TestEvent =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        if event.body.is_empty() {
            return Err(DecodeError::Invalid(vec!["body: must not be empty".into()]));
        }
        Ok(event)
    }
}

/// Processor that records what it saw and fails on bodies starting with `fail`
#[derive(Default)]
pub struct RecordingProcessor {
    seen: Mutex<Vec<TestEvent>>,
}

impl RecordingProcessor {
    pub fn seen(&self) -> Vec<TestEvent> {
        self.seen
            .lock()
            .map(|seen| seen.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventProcessor<TestEvent> for RecordingProcessor {
    async fn process(&self, event: &TestEvent) -> Result<(), HandlerError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(event.clone());
        }
        if event.body.starts_with("fail") {
            return Err(HandlerError::new(self.name(), "refusing test event"));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Millisecond-scale policy so retry paths run quickly in tests
pub fn fast_retry(retries: u32) -> RetryConfig {
    RetryConfig::publish()
        .with_retries(retries)
        .with_min_timeout(Duration::from_millis(5))
        .with_max_timeout(Duration::from_millis(20))
        .without_jitter()
}
