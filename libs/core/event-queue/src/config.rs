//! Queue configuration
//!
//! This module provides `QueueConfig` for the broker URL, queue names and the two retry
//! policies.

use crate::event::Priority;
use crate::retry::RetryConfig;
use core_config::{ConfigError, FromEnv, env_or_default};

pub const DEFAULT_URL: &str = "amqp://localhost:5672";
pub const DEFAULT_HIGH_PRIORITY_QUEUE: &str = "events-high-priority";
pub const DEFAULT_NORMAL_PRIORITY_QUEUE: &str = "events-normal-priority";
pub const DEFAULT_DEAD_LETTER_QUEUE: &str = "events-dead-letter";

/// Configuration shared by the publisher and the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Broker URL
    pub url: String,

    /// Queue receiving `HIGH` priority events
    pub high_priority_queue: String,

    /// Queue receiving `NORMAL` priority events
    pub normal_priority_queue: String,

    /// Queue bound to the dead-letter exchange
    pub dead_letter_queue: String,

    /// Policy for (re)establishing a connection
    pub connection_retry: RetryConfig,

    /// Policy for a single publish
    pub publish_retry: RetryConfig,
}

impl QueueConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_high_priority_queue(mut self, name: impl Into<String>) -> Self {
        self.high_priority_queue = name.into();
        self
    }

    pub fn with_normal_priority_queue(mut self, name: impl Into<String>) -> Self {
        self.normal_priority_queue = name.into();
        self
    }

    pub fn with_dead_letter_queue(mut self, name: impl Into<String>) -> Self {
        self.dead_letter_queue = name.into();
        self
    }

    pub fn with_connection_retry(mut self, retry: RetryConfig) -> Self {
        self.connection_retry = retry;
        self
    }

    pub fn with_publish_retry(mut self, retry: RetryConfig) -> Self {
        self.publish_retry = retry;
        self
    }

    /// Queue an event of the given priority is routed to
    pub fn queue_for(&self, priority: Priority) -> &str {
        match priority {
            Priority::High => &self.high_priority_queue,
            Priority::Normal => &self.normal_priority_queue,
        }
    }

    /// Both main queues, high priority first
    pub fn main_queues(&self) -> [&str; 2] {
        [&self.high_priority_queue, &self.normal_priority_queue].map(String::as_str)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            high_priority_queue: DEFAULT_HIGH_PRIORITY_QUEUE.to_string(),
            normal_priority_queue: DEFAULT_NORMAL_PRIORITY_QUEUE.to_string(),
            dead_letter_queue: DEFAULT_DEAD_LETTER_QUEUE.to_string(),
            connection_retry: RetryConfig::connection(),
            publish_retry: RetryConfig::publish(),
        }
    }
}

impl FromEnv for QueueConfig {
    /// Reads:
    /// - RABBITMQ_URL (default `amqp://localhost:5672`)
    /// - RABBITMQ_HIGH_PRIORITY_QUEUE (default `events-high-priority`)
    /// - RABBITMQ_NORMAL_PRIORITY_QUEUE (default `events-normal-priority`)
    /// - RABBITMQ_DEAD_LETTER_QUEUE (default `events-dead-letter`)
    fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            url: env_or_default("RABBITMQ_URL", DEFAULT_URL),
            high_priority_queue: env_or_default(
                "RABBITMQ_HIGH_PRIORITY_QUEUE",
                DEFAULT_HIGH_PRIORITY_QUEUE,
            ),
            normal_priority_queue: env_or_default(
                "RABBITMQ_NORMAL_PRIORITY_QUEUE",
                DEFAULT_NORMAL_PRIORITY_QUEUE,
            ),
            dead_letter_queue: env_or_default(
                "RABBITMQ_DEAD_LETTER_QUEUE",
                DEFAULT_DEAD_LETTER_QUEUE,
            ),
            ..Self::default()
        };

        let names = [
            ("RABBITMQ_HIGH_PRIORITY_QUEUE", &config.high_priority_queue),
            ("RABBITMQ_NORMAL_PRIORITY_QUEUE", &config.normal_priority_queue),
            ("RABBITMQ_DEAD_LETTER_QUEUE", &config.dead_letter_queue),
        ];
        for (key, name) in names {
            if name.trim().is_empty() {
                return Err(ConfigError::ParseError {
                    key: key.to_string(),
                    details: "queue name must not be empty".to_string(),
                });
            }
        }
        if config.high_priority_queue == config.normal_priority_queue {
            return Err(ConfigError::ParseError {
                key: "RABBITMQ_NORMAL_PRIORITY_QUEUE".to_string(),
                details: "must differ from RABBITMQ_HIGH_PRIORITY_QUEUE".to_string(),
            });
        }

        Ok(config)
    }
}
