//! Broker client abstraction
//!
//! The pipeline talks to the broker only through these traits, so the same connection
//! manager, publisher and consumer run against:
//! - [`amqp`]: RabbitMQ via `lapin`
//! - [`memory`]: in-process broker for tests (requires `cfg(test)` or the `testing` feature)

pub mod amqp;
#[cfg(any(test, feature = "testing"))]
pub mod memory;

use crate::error::BrokerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;

/// Stream of deliveries for one consumer subscription. Ends when the channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, BrokerError>>;

/// Invoked once when a connection is lost (not on an explicit close)
pub type CloseHook = Box<dyn Fn(BrokerError) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeSpec {
    pub name: String,
    pub kind: ExchangeKind,
    pub durable: bool,
}

/// Where a queue sends rejected or expired messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub exchange: String,
    pub routing_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    pub dead_letter: Option<DeadLetter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub queue: String,
    pub exchange: String,
    pub routing_key: String,
}

/// Per-message publish properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: String,
    /// Survive a broker restart (delivery mode 2)
    pub persistent: bool,
    pub timestamp: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
}

impl MessageProperties {
    /// Persistent `application/json` message
    pub fn json() -> Self {
        Self {
            content_type: "application/json".to_string(),
            persistent: true,
            timestamp: None,
            message_id: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// A message handed to a consumer, pending ack or nack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub data: Vec<u8>,
    pub message_id: Option<String>,
    pub redelivered: bool,
}

/// Opens connections
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// An open broker connection
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, BrokerError>;

    /// Register a hook fired when the connection is lost
    fn on_close(&self, hook: CloseHook);

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), BrokerError>;
}

/// A channel on a connection. Safe to share between tasks.
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare an exchange; identical redeclaration is a no-op
    async fn declare_exchange(&self, spec: &ExchangeSpec) -> Result<(), BrokerError>;

    /// Declare a queue; identical redeclaration is a no-op
    async fn declare_queue(&self, spec: &QueueSpec) -> Result<(), BrokerError>;

    async fn bind_queue(&self, binding: &Binding) -> Result<(), BrokerError>;

    /// Send `payload` to `queue` through the default exchange.
    ///
    /// Returns `false` when the broker did not accept the message.
    async fn publish(
        &self,
        queue: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<bool, BrokerError>;

    /// Limit unacknowledged deliveries per consumer started after this call
    async fn set_prefetch(&self, count: u16) -> Result<(), BrokerError>;

    async fn consume(&self, queue: &str, consumer_tag: &str)
    -> Result<DeliveryStream, BrokerError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), BrokerError>;

    async fn nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;

    async fn close(&self) -> Result<(), BrokerError>;
}
