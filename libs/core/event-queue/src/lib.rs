//! Event Queue
//!
//! A resilient publish/consume pipeline for typed events over an AMQP broker.
//!
//! ## Features
//!
//! - **Priority routing**: `HIGH` and `NORMAL` events go to separate durable queues
//! - **Dead-lettering**: rejected messages land in `events-dead-letter` via the `dlx` exchange
//! - **Classified retries**: transient failures back off and retry, permanent ones abort
//! - **Single-flight reconnect**: concurrent callers share one connect sequence
//! - **Sequential consumption**: prefetch 1 per queue, ack on success, reject otherwise
//! - **Prometheus metrics**: publish, connection and consumer counters
//! - **Health endpoints**: liveness, readiness and `/metrics` for worker processes
//!
//! ## Example
//!
//! ```ignore
//! use event_queue::{AmqpConnector, ConnectionManager, EventPublisher, QueueConfig};
//!
//! let config = QueueConfig::from_env()?;
//! let connection = Arc::new(ConnectionManager::new(
//!     "publisher",
//!     &config,
//!     Arc::new(AmqpConnector::new()),
//! ));
//! connection.connect().await?;
//!
//! let publisher = EventPublisher::new(connection, &config);
//! publisher.publish(&event).await?;
//! ```

pub mod broker;
pub mod classifier;
mod config;
mod connection;
mod consumer;
mod error;
mod event;
pub mod health;
pub mod metrics;
mod publisher;
pub mod retry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod topology;

// Re-export main types
pub use broker::amqp::AmqpConnector;
pub use broker::{BrokerChannel, BrokerConnection, BrokerConnector, Delivery, MessageProperties};
pub use classifier::ErrorClass;
pub use config::QueueConfig;
pub use connection::{ConnectionManager, SessionHandle};
pub use consumer::{EventConsumer, MessageOutcome, PREFETCH, RejectReason, process_message};
pub use error::{BrokerError, ClosedResource, DecodeError, HandlerError, QueueError};
pub use event::{EventProcessor, Priority, QueueEvent};
pub use health::{HealthState, health_router};
pub use metrics::{init_metrics, render_metrics};
pub use publisher::EventPublisher;
pub use retry::{AttemptError, RetryConfig, RetryError, retry_with_backoff};
pub use topology::{DEAD_LETTER_EXCHANGE, DEAD_LETTER_ROUTING_KEY, Topology};
