//! Integration tests against a real RabbitMQ broker
//!
//! These tests use RabbitMQ via testcontainers to ensure:
//! - Topology declaration is idempotent across connections
//! - Priority routing lands events in the right durable queue
//! - The consumer acks good messages and dead-letters bad ones
//!
//! Run with `cargo test -p event_queue -- --ignored` (requires Docker).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_queue::*;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_utils::{TestDataBuilder, TestRabbitMq, assertions::*};
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PingEvent {
    id: Uuid,
    priority: Priority,
    timestamp: DateTime<Utc>,
}

impl QueueEvent for PingEvent {
    fn event_id(&self) -> Uuid {
        self.id
    }

    fn event_type(&self) -> &'static str {
        "ping"
    }

    fn priority(&self) -> Priority {
        self.priority
    }

    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))
    }
}

#[derive(Default)]
struct Collector {
    seen: Mutex<Vec<Uuid>>,
}

impl Collector {
    fn seen(&self) -> Vec<Uuid> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventProcessor<PingEvent> for Collector {
    async fn process(&self, event: &PingEvent) -> Result<(), HandlerError> {
        self.seen.lock().unwrap().push(event.id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "collector"
    }
}

fn config(rabbit: &TestRabbitMq, builder: &TestDataBuilder) -> QueueConfig {
    let fast = RetryConfig::publish()
        .with_retries(3)
        .with_min_timeout(Duration::from_millis(50))
        .with_max_timeout(Duration::from_millis(200));
    QueueConfig::new(rabbit.amqp_url.clone())
        .with_high_priority_queue(builder.name("queue", "high"))
        .with_normal_priority_queue(builder.name("queue", "normal"))
        .with_dead_letter_queue(builder.name("queue", "dead"))
        .with_connection_retry(fast.clone())
        .with_publish_retry(fast)
}

fn manager(name: &str, config: &QueueConfig) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        name,
        config,
        Arc::new(AmqpConnector::new()),
    ))
}

async fn wait_for(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn test_topology_is_idempotent_across_connections() {
    let rabbit = TestRabbitMq::new().await;
    let builder = TestDataBuilder::from_test_name("topology_idempotent");
    let config = config(&rabbit, &builder);

    let first = manager("first", &config);
    let second = manager("second", &config);

    first.connect().await.unwrap();
    second.connect().await.unwrap();
    first.connect().await.unwrap();

    assert!(first.is_connected());
    assert!(second.is_connected());
    first.disconnect().await.unwrap();
    second.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_concurrent_ensure_connected() {
    let rabbit = TestRabbitMq::new().await;
    let builder = TestDataBuilder::from_test_name("concurrent_ensure");
    let manager = manager("publisher", &config(&rabbit, &builder));

    let callers: Vec<_> = (0..8)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.ensure_connected().await.map(|_| ()) })
        })
        .collect();
    for caller in callers {
        caller.await.unwrap().unwrap();
    }

    assert!(manager.is_connected());
}

// ============================================================================
// Publish / Consume Tests
// ============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn test_publish_and_consume_both_priorities() {
    let rabbit = TestRabbitMq::new().await;
    let builder = TestDataBuilder::from_test_name("publish_and_consume");
    let config = config(&rabbit, &builder);

    let publisher = EventPublisher::new(manager("publisher", &config), &config);
    let high = PingEvent {
        id: builder.uuid(1),
        priority: Priority::High,
        timestamp: Utc::now(),
    };
    let normal = PingEvent {
        id: builder.uuid(2),
        priority: Priority::Normal,
        timestamp: Utc::now(),
    };
    publisher.publish(&high).await.unwrap();
    publisher.publish(&normal).await.unwrap();

    let collector = Arc::new(Collector::default());
    let consumer = EventConsumer::new(manager("consumer", &config), collector.clone(), &config);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(rx).await });

    wait_for(|| collector.seen().len() == 2).await;
    let seen = collector.seen();
    assert!(seen.contains(&high.id));
    assert!(seen.contains(&normal.id));

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    publisher.close().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker
async fn test_malformed_message_is_dead_lettered() {
    let rabbit = TestRabbitMq::new().await;
    let builder = TestDataBuilder::from_test_name("malformed_dead_letter");
    let config = config(&rabbit, &builder);

    let raw = manager("raw", &config);
    let channel = raw.ensure_connected().await.unwrap();
    let accepted = channel
        .publish(
            &config.normal_priority_queue,
            b"not an event",
            &MessageProperties::json(),
        )
        .await
        .unwrap();
    assert!(accepted);

    let collector = Arc::new(Collector::default());
    let consumer = EventConsumer::new(manager("consumer", &config), collector.clone(), &config);
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(async move { consumer.run(rx).await });

    // read the dead-letter queue with a plain subscription
    let mut dead = channel
        .consume(&config.dead_letter_queue, "dead-letter-reader")
        .await
        .unwrap();
    let delivery = tokio::time::timeout(Duration::from_secs(10), futures::StreamExt::next(&mut dead))
        .await
        .expect("dead-lettered message should arrive");
    let delivery = assert_some(delivery, "dead-letter stream ended").unwrap();
    assert_eq!(delivery.data, b"not an event");
    assert!(collector.seen().is_empty());

    tx.send(true).unwrap();
    handle.await.unwrap().unwrap();
    raw.disconnect().await.unwrap();
}
