//! Queue topology
//!
//! ```text
//!  events-high-priority ──┐ (reject / expire)
//!                         ├──► dlx (direct) ──"dead-letter"──► events-dead-letter
//!  events-normal-priority ┘
//! ```
//!
//! Everything is durable, and declaring it again with identical parameters is a no-op.

use crate::broker::{Binding, BrokerChannel, DeadLetter, ExchangeKind, ExchangeSpec, QueueSpec};
use crate::config::QueueConfig;
use crate::error::QueueError;
use tracing::debug;

/// Dead-letter exchange name
pub const DEAD_LETTER_EXCHANGE: &str = "dlx";

/// Routing key dead-lettered messages are published with
pub const DEAD_LETTER_ROUTING_KEY: &str = "dead-letter";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub dead_letter_exchange: ExchangeSpec,
    pub dead_letter_queue: QueueSpec,
    pub dead_letter_binding: Binding,
    pub main_queues: Vec<QueueSpec>,
}

impl Topology {
    pub fn from_config(config: &QueueConfig) -> Self {
        let dead_letter = DeadLetter {
            exchange: DEAD_LETTER_EXCHANGE.to_string(),
            routing_key: DEAD_LETTER_ROUTING_KEY.to_string(),
        };

        let main_queues = config
            .main_queues()
            .iter()
            .map(|name| QueueSpec {
                name: name.to_string(),
                durable: true,
                dead_letter: Some(dead_letter.clone()),
            })
            .collect();

        Self {
            dead_letter_exchange: ExchangeSpec {
                name: DEAD_LETTER_EXCHANGE.to_string(),
                kind: ExchangeKind::Direct,
                durable: true,
            },
            dead_letter_queue: QueueSpec {
                name: config.dead_letter_queue.clone(),
                durable: true,
                dead_letter: None,
            },
            dead_letter_binding: Binding {
                queue: config.dead_letter_queue.clone(),
                exchange: DEAD_LETTER_EXCHANGE.to_string(),
                routing_key: DEAD_LETTER_ROUTING_KEY.to_string(),
            },
            main_queues,
        }
    }

    /// Declare the exchange, the dead-letter queue and its binding, then the main queues
    pub async fn declare(&self, channel: &dyn BrokerChannel) -> Result<(), QueueError> {
        channel.declare_exchange(&self.dead_letter_exchange).await?;
        channel.declare_queue(&self.dead_letter_queue).await?;
        channel.bind_queue(&self.dead_letter_binding).await?;

        for queue in &self.main_queues {
            channel.declare_queue(queue).await?;
        }

        debug!(
            exchange = %self.dead_letter_exchange.name,
            dead_letter_queue = %self.dead_letter_queue.name,
            queues = self.main_queues.len(),
            "Topology declared"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerConnector;
    use crate::broker::memory::MemoryBroker;

    #[test]
    fn test_from_config() {
        let topology = Topology::from_config(&QueueConfig::default());

        assert_eq!(topology.dead_letter_exchange.name, "dlx");
        assert_eq!(topology.dead_letter_exchange.kind, ExchangeKind::Direct);
        assert!(topology.dead_letter_exchange.durable);
        assert_eq!(topology.dead_letter_binding.routing_key, "dead-letter");
        assert_eq!(topology.dead_letter_queue.name, "events-dead-letter");

        let names: Vec<_> = topology.main_queues.iter().map(|q| q.name.as_str()).collect();
        assert_eq!(names, ["events-high-priority", "events-normal-priority"]);
        for queue in &topology.main_queues {
            assert!(queue.durable);
            let dead_letter = queue.dead_letter.as_ref().unwrap();
            assert_eq!(dead_letter.exchange, "dlx");
            assert_eq!(dead_letter.routing_key, "dead-letter");
        }
    }

    #[tokio::test]
    async fn test_declare_twice_is_idempotent() {
        let broker = MemoryBroker::new();
        let topology = Topology::from_config(&QueueConfig::default());
        let connection = broker.connect("memory://").await.unwrap();
        let channel = connection.create_channel().await.unwrap();

        topology.declare(channel.as_ref()).await.unwrap();
        topology.declare(channel.as_ref()).await.unwrap();

        assert!(broker.has_queue("events-high-priority"));
        assert!(broker.has_queue("events-dead-letter"));
        assert!(broker.has_exchange("dlx"));
    }

    #[tokio::test]
    async fn test_declare_conflicting_queue_fails() {
        let broker = MemoryBroker::new();
        let connection = broker.connect("memory://").await.unwrap();
        let channel = connection.create_channel().await.unwrap();

        channel
            .declare_queue(&QueueSpec {
                name: "events-high-priority".into(),
                durable: false,
                dead_letter: None,
            })
            .await
            .unwrap();

        let err = Topology::from_config(&QueueConfig::default())
            .declare(channel.as_ref())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("406"));
    }
}
