//! Event consumer
//!
//! Subscribes to both priority queues on one channel with a prefetch of 1 per
//! subscription, so each queue is processed strictly one message at a time.
//!
//! ```text
//! Received ─► decode ──fail──► Rejected(parse_failed)
//!               │
//!               ├──invalid──► Rejected(validation_failed)
//!               ▼
//!            process ──err──► Rejected(handler_failed)
//!               │
//!               ▼
//!             Acked
//! ```
//!
//! Rejections never requeue; the broker dead-letters them. A subscription that ends
//! (connection lost, consumer cancelled) tears the channel down and the consumer
//! resubscribes through a fresh connection.

use crate::broker::{BrokerChannel, Delivery, DeliveryStream};
use crate::classifier::ErrorClass;
use crate::config::QueueConfig;
use crate::connection::ConnectionManager;
use crate::error::{DecodeError, QueueError};
use crate::event::{EventProcessor, QueueEvent};
use crate::metrics::ConsumerMetrics;
use crate::retry::shutdown_requested;
use futures::StreamExt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::{Display, IntoStaticStr};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// In-flight unacknowledged messages per subscription
pub const PREFETCH: u16 = 1;

/// Pause before resubscribing after a failed subscribe
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RejectReason {
    ParseFailed,
    ValidationFailed,
    HandlerFailed,
}

/// Terminal state of one delivered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Acked,
    Rejected { reason: RejectReason, detail: String },
}

/// Decode, validate and process one payload
pub async fn process_message<E, P>(processor: &P, payload: &[u8]) -> MessageOutcome
where
    E: QueueEvent,
    P: EventProcessor<E> + ?Sized,
{
    let event = match E::decode(payload) {
        Ok(event) => event,
        Err(DecodeError::Malformed(detail)) => {
            return MessageOutcome::Rejected {
                reason: RejectReason::ParseFailed,
                detail,
            };
        }
        Err(DecodeError::Invalid(errors)) => {
            return MessageOutcome::Rejected {
                reason: RejectReason::ValidationFailed,
                detail: errors.join("; "),
            };
        }
    };

    match processor.process(&event).await {
        Ok(()) => MessageOutcome::Acked,
        Err(err) => MessageOutcome::Rejected {
            reason: RejectReason::HandlerFailed,
            detail: err.to_string(),
        },
    }
}

pub struct EventConsumer<E, P> {
    connection: Arc<ConnectionManager>,
    processor: Arc<P>,
    queues: Vec<String>,
    _event: PhantomData<fn() -> E>,
}

impl<E, P> EventConsumer<E, P>
where
    E: QueueEvent + 'static,
    P: EventProcessor<E> + 'static,
{
    pub fn new(connection: Arc<ConnectionManager>, processor: Arc<P>, config: &QueueConfig) -> Self {
        Self {
            connection,
            processor,
            queues: config.main_queues().map(str::to_string).to_vec(),
            _event: PhantomData,
        }
    }

    /// Consume until shutdown is signalled.
    ///
    /// Returns an error only when the broker cannot be reached at all (permanent
    /// failure or connection retries exhausted). Message-level failures never surface.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), QueueError> {
        info!(
            processor = self.processor.name(),
            queues = ?self.queues,
            "Starting event consumer"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let connected = tokio::select! {
                result = self.connection.ensure_session() => result,
                _ = shutdown_requested(&mut shutdown) => break,
            };
            let session = match connected {
                Ok(session) => session,
                Err(QueueError::Cancelled) => break,
                Err(err) if err.class() == ErrorClass::Permanent => {
                    error!(error = %err, "Consumer cannot reach the broker");
                    return Err(err);
                }
                Err(err) => {
                    debug!(error = %err, "Consumer connect attempt failed, retrying");
                    continue;
                }
            };

            let subscriptions = match self.subscribe(session.channel.as_ref()).await {
                Ok(subscriptions) => subscriptions,
                Err(err) => {
                    warn!(error = %err, "Failed to subscribe, reconnecting");
                    self.connection.invalidate_if(session.generation);
                    tokio::select! {
                        _ = tokio::time::sleep(RESUBSCRIBE_DELAY) => continue,
                        _ = shutdown_requested(&mut shutdown) => break,
                    }
                }
            };

            let mut workers = JoinSet::new();
            for (queue, deliveries) in subscriptions {
                let worker = QueueWorker {
                    metrics: ConsumerMetrics::new(queue.clone()),
                    queue,
                    channel: session.channel.clone(),
                    processor: self.processor.clone(),
                    _event: PhantomData::<fn() -> E>,
                };
                workers.spawn(worker.drain(deliveries, shutdown.clone()));
            }

            let finished = tokio::select! {
                _ = shutdown_requested(&mut shutdown) => None,
                joined = workers.join_next() => joined,
            };

            if finished.is_none() || *shutdown.borrow() {
                // let in-flight messages settle
                while workers.join_next().await.is_some() {}
                break;
            }

            match finished {
                Some(Ok(Ok(queue))) => warn!(queue = %queue, "Subscription ended, resubscribing"),
                Some(Ok(Err(err))) => warn!(error = %err, "Subscription failed, resubscribing"),
                Some(Err(err)) => error!(error = %err, "Consumer task panicked, resubscribing"),
                None => {}
            }
            workers.abort_all();
            while workers.join_next().await.is_some() {}
            self.connection.invalidate_if(session.generation);
        }

        info!(processor = self.processor.name(), "Event consumer stopped");
        if let Err(err) = self.connection.disconnect().await {
            warn!(error = %err, "Error closing consumer connection");
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        channel: &dyn BrokerChannel,
    ) -> Result<Vec<(String, DeliveryStream)>, QueueError> {
        channel.set_prefetch(PREFETCH).await?;

        let mut subscriptions = Vec::with_capacity(self.queues.len());
        for queue in &self.queues {
            let consumer_tag = format!("{}-{queue}", self.connection.name());
            let deliveries = channel.consume(queue, &consumer_tag).await?;
            info!(queue = %queue, prefetch = PREFETCH, "Subscribed to queue");
            subscriptions.push((queue.clone(), deliveries));
        }
        Ok(subscriptions)
    }
}

/// Drains one subscription
struct QueueWorker<E, P> {
    queue: String,
    channel: Arc<dyn BrokerChannel>,
    processor: Arc<P>,
    metrics: ConsumerMetrics,
    _event: PhantomData<fn() -> E>,
}

impl<E, P> QueueWorker<E, P>
where
    E: QueueEvent + 'static,
    P: EventProcessor<E> + 'static,
{
    /// Returns the queue name when the stream ends or shutdown is observed
    async fn drain(
        self,
        mut deliveries: DeliveryStream,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<String, QueueError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown_requested(&mut shutdown) => return Ok(self.queue),
                next = deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => self.handle(delivery).await?,
                Some(Err(err)) => return Err(err.into()),
                None => return Ok(self.queue),
            }
        }
    }

    async fn handle(&self, delivery: Delivery) -> Result<(), QueueError> {
        self.metrics.received();
        let started = Instant::now();
        let message_id = delivery.message_id.as_deref().unwrap_or("-");

        match process_message::<E, P>(self.processor.as_ref(), &delivery.data).await {
            MessageOutcome::Acked => {
                self.channel.ack(delivery.delivery_tag).await?;
                self.metrics.acked(started.elapsed());
                debug!(queue = %self.queue, message_id, "Message acknowledged");
            }
            MessageOutcome::Rejected { reason, detail } => {
                self.channel.nack(delivery.delivery_tag, false).await?;
                self.metrics.rejected(reason.into());
                warn!(
                    queue = %self.queue,
                    message_id,
                    redelivered = delivery.redelivered,
                    reason = %reason,
                    detail = %detail,
                    "Message rejected to dead-letter queue"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use crate::error::HandlerError;
    use crate::event::Priority;
    use crate::testing::{RecordingProcessor, TestEvent, fast_retry};
    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use tokio::task::JoinHandle;

    const NORMAL: &str = "events-normal-priority";
    const HIGH: &str = "events-high-priority";
    const DEAD: &str = "events-dead-letter";

    fn config() -> QueueConfig {
        QueueConfig::default().with_connection_retry(fast_retry(3))
    }

    fn manager(broker: &MemoryBroker) -> Arc<ConnectionManager> {
        Arc::new(ConnectionManager::new(
            "consumer",
            &config(),
            Arc::new(broker.clone()),
        ))
    }

    fn spawn_consumer<P: EventProcessor<TestEvent> + 'static>(
        broker: &MemoryBroker,
        processor: Arc<P>,
    ) -> (watch::Sender<bool>, JoinHandle<Result<(), QueueError>>) {
        let consumer = EventConsumer::new(manager(broker), processor, &config());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(async move { consumer.run(rx).await });
        (tx, handle)
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn stop(tx: watch::Sender<bool>, handle: JoinHandle<Result<(), QueueError>>) {
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("consumer should stop")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_process_message_outcomes() {
        let processor = RecordingProcessor::default();

        let ok = TestEvent::new(Priority::High, "fine").to_bytes();
        assert_eq!(
            process_message::<TestEvent, _>(&processor, &ok).await,
            MessageOutcome::Acked
        );

        let outcome = process_message::<TestEvent, _>(&processor, b"{not json").await;
        assert!(matches!(
            outcome,
            MessageOutcome::Rejected { reason: RejectReason::ParseFailed, .. }
        ));

        let invalid = TestEvent::new(Priority::High, "").to_bytes();
        let outcome = process_message::<TestEvent, _>(&processor, &invalid).await;
        assert_eq!(
            outcome,
            MessageOutcome::Rejected {
                reason: RejectReason::ValidationFailed,
                detail: "body: must not be empty".into(),
            }
        );

        let failing = TestEvent::new(Priority::High, "fail please").to_bytes();
        let outcome = process_message::<TestEvent, _>(&processor, &failing).await;
        assert!(matches!(
            outcome,
            MessageOutcome::Rejected { reason: RejectReason::HandlerFailed, .. }
        ));

        // only decodable, valid events reach the processor
        assert_eq!(processor.seen().len(), 2);
    }

    #[tokio::test]
    async fn test_valid_messages_are_acked() {
        let broker = MemoryBroker::new();
        let processor = Arc::new(RecordingProcessor::default());
        let (tx, handle) = spawn_consumer(&broker, processor.clone());
        wait_until(|| broker.has_queue(NORMAL)).await;

        let high = TestEvent::new(Priority::High, "urgent");
        let normal = TestEvent::new(Priority::Normal, "routine");
        broker.push_raw(HIGH, high.to_bytes());
        broker.push_raw(NORMAL, normal.to_bytes());

        wait_until(|| processor.seen().len() == 2).await;
        wait_until(|| broker.unacked_count() == 0).await;
        assert_eq!(broker.queue_depth(HIGH), 0);
        assert_eq!(broker.queue_depth(NORMAL), 0);
        assert_eq!(broker.queue_depth(DEAD), 0);

        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_malformed_message_is_dead_lettered_without_dispatch() {
        let broker = MemoryBroker::new();
        let processor = Arc::new(RecordingProcessor::default());
        let (tx, handle) = spawn_consumer(&broker, processor.clone());
        wait_until(|| broker.has_queue(NORMAL)).await;

        broker.push_raw(NORMAL, "definitely not an event");
        let after = TestEvent::new(Priority::Normal, "after");
        broker.push_raw(NORMAL, after.to_bytes());

        wait_until(|| processor.seen().len() == 1).await;
        wait_until(|| broker.queue_depth(DEAD) == 1).await;
        assert_eq!(processor.seen(), vec![after]);
        assert_eq!(
            broker.queue_payloads(DEAD),
            vec![b"definitely not an event".to_vec()]
        );

        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_invalid_and_failing_messages_are_dead_lettered() {
        let broker = MemoryBroker::new();
        let processor = Arc::new(RecordingProcessor::default());
        let (tx, handle) = spawn_consumer(&broker, processor.clone());
        wait_until(|| broker.has_queue(HIGH)).await;

        broker.push_raw(HIGH, TestEvent::new(Priority::High, "").to_bytes());
        broker.push_raw(HIGH, TestEvent::new(Priority::High, "fail hard").to_bytes());

        wait_until(|| broker.queue_depth(DEAD) == 2).await;
        // the invalid one never reached the processor
        assert_eq!(processor.seen().len(), 1);
        assert_eq!(broker.queue_depth(HIGH), 0);
        assert_eq!(broker.unacked_count(), 0);

        stop(tx, handle).await;
    }

    struct GatedProcessor {
        gate: Semaphore,
    }

    #[async_trait]
    impl EventProcessor<TestEvent> for GatedProcessor {
        async fn process(&self, _event: &TestEvent) -> Result<(), HandlerError> {
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| HandlerError::new("gated", e.to_string()))?;
            permit.forget();
            Ok(())
        }

        fn name(&self) -> &'static str {
            "gated"
        }
    }

    #[tokio::test]
    async fn test_one_message_in_flight_per_queue() {
        let broker = MemoryBroker::new();
        let processor = Arc::new(GatedProcessor {
            gate: Semaphore::new(0),
        });
        let (tx, handle) = spawn_consumer(&broker, processor.clone());
        wait_until(|| broker.has_queue(NORMAL)).await;

        for i in 0..3 {
            broker.push_raw(NORMAL, TestEvent::new(Priority::Normal, format!("n{i}")).to_bytes());
        }
        wait_until(|| broker.unacked_count() == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.unacked_count(), 1);
        assert_eq!(broker.queue_depth(NORMAL), 2);

        processor.gate.add_permits(3);
        wait_until(|| broker.queue_depth(NORMAL) == 0 && broker.unacked_count() == 0).await;

        stop(tx, handle).await;
    }

    #[tokio::test]
    async fn test_resubscribes_after_connection_loss() {
        let broker = MemoryBroker::new();
        let processor = Arc::new(RecordingProcessor::default());
        let (tx, handle) = spawn_consumer(&broker, processor.clone());
        wait_until(|| broker.has_queue(NORMAL) && broker.open_connections() == 1).await;

        broker.drop_connections();
        broker.push_raw(NORMAL, TestEvent::new(Priority::Normal, "after drop").to_bytes());

        wait_until(|| processor.seen().len() == 1).await;
        assert_eq!(broker.connect_attempts(), 2);

        stop(tx, handle).await;
        assert_eq!(broker.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_permanent_connect_failure_stops_consumer() {
        let broker = MemoryBroker::new();
        broker.inject_connect_errors([crate::error::BrokerError::AccessRefused(
            "bad credentials".into(),
        )]);
        let consumer = EventConsumer::new(
            manager(&broker),
            Arc::new(RecordingProcessor::default()),
            &config(),
        );
        let (_tx, rx) = watch::channel(false);

        let err = consumer.run(rx).await.unwrap_err();

        assert_eq!(err.class(), ErrorClass::Permanent);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_is_clean() {
        let broker = MemoryBroker::new();
        let consumer = EventConsumer::new(
            manager(&broker),
            Arc::new(RecordingProcessor::default()),
            &config(),
        );
        let (_tx, rx) = watch::channel(true);

        consumer.run(rx).await.unwrap();

        assert_eq!(broker.connect_attempts(), 0);
    }
}
