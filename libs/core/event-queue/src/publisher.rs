//! Event publisher
//!
//! Routes each event to the queue for its priority, as a persistent JSON message whose
//! message id is the event id. Every publish runs under the publish retry policy:
//!
//! - permanent failures abort after the first attempt
//! - transient and unknown failures drop the held channel and retry through a fresh
//!   connect, so a half-dead channel is never reused

use crate::broker::MessageProperties;
use crate::classifier::ErrorClass;
use crate::config::QueueConfig;
use crate::connection::{ConnectionManager, SessionHandle};
use crate::error::QueueError;
use crate::event::QueueEvent;
use crate::metrics::PublishMetrics;
use crate::retry::{AttemptError, retry_with_backoff};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct EventPublisher {
    connection: Arc<ConnectionManager>,
    config: QueueConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl EventPublisher {
    pub fn new(connection: Arc<ConnectionManager>, config: &QueueConfig) -> Self {
        Self {
            connection,
            config: config.clone(),
            shutdown: None,
        }
    }

    /// Stop backing off between publish attempts once shutdown is signalled
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Publish one event, retrying transient failures.
    ///
    /// The payload is encoded once, so every attempt carries the same bytes and the same
    /// message id.
    pub async fn publish<E: QueueEvent>(&self, event: &E) -> Result<(), QueueError> {
        let event_type = event.event_type();
        let priority = event.priority();
        let queue = self.config.queue_for(priority);
        let metrics = PublishMetrics::new(event_type, priority);
        let started = Instant::now();

        let payload = serde_json::to_vec(event)?;
        let properties = MessageProperties::json()
            .with_timestamp(event.timestamp())
            .with_message_id(event.event_id().to_string());

        let retry = &self.config.publish_retry;
        let result = retry_with_backoff(retry, self.shutdown.clone(), |attempt| {
            let payload = payload.as_slice();
            let properties = &properties;
            let metrics = &metrics;
            async move {
                let outcome = match self.connection.ensure_session().await {
                    Ok(session) => self
                        .try_publish(&session, queue, payload, properties)
                        .await
                        .map_err(|err| (Some(session.generation), err)),
                    Err(err) => Err((None, err)),
                };

                outcome.map_err(|(generation, err)| match err.class() {
                    ErrorClass::Permanent => AttemptError::Abort(err),
                    class => {
                        warn!(
                            event_type,
                            queue,
                            attempt,
                            class = %class,
                            error = %err,
                            "Publish attempt failed, reconnecting"
                        );
                        if let Some(generation) = generation {
                            self.connection.invalidate_if(generation);
                        }
                        metrics.retried();
                        AttemptError::Retry(err)
                    }
                })
            }
        })
        .await
        .map_err(QueueError::from);

        match &result {
            Ok(()) => {
                metrics.succeeded(started.elapsed());
                info!(
                    event_id = %event.event_id(),
                    "Published {event_type} event to {queue}"
                );
            }
            Err(err) => {
                metrics.failed(started.elapsed());
                error!(
                    event_id = %event.event_id(),
                    event_type,
                    queue,
                    error = %err,
                    "Failed to publish event"
                );
            }
        }
        result
    }

    async fn try_publish(
        &self,
        session: &SessionHandle,
        queue: &str,
        payload: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), QueueError> {
        if session.channel.publish(queue, payload, properties).await? {
            Ok(())
        } else {
            Err(QueueError::NotAccepted {
                queue: queue.to_string(),
            })
        }
    }

    /// Close the publisher's connection
    pub async fn close(&self) -> Result<(), QueueError> {
        self.connection.disconnect().await
    }
}
