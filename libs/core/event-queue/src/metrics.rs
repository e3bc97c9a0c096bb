//! Prometheus metrics for the publish/consume pipeline
//!
//! Fire-and-forget: nothing on the publish or consume path depends on these.

use crate::event::Priority;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing::{info, warn};

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Initialize Prometheus metrics
///
/// Call this once at startup. Subsequent calls are no-ops. If another recorder is
/// already installed, metrics are left to it and [`render_metrics`] returns nothing.
pub fn init_metrics() {
    let _ = PROMETHEUS_HANDLE.get_or_try_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .inspect(|_| info!("Prometheus metrics initialized"))
            .inspect_err(|e| warn!(error = %e, "Failed to install Prometheus recorder"))
    });
}

/// Get the Prometheus handle for rendering metrics
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

/// Render metrics in Prometheus format
pub fn render_metrics() -> String {
    prometheus_handle()
        .map(|h| h.render())
        .unwrap_or_default()
}

/// Publish metrics, labeled per event
pub struct PublishMetrics {
    event_type: &'static str,
    priority: Priority,
}

impl PublishMetrics {
    pub fn new(event_type: &'static str, priority: Priority) -> Self {
        Self {
            event_type,
            priority,
        }
    }

    fn record(&self, status: &'static str, duration: Duration) {
        counter!(
            "event_queue_publish_total",
            "event_type" => self.event_type,
            "priority" => self.priority.to_string(),
            "status" => status
        )
        .increment(1);

        histogram!(
            "event_queue_publish_duration_seconds",
            "event_type" => self.event_type,
            "priority" => self.priority.to_string()
        )
        .record(duration.as_secs_f64());
    }

    pub fn succeeded(&self, duration: Duration) {
        self.record("success", duration);
    }

    pub fn failed(&self, duration: Duration) {
        self.record("failure", duration);
    }

    pub fn retried(&self) {
        counter!(
            "event_queue_publish_retries_total",
            "event_type" => self.event_type
        )
        .increment(1);
    }
}

/// Connection status metrics for one connection manager
#[derive(Clone)]
pub struct ConnectionMetrics {
    connection: String,
}

impl ConnectionMetrics {
    pub fn new(connection: impl Into<String>) -> Self {
        Self {
            connection: connection.into(),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        gauge!(
            "event_queue_connection_status",
            "connection" => self.connection.clone()
        )
        .set(if connected { 1.0 } else { 0.0 });
    }

    pub fn reconnected(&self) {
        counter!(
            "event_queue_reconnections_total",
            "connection" => self.connection.clone()
        )
        .increment(1);
    }
}

/// Consumer metrics for one queue subscription
#[derive(Clone)]
pub struct ConsumerMetrics {
    queue: String,
}

impl ConsumerMetrics {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }

    pub fn received(&self) {
        counter!(
            "event_queue_messages_received_total",
            "queue" => self.queue.clone()
        )
        .increment(1);
    }

    pub fn acked(&self, duration: Duration) {
        counter!(
            "event_queue_messages_acked_total",
            "queue" => self.queue.clone()
        )
        .increment(1);

        histogram!(
            "event_queue_message_duration_seconds",
            "queue" => self.queue.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn rejected(&self, reason: &'static str) {
        counter!(
            "event_queue_messages_rejected_total",
            "queue" => self.queue.clone(),
            "reason" => reason
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let publish = PublishMetrics::new("logging.event", Priority::High);
        publish.succeeded(Duration::from_millis(3));
        publish.failed(Duration::from_millis(3));
        publish.retried();

        let connection = ConnectionMetrics::new("publisher");
        connection.set_connected(true);
        connection.reconnected();

        let consumer = ConsumerMetrics::new("events-normal-priority");
        consumer.received();
        consumer.acked(Duration::from_millis(1));
        consumer.rejected("parse_failed");
    }

    #[test]
    fn test_render_after_init() {
        init_metrics();
        init_metrics();
        PublishMetrics::new("licensing.create", Priority::Normal).succeeded(Duration::ZERO);

        if prometheus_handle().is_some() {
            assert!(render_metrics().contains("event_queue_publish_total"));
        }
    }
}
