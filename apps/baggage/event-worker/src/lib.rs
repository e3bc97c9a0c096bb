//! Event Worker
//!
//! Drains the priority queues and hands each event to its domain handler.
//!
//! ## Architecture
//!
//! ```text
//! events-high-priority ─┐
//!                       ├─► EventConsumer<Event, EventDispatcher>  (prefetch 1 per queue)
//! events-normal-priority┘          │
//!                                  ├─ ok      → ack
//!                                  └─ failure → nack (no requeue) → dlx → events-dead-letter
//! ```
//!
//! ## Features
//!
//! - Single-flight reconnect with the connection retry policy
//! - Resubscribes after a lost connection
//! - Graceful shutdown bounded to 10 seconds
//! - Health, readiness and metrics endpoints for Kubernetes probes

use core_config::{Environment, FromEnv, app_info, env_parse};
use domain_events::{Event, EventDispatcher, TracingHandlers};
use event_queue::{
    AmqpConnector, ConnectionManager, EventConsumer, HealthState, QueueConfig, health_router,
    metrics,
};
use eyre::{Result, WrapErr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_HEALTH_PORT: u16 = 8081;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);
const FORCED_DISCONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Health server port: `WORKER_HEALTH_PORT`, then `HEALTH_PORT`, then 8081
fn health_port() -> Result<u16> {
    let fallback = env_parse("HEALTH_PORT", DEFAULT_HEALTH_PORT)?;
    Ok(env_parse("WORKER_HEALTH_PORT", fallback)?)
}

/// Start the health HTTP server
///
/// Provides endpoints for:
/// - Liveness probes: `/health`, `/healthz`
/// - Readiness probes: `/ready`, `/readyz`
/// - Queue topology: `/queues`
/// - Prometheus metrics: `/metrics`
async fn start_health_server(health_state: HealthState, port: u16) -> Result<()> {
    let app = health_router(health_state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the event worker
///
/// 1. Sets up structured logging (JSON for prod, pretty for dev)
/// 2. Loads the queue configuration
/// 3. Starts the health server
/// 4. Consumes until SIGINT/SIGTERM, then disconnects within the shutdown bound
///
/// # Errors
///
/// Returns an error if:
/// - Configuration is invalid
/// - The broker is unreachable (permanent failure or connection retries exhausted)
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();

    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    metrics::init_metrics();

    let app_info = app_info!();
    info!(name = %app_info.name, version = %app_info.version, "Starting event worker");
    info!("Environment: {:?}", environment);

    let health_port = health_port()?;
    let config = QueueConfig::from_env().wrap_err("Failed to load queue configuration")?;
    info!(
        high = %config.high_priority_queue,
        normal = %config.normal_priority_queue,
        dead_letter = %config.dead_letter_queue,
        "Queue configuration loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let connection = Arc::new(
        ConnectionManager::new("consumer", &config, Arc::new(AmqpConnector::new()))
            .with_shutdown(shutdown_rx.clone()),
    );

    let health_state = HealthState::new(
        connection.clone(),
        app_info.name,
        app_info.version,
        &config,
    );
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            error!(error = %e, "Health server failed");
        }
    });

    let dispatcher = Arc::new(EventDispatcher::new(TracingHandlers));
    let consumer = EventConsumer::<Event, _>::new(connection.clone(), dispatcher, &config);

    let consuming = consumer.run(shutdown_rx.clone());
    tokio::pin!(consuming);

    let mut shutdown = shutdown_rx;
    tokio::select! {
        result = &mut consuming => {
            result.wrap_err("Event consumer failed")?;
        }
        _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut consuming).await {
                Ok(result) => result.wrap_err("Event consumer failed during shutdown")?,
                Err(_) => {
                    warn!(timeout = ?SHUTDOWN_TIMEOUT, "Shutdown timeout, forcing disconnect");
                    force_disconnect(&connection).await;
                }
            }
        }
    }

    info!("Event worker stopped");
    Ok(())
}

/// Close the consumer's connection once the consumer has overrun the shutdown bound
async fn force_disconnect(connection: &ConnectionManager) {
    match tokio::time::timeout(FORCED_DISCONNECT_TIMEOUT, connection.disconnect()).await {
        Ok(Ok(())) => info!("Consumer connection closed"),
        Ok(Err(e)) => warn!(error = %e, "Error closing consumer connection"),
        Err(_) => warn!(
            timeout = ?FORCED_DISCONNECT_TIMEOUT,
            "Timed out closing consumer connection"
        ),
    }
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() -> Result<()> {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .wrap_err("Failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .wrap_err("Failed to install SIGTERM handler")?;
        sigterm.recv().await;
        Ok::<(), eyre::Report>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    tokio::select! {
        result = ctrl_c => {
            result?;
            info!("Received Ctrl+C, initiating shutdown...");
        },
        result = terminate => {
            result?;
            info!("Received SIGTERM, initiating shutdown...");
        },
    }

    Ok(())
}
