//! BAGgage API
//!
//! HTTP ingest surface for typed business events. Each accepted event is
//! validated and published to its priority queue; the event worker drains them.
//!
//! ## Endpoints
//!
//! - `POST /v1/events`: validate and queue an event (bearer key from `API_KEYS`)
//! - `GET /health`: liveness
//! - `GET /ready`: readiness, follows the publisher's broker connection
//! - `GET /metrics`: Prometheus text format

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod state;

use axum::Router;
use config::Config;
use core_config::tracing::{init_tracing, install_color_eyre};
use event_queue::{AmqpConnector, ConnectionManager, EventPublisher, metrics};
use eyre::{Result, WrapErr};
use middleware::ApiKeys;
use state::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info, warn};

/// Build the full router with middleware
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(api::routes(&state))
        .merge(api::health_router(state))
        .fallback(api::not_found)
        .layer(axum::middleware::from_fn(middleware::metrics_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(axum::middleware::from_fn(middleware::request_id))
}

/// Run the API server until SIGINT/SIGTERM
///
/// Connects the publisher before accepting traffic, so a broker that cannot be
/// reached (after the connection retry policy) stops startup.
pub async fn run() -> Result<()> {
    install_color_eyre();

    let config = Config::from_env()?;
    init_tracing(&config.environment);
    metrics::init_metrics();

    info!(name = %config.app.name, version = %config.app.version, "Starting BAGgage API");
    info!("Environment: {:?}", config.environment);

    if config.api_keys.is_empty() {
        warn!("No API keys configured, every event request will be rejected");
    } else {
        info!(keys = config.api_keys.len(), "API key authentication enabled");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            error!("Error waiting for shutdown signal: {}", e);
        }
        let _ = shutdown_tx.send(true);
    });

    let connection = Arc::new(
        ConnectionManager::new("publisher", &config.queue, Arc::new(AmqpConnector::new()))
            .with_shutdown(shutdown_rx.clone()),
    );
    connection
        .connect()
        .await
        .wrap_err("Failed to connect to the message broker")?;

    let publisher = Arc::new(
        EventPublisher::new(connection, &config.queue).with_shutdown(shutdown_rx.clone()),
    );
    let state = AppState::new(
        config.app.clone(),
        publisher.clone(),
        ApiKeys::new(&config.api_keys),
    );

    let listener = TcpListener::bind(config.server.address())
        .await
        .wrap_err_with(|| format!("Failed to bind to {}", config.server.address()))?;
    info!("Server listening on {}", listener.local_addr()?);
    info!("Event endpoint: POST /v1/events");

    let mut shutdown = shutdown_rx;
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .wrap_err("Server error")?;

    let shutdown_timeout = config.server.shutdown_timeout;
    info!(timeout = ?shutdown_timeout, "Server drained, closing publisher");
    match tokio::time::timeout(shutdown_timeout, publisher.close()).await {
        Ok(Ok(())) => info!("Graceful shutdown complete"),
        Ok(Err(e)) => warn!(error = %e, "Non-fatal error closing publisher"),
        Err(_) => warn!("Shutdown timeout, abandoning publisher close"),
    }

    Ok(())
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
