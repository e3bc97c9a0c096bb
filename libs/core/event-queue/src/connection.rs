//! Broker connection lifecycle
//!
//! A [`ConnectionManager`] exclusively owns one connection and one channel on it. The
//! publisher and the consumer each get their own manager.
//!
//! - `connect()` opens connection + channel + topology as one retried sequence
//! - `ensure_connected()` is the single-flight fast path used before every operation
//! - a close hook clears the held session when the broker drops the connection
//! - `invalidate_if()` drops a session only while it is still the one that failed

use crate::broker::{BrokerChannel, BrokerConnection, BrokerConnector};
use crate::classifier::ErrorClass;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::metrics::ConnectionMetrics;
use crate::retry::{AttemptError, RetryConfig, retry_with_backoff};
use crate::topology::Topology;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
struct Session {
    generation: u64,
    connection: Arc<dyn BrokerConnection>,
    channel: Arc<dyn BrokerChannel>,
}

impl Session {
    fn is_live(&self) -> bool {
        self.connection.is_connected() && self.channel.is_open()
    }
}

/// A live channel tagged with the session it belongs to.
///
/// Pass `generation` back to [`ConnectionManager::invalidate_if`] when an operation on
/// the channel fails.
#[derive(Clone)]
pub struct SessionHandle {
    pub generation: u64,
    pub channel: Arc<dyn BrokerChannel>,
}

impl Session {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            generation: self.generation,
            channel: self.channel.clone(),
        }
    }
}

type SessionSlot = Arc<RwLock<Option<Session>>>;

fn write_slot(slot: &RwLock<Option<Session>>) -> RwLockWriteGuard<'_, Option<Session>> {
    slot.write().unwrap_or_else(PoisonError::into_inner)
}

/// Owns a broker connection and channel and keeps them alive on demand
pub struct ConnectionManager {
    name: String,
    url: String,
    topology: Topology,
    connector: Arc<dyn BrokerConnector>,
    retry: RetryConfig,
    session: SessionSlot,
    /// Serializes connect sequences
    connect_lock: Mutex<()>,
    /// Bumped for every session so stale close hooks are ignored
    generation: AtomicU64,
    /// Connect sequences that ran to completion, successful or not
    completed_connects: AtomicU64,
    shutdown: Option<watch::Receiver<bool>>,
    metrics: ConnectionMetrics,
}

impl ConnectionManager {
    /// Create a manager; nothing is opened until the first `connect()`.
    ///
    /// `name` labels logs and metrics (e.g. "publisher", "consumer").
    pub fn new(
        name: impl Into<String>,
        config: &QueueConfig,
        connector: Arc<dyn BrokerConnector>,
    ) -> Self {
        let name = name.into();
        Self {
            metrics: ConnectionMetrics::new(name.clone()),
            name,
            url: config.url.clone(),
            topology: Topology::from_config(config),
            connector,
            retry: config.connection_retry.clone(),
            session: Arc::new(RwLock::new(None)),
            connect_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            completed_connects: AtomicU64::new(0),
            shutdown: None,
        }
    }

    /// Abort connection retries when shutdown is signalled
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a live connection and channel are held right now
    pub fn is_connected(&self) -> bool {
        self.live_session().is_some()
    }

    /// The held channel, if it is still open
    pub fn channel(&self) -> Option<Arc<dyn BrokerChannel>> {
        self.live_session().map(|handle| handle.channel)
    }

    fn live_session(&self) -> Option<SessionHandle> {
        let guard = self.session.read().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|session| session.is_live())
            .map(Session::handle)
    }

    /// Return the live channel, connecting first if needed
    pub async fn ensure_connected(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        self.ensure_session().await.map(|handle| handle.channel)
    }

    /// Return the live session, connecting first if needed.
    ///
    /// Concurrent callers share one connect sequence: the first performs it, the rest
    /// wait on the lock and re-check. A waiter that finds the sequence finished without
    /// a live channel gets [`QueueError::NotConnected`] rather than starting another one.
    pub async fn ensure_session(&self) -> Result<SessionHandle, QueueError> {
        if let Some(handle) = self.live_session() {
            return Ok(handle);
        }

        let observed = self.completed_connects.load(Ordering::SeqCst);
        let _guard = self.connect_lock.lock().await;

        if let Some(handle) = self.live_session() {
            return Ok(handle);
        }
        if self.completed_connects.load(Ordering::SeqCst) != observed {
            debug!(connection = %self.name, "Concurrent connect attempt failed");
            return Err(QueueError::NotConnected);
        }

        self.connect_locked().await
    }

    /// Open connection, channel and topology, retrying transient failures.
    ///
    /// Any held session is replaced.
    pub async fn connect(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        let _guard = self.connect_lock.lock().await;
        self.connect_locked().await.map(|handle| handle.channel)
    }

    async fn connect_locked(&self) -> Result<SessionHandle, QueueError> {
        if let Some(stale) = self.take_session() {
            Self::close_in_background(stale);
        }

        let result = retry_with_backoff(&self.retry, self.shutdown.clone(), |attempt| async move {
            self.open_session().await.map_err(|err| match err.class() {
                ErrorClass::Permanent => {
                    error!(connection = %self.name, attempt, error = %err, "Broker connection failed permanently");
                    AttemptError::Abort(err)
                }
                class => {
                    warn!(connection = %self.name, attempt, class = %class, error = %err, "Broker connection attempt failed");
                    AttemptError::Retry(err)
                }
            })
        })
        .await
        .map_err(QueueError::from);
        self.completed_connects.fetch_add(1, Ordering::SeqCst);

        match &result {
            Ok(_) => {
                info!(connection = %self.name, "Connected to broker");
                self.metrics.set_connected(true);
                if self.generation.load(Ordering::SeqCst) > 1 {
                    self.metrics.reconnected();
                }
            }
            Err(err) => {
                error!(connection = %self.name, error = %err, "Unable to connect to broker");
                self.metrics.set_connected(false);
            }
        }
        result
    }

    async fn open_session(&self) -> Result<SessionHandle, QueueError> {
        let connection = self.connector.connect(&self.url).await?;

        let channel = match connection.create_channel().await {
            Ok(channel) => channel,
            Err(err) => {
                let _ = connection.close().await;
                return Err(err.into());
            }
        };

        if let Err(err) = self.topology.declare(channel.as_ref()).await {
            let _ = connection.close().await;
            return Err(err);
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = Arc::clone(&self.session);
        let name = self.name.clone();
        let metrics = self.metrics.clone();
        connection.on_close(Box::new(move |err| {
            let mut guard = write_slot(&slot);
            if guard.as_ref().is_some_and(|s| s.generation == generation) {
                *guard = None;
                metrics.set_connected(false);
                warn!(connection = %name, error = %err, "Broker connection lost");
            }
        }));

        let session = Session {
            generation,
            connection,
            channel,
        };
        let handle = session.handle();
        *write_slot(&self.session) = Some(session);
        Ok(handle)
    }

    fn take_session(&self) -> Option<Session> {
        write_slot(&self.session).take()
    }

    fn close_in_background(session: Session) {
        tokio::spawn(async move {
            let _ = session.channel.close().await;
            let _ = session.connection.close().await;
        });
    }

    /// Drop the held session if it is still `generation`, so the next operation
    /// reconnects from scratch.
    ///
    /// A failure reported against an older session is ignored: that session is already
    /// gone and the one held now may be serving other callers. The dropped connection is
    /// closed in the background.
    pub fn invalidate_if(&self, generation: u64) {
        let stale = {
            let mut guard = write_slot(&self.session);
            if guard.as_ref().is_some_and(|s| s.generation == generation) {
                guard.take()
            } else {
                None
            }
        };

        match stale {
            Some(session) => {
                debug!(connection = %self.name, generation, "Invalidating broker session");
                self.metrics.set_connected(false);
                Self::close_in_background(session);
            }
            None => {
                debug!(connection = %self.name, generation, "Session already replaced, keeping current one");
            }
        }
    }

    /// Close channel then connection.
    ///
    /// State is cleared even when closing fails; the first failure is returned.
    pub async fn disconnect(&self) -> Result<(), QueueError> {
        let Some(session) = self.take_session() else {
            debug!(connection = %self.name, "Disconnect requested with no open connection");
            return Ok(());
        };
        self.metrics.set_connected(false);

        let channel_result = session.channel.close().await;
        if let Err(err) = &channel_result {
            error!(connection = %self.name, error = %err, "Failed to close channel");
        }
        let connection_result = session.connection.close().await;
        if let Err(err) = &connection_result {
            error!(connection = %self.name, error = %err, "Failed to close connection");
        }

        channel_result.and(connection_result)?;
        info!(connection = %self.name, "Disconnected from broker");
        Ok(())
    }
}
