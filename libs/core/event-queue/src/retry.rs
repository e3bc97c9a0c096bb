use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Exponential backoff policy
///
/// The delay before retry `a` (1-indexed) is
/// `min(max_timeout, min_timeout * factor^(a-1))`. With `randomize` set the delay is
/// stretched by a uniform factor in `[1, 2)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = retries + 1)
    pub retries: u32,

    /// Exponential multiplier
    pub factor: f64,

    /// Floor for the per-attempt delay
    pub min_timeout: Duration,

    /// Ceiling for the per-attempt delay
    pub max_timeout: Duration,

    /// Whether jitter is applied
    pub randomize: bool,
}

impl RetryConfig {
    /// Policy for establishing a broker connection
    ///
    /// 10 retries, factor 2, 2s..60s, jittered.
    pub fn connection() -> Self {
        Self {
            retries: 10,
            factor: 2.0,
            min_timeout: Duration::from_secs(2),
            max_timeout: Duration::from_secs(60),
            randomize: true,
        }
    }

    /// Policy for publishing on a request path
    ///
    /// 5 retries, factor 2, 1s..30s, jittered.
    pub fn publish() -> Self {
        Self {
            retries: 5,
            factor: 2.0,
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(30),
            randomize: true,
        }
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_min_timeout(mut self, timeout: Duration) -> Self {
        self.min_timeout = timeout;
        self
    }

    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    /// Disable jitter
    pub fn without_jitter(mut self) -> Self {
        self.randomize = false;
        self
    }

    /// Total attempts including the first one
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Delay before retry `attempt` without jitter
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let min_ms = self.min_timeout.as_millis() as f64;
        let max_ms = self.max_timeout.as_millis() as f64;
        let delay_ms = (min_ms * self.factor.powi(exponent)).min(max_ms);
        Duration::from_millis(delay_ms as u64)
    }

    /// Delay before retry `attempt`, jittered when `randomize` is set
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if !self.randomize {
            return base;
        }

        let base_ms = base.as_millis() as u64;
        if base_ms == 0 {
            return base;
        }
        Duration::from_millis(base_ms + rand::random_range(0..base_ms))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::publish()
    }
}

/// Outcome of one failed attempt
#[derive(Debug)]
pub enum AttemptError<E> {
    /// Worth another attempt after backing off
    Retry(E),
    /// Stop now and hand the error to the caller
    Abort(E),
}

/// Why [`retry_with_backoff`] gave up
#[derive(Debug)]
pub enum RetryError<E> {
    /// The operation asked to stop
    Aborted(E),
    /// Every attempt failed; `last` is the final failure
    Exhausted { attempts: u32, last: E },
    /// Shutdown was signalled while backing off
    Cancelled,
}

/// Resolves once the shutdown flag is set. Never resolves if the sender is gone.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleep for `delay`, returning `true` if shutdown interrupted it
async fn backoff(delay: Duration, shutdown: &mut Option<watch::Receiver<bool>>) -> bool {
    match shutdown {
        Some(rx) => tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = shutdown_requested(rx) => true,
        },
        None => {
            tokio::time::sleep(delay).await;
            false
        }
    }
}

/// Retry an async operation with exponential backoff
///
/// `operation` receives the 1-indexed attempt number. It reports each failure as either
/// [`AttemptError::Retry`] or [`AttemptError::Abort`]. The optional `shutdown` receiver
/// cancels the loop while it sleeps between attempts.
///
/// # Example
/// ```ignore
/// let result = retry_with_backoff(&RetryConfig::publish(), None, |attempt| async move {
///     send().await.map_err(|e| if e.class().is_retryable() {
///         AttemptError::Retry(e)
///     } else {
///         AttemptError::Abort(e)
///     })
/// })
/// .await;
/// ```
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    mut shutdown: Option<watch::Receiver<bool>>,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError<E>>>,
    E: Display,
{
    let max_attempts = config.max_attempts();
    let mut attempt = 1;

    loop {
        match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "Operation succeeded after retrying");
                }
                return Ok(value);
            }
            Err(AttemptError::Abort(err)) => {
                debug!(attempt, error = %err, "Operation aborted, not retrying");
                return Err(RetryError::Aborted(err));
            }
            Err(AttemptError::Retry(err)) => {
                if attempt >= max_attempts {
                    warn!(attempts = attempt, error = %err, "Operation failed, retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }

                let delay = config.delay_for_attempt(attempt);
                debug!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Operation failed, backing off"
                );

                if backoff(delay, &mut shutdown).await {
                    debug!(attempt, "Retry cancelled by shutdown");
                    return Err(RetryError::Cancelled);
                }
                attempt += 1;
            }
        }
    }
}
