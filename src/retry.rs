//! Bounded retries with exponential backoff.
//!
//! The wait before attempt `n + 1` is `delay_ms * 1.5^(n - 1)`. Sleeping goes
//! through the [`Sleeper`] capability so tests can record delays instead of
//! waiting for them.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::SourceError;

const BACKOFF_FACTOR: f64 = 1.5;

/// Something that can suspend the current task for a while.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Retry behavior for one kind of operation (batch query, detail fetch, ...).
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempts including the first one. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub delay_ms: u64,
    /// Decides whether a failure is worth another attempt.
    /// Falls back to [`SourceError::is_retryable`] when unset.
    pub should_retry: Option<fn(&SourceError) -> bool>,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
            should_retry: None,
        }
    }

    pub fn with_predicate(mut self, should_retry: fn(&SourceError) -> bool) -> Self {
        self.should_retry = Some(should_retry);
        self
    }

    /// Backoff after `completed` failed attempts (1-based).
    pub fn backoff(&self, completed: u32) -> Duration {
        let exponent = completed.saturating_sub(1) as i32;
        let millis = self.delay_ms as f64 * BACKOFF_FACTOR.powi(exponent);
        Duration::from_millis(millis.round() as u64)
    }

    fn allows_retry(&self, err: &SourceError) -> bool {
        match self.should_retry {
            Some(predicate) => predicate(err),
            None => err.is_retryable(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, 1000)
    }
}

/// Runs fallible async operations under a [`RetryConfig`].
#[derive(Clone)]
pub struct Retrier {
    sleeper: Arc<dyn Sleeper>,
}

impl Retrier {
    pub fn new() -> Self {
        Self {
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper }
    }

    /// Attempts `operation` until it succeeds, the predicate rejects the
    /// failure, or `max_attempts` is exhausted. The last error is returned.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        config: &RetryConfig,
        mut operation: F,
    ) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let max_attempts = config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    if attempt >= max_attempts || !config.allows_retry(&err) {
                        error!(label, attempt, error = %err, "giving up");
                        return Err(err);
                    }

                    let delay = config.backoff(attempt);
                    warn!(
                        label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    self.sleeper.sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for Retrier {
    fn default() -> Self {
        Self::new()
    }
}
