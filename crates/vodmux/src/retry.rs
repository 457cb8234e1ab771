//! Backoff between fetch attempts.
//!
//! An attempt is repeated only when its error is transient according to
//! [`Error::is_retryable`]. The schedule (attempt budget, base wait, cap,
//! jitter) comes straight from [`FetcherConfig`].

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::FetcherConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, the first one included.
    attempts: u32,
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl From<&FetcherConfig> for Backoff {
    fn from(config: &FetcherConfig) -> Self {
        Self {
            attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.retry_base_delay_ms),
            cap: Duration::from_millis(config.retry_max_delay_ms),
            jitter: config.retry_jitter,
        }
    }
}

impl Backoff {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Wait after the `failed`-th failed attempt. The window doubles from
    /// `base` and is clamped to `cap`; with jitter the wait lands somewhere in
    /// the upper half of the window.
    pub fn wait_after(&self, failed: u32) -> Duration {
        let doublings = failed.saturating_sub(1).min(31);
        let window = self.base.saturating_mul(1 << doublings).min(self.cap);
        if !self.jitter {
            return window;
        }

        let floor = window / 2;
        let spread_ms = u64::try_from((window - floor).as_millis()).unwrap_or(u64::MAX);
        if spread_ms == 0 {
            return window;
        }
        floor + Duration::from_millis(rand::rng().random_range(0..=spread_ms))
    }
}

/// Drive `attempt` (called with the 1-based attempt number) until it
/// succeeds, fails permanently, runs out of attempts, or `token` fires.
pub async fn retry<T, F, Fut>(backoff: &Backoff, token: &CancellationToken, attempt: F) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut failed = 0;
    loop {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let err = match attempt(failed + 1).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        failed += 1;
        if !err.is_retryable() || failed >= backoff.attempts {
            return Err(err);
        }

        let wait = backoff.wait_after(failed);
        warn!(
            attempt = failed,
            of = backoff.attempts,
            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Transient fetch failure, backing off"
        );
        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
