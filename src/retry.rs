//! Retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::debug;

/// How often, and how patiently, a fallible operation is re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: usize,
    /// Delay before the first retry; doubles on every further retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Policy for a whole candidate aggregation pass
    pub const fn aggregation() -> Self {
        Self::new(3, Duration::from_secs(4), Duration::from_secs(10))
    }

    /// Policy for a single candidate verification
    pub const fn verification() -> Self {
        Self::new(5, Duration::from_secs(5), Duration::from_secs(20))
    }

    /// Policy that runs the operation exactly once
    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delays between attempts: `base, 2*base, 4*base, ...` capped at `max_delay`
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let base_ms = self.base_delay.as_millis() as u64;
        // from_millis(2) yields 2, 4, 8...; the factor scales that so the first delay is `base`
        ExponentialBackoff::from_millis(2)
            .factor(base_ms / 2)
            .max_delay(self.max_delay)
            .take(self.max_attempts.saturating_sub(1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Run `action` until it succeeds, `should_retry` rejects the error, or the
/// policy runs out of attempts. The last error is returned on exhaustion.
pub async fn retry_with_backoff<T, E, A, Fut, C>(
    policy: &RetryPolicy,
    label: &str,
    action: A,
    mut should_retry: C,
) -> Result<T, E>
where
    A: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    C: FnMut(&E) -> bool,
{
    RetryIf::start(policy.delays(), action, |err: &E| {
        let retry = should_retry(err);
        debug!("{} attempt failed (retryable: {}): {}", label, retry, err);
        retry
    })
    .await
}
