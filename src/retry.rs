//! Opt-in retry for callers that talk to a device over a flaky link.
//!
//! [`SessionClient`](crate::SessionClient) surfaces every failure as-is. When
//! a Moku is reached over Wi-Fi it can drop off for a moment (access point
//! restart, roaming), so callers may wrap read-only calls such as `name` or
//! `get_data` in [`retry_async`] with
//! [`SessionError::is_retryable`](crate::SessionError::is_retryable) as the
//! predicate. Device-reported errors are never retryable. Wrapping
//! `claim_with(ClaimOptions::forced())` is not recommended: every attempt that
//! reaches the device evicts whoever owns it.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// How many times to try a call and how long to wait in between.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Attempts including the first; `0` is treated as `1`.
    pub max_attempts: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Three attempts, 200 ms then 400 ms apart, never more than 1 s.
    pub fn local_network() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(1),
        }
    }

    /// Pause after the failed `attempt` (1-based): the initial backoff doubled
    /// once per earlier failure, capped at `max_backoff`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16) as u32;
        self.initial_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::local_network()
    }
}

/// Calls `op` with the 1-based attempt number until it succeeds. The last
/// error is returned once attempts run out or `should_retry` declines it.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts && should_retry(&error) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    event = "retry_attempt_failed",
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
