//! Retry policy and the attempt loop shared by every network call.
//!
//! A policy bounds a logical call to `max_attempts` tries. Each try runs
//! under its own timeout; a try that outlives it is dropped, which aborts the
//! underlying request. Between failed tries the loop sleeps for
//! `base_backoff * 2^attempt` plus a uniform jitter in `0..=max_jitter`,
//! where the jitter never exceeds `base_backoff` so that successive delays
//! do not shrink. There is no sleep after the final try.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default upper bound for the random jitter added to each backoff.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(300);

/// Per-call retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries including the first one. Values below 1 are treated as 1.
    pub max_attempts: u32,
    /// Timeout applied to each individual try.
    pub timeout: Duration,
    /// Delay before the second try; doubles for every further try.
    pub base_backoff: Duration,
    /// Upper bound of the uniform jitter added to every backoff, further
    /// capped at `base_backoff`.
    pub max_jitter: Duration,
    /// Whether HTTP 5xx responses are retried. 4xx never are.
    pub retry_server_errors: bool,
}

impl RetryPolicy {
    /// Create a policy from millisecond values with the default jitter.
    #[must_use]
    pub const fn new(max_attempts: u32, timeout_ms: u64, base_backoff_ms: u64) -> Self {
        Self {
            max_attempts,
            timeout: Duration::from_millis(timeout_ms),
            base_backoff: Duration::from_millis(base_backoff_ms),
            max_jitter: DEFAULT_MAX_JITTER,
            retry_server_errors: true,
        }
    }

    #[must_use]
    pub const fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    #[must_use]
    pub const fn with_server_error_retry(mut self, retry: bool) -> Self {
        self.retry_server_errors = retry;
        self
    }

    /// Number of tries this policy allows.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff before the try following failed try `attempt` (0-indexed),
    /// without jitter.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }

    /// Backoff plus random jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_jitter.min(self.base_backoff);
        let jitter_ms = u64::try_from(cap.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.backoff_for(attempt) + Duration::from_millis(jitter)
    }
}

/// Classification hooks the attempt loop needs from an error type.
pub trait RetryClassify: Sized {
    /// Whether another try may succeed.
    fn is_transient(&self, policy: &RetryPolicy) -> bool;

    /// Error produced when a try exceeds the policy timeout.
    fn timed_out() -> Self;

    /// Error produced when the caller cancels the operation.
    fn cancelled() -> Self;
}

/// Run `attempt_fn` under `policy`.
///
/// `attempt_fn` receives the 0-indexed try number. The loop stops at the
/// first success, at the first non-transient error, when the budget is
/// spent, or when `cancel` fires (including during a backoff sleep).
///
/// # Errors
///
/// Returns the last error once no further try is allowed.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    operation: &str,
    mut attempt_fn: F,
) -> Result<T, E>
where
    E: RetryClassify + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;

    loop {
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(E::cancelled()),
            outcome = tokio::time::timeout(policy.timeout, attempt_fn(attempt)) => {
                outcome.unwrap_or_else(|_| Err(E::timed_out()))
            }
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let transient = error.is_transient(policy);
        if !transient {
            return Err(error);
        }
        if attempt + 1 >= attempts {
            warn!(
                operation,
                attempts,
                error = %error,
                "Retry budget exhausted"
            );
            return Err(error);
        }

        let delay = policy.delay_for(attempt);
        warn!(
            operation,
            attempt = attempt + 1,
            max_attempts = attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %error,
            "Transient failure, retrying"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(E::cancelled()),
            () = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
