//! Bounded exponential backoff for store calls.
//!
//! Delay after the n-th failed attempt is `base * 2^(n-1)`, capped at `max`:
//! with a 500ms base that is 500ms, 1s, 2s, 4s and so on.

use std::future::Future;
use std::time::Duration;

use doc_store::{StoreError, StoreResult};
use tracing::{debug, warn};

/// How many times to try a call and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Total attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// A single attempt with no retries.
    pub fn once() -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            max_attempts: 1,
        }
    }

    /// Delay after the given failed attempt (1-indexed). Zero for attempt 0.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let base_ms = self.base.as_millis() as u64;
        let max_ms = self.max.as_millis() as u64;
        let multiplier = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        Duration::from_millis(base_ms.saturating_mul(multiplier).min(max_ms))
    }

    /// True if another attempt is allowed after `attempt` failures.
    pub fn allows_retry_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts. Returns the last error in the latter cases.
///
/// Only connectivity failures are retried, so this is safe for writes that
/// must not apply twice (appends).
pub async fn retry_store_call<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &'static str,
    op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    retry_with(policy, op_name, StoreError::is_retryable, op).await
}

/// Like [`retry_store_call`], for idempotent writes: every error except
/// `PermissionDenied` and `InvalidArgument` is retried.
pub async fn retry_idempotent_store_call<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &'static str,
    op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    retry_with(policy, op_name, StoreError::is_retryable_when_idempotent, op).await
}

async fn retry_with<T, F, Fut>(
    policy: &RetryPolicy,
    op_name: &'static str,
    retryable: fn(&StoreError) -> bool,
    mut op: F,
) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op = op_name, attempt, "store call succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if retryable(&error) && policy.allows_retry_after(attempt) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "store call failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(error) => {
                if retryable(&error) {
                    warn!(op = op_name, attempt, error = %error, "store call retries exhausted");
                }
                return Err(error);
            }
        }
    }
}
