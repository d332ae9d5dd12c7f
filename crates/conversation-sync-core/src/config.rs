//! Tuning for subscriptions, sends, and echo reconciliation.

use std::time::Duration;

use crate::backoff::RetryPolicy;

/// Sync core configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Largest gap between an echo's local issue time and a committed
    /// message's `createdAt` for the two to be treated as the same send.
    pub echo_match_window: Duration,
    /// Retries for appending a message. Only connectivity failures retry.
    pub send_retry: RetryPolicy,
    /// Retries for the conversation summary update after a committed append.
    pub summary_retry: RetryPolicy,
    /// Resubscribe policy for live views after a transient failure.
    pub subscription_retry: RetryPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            echo_match_window: Duration::from_secs(60),
            send_retry: RetryPolicy {
                base: Duration::from_millis(200),
                max: Duration::from_secs(2),
                max_attempts: 3,
            },
            summary_retry: RetryPolicy {
                base: Duration::from_millis(500),
                max: Duration::from_secs(8),
                max_attempts: 5,
            },
            subscription_retry: RetryPolicy {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
                max_attempts: 8,
            },
        }
    }
}
