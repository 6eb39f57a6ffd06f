//! Retry policy for transient transport failures.
//!
//! Policy (how many attempts, how long to wait) is separated from transport
//! mechanics: [`crate::client::NphiesClient`] consumes a `RetryPolicy` value
//! and owns only the send loop.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter.
///
/// Delays double from `base_delay` per retry, capped at `max_delay`, with up
/// to 250ms of random jitter added so that concurrent workers do not retry
/// in lockstep.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let scaled = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0..250);
        scaled + Duration::from_millis(jitter)
    }
}

/// Whether an HTTP status is worth retrying.
///
/// 5xx and 429 are transient; every 4xx is a deterministic rejection and is
/// never retried.
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}
