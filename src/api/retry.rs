//! Backoff schedule for planning service requests.

use std::time::Duration;

use rand::Rng;

/// Timing limits for one logical request and its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Timeout of a single HTTP exchange.
    pub request_timeout: Duration,
    /// Budget for all attempts together. Exceeding it yields
    /// [`super::ApiError::RetryTimeout`].
    pub deadline: Duration,
    /// Delay before the first retry; doubled on every further retry.
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            deadline: Duration::from_secs(130),
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), jittered by up to
    /// 25% in either direction and capped at [`Self::max_delay`].
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        base.mul_f64(jitter).min(self.max_delay)
    }
}
