//! Retry policy for outbound Bot API requests
//!
//! One policy object covers every request site: an attempt ceiling, an
//! exponential backoff that saturates to a long fixed delay, and
//! precedence for the server's own retry-after hint when it sends one.

use crate::error::Error;
use std::time::Duration;

/// Retry policy: attempt ceiling plus backoff schedule
///
/// With the defaults, a request failing transiently on every attempt is
/// tried 5 times with delays of 1s, 2s, 4s and 61s in between.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Base delay for the exponential schedule
    pub base_delay: Duration,

    /// Fixed delay used once the exponential schedule runs out
    pub saturated_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            saturated_delay: Duration::from_secs(61),
        }
    }
}

impl RetryPolicy {
    /// Whether a failed attempt should be retried
    pub fn should_retry(&self, err: &Error, attempt: u32) -> bool {
        attempt < self.max_attempts && err.is_transient()
    }

    /// Delay before the next attempt, after `attempt` failed (1-based)
    ///
    /// A server-provided retry-after hint takes precedence over the
    /// computed backoff, capped at the saturated delay. Without a hint
    /// the delay doubles from `base_delay` and saturates once the
    /// exponential schedule would exceed four times the base.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.saturated_delay);
        }

        let exp = self
            .base_delay
            .saturating_mul(1 << attempt.saturating_sub(1).min(30));
        if exp > self.base_delay.saturating_mul(4) {
            self.saturated_delay
        } else {
            exp
        }
    }
}
