//! Retry policy with capped exponential backoff.
//!
//! Stateless: a `RetryPolicy` is plain configuration, and [`backoff_delay`]
//! is a free function over explicit parameters.

use std::time::Duration;

use taskweave_types::config::WorkflowConfig;

/// How many times a task may be re-attempted and how long to wait between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Policy from workflow defaults, with an optional per-task retry count.
    pub fn from_config(config: &WorkflowConfig, max_retries: Option<u32>) -> Self {
        Self {
            max_retries: max_retries.unwrap_or(config.default_max_retries),
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
        }
    }

    /// Total invocations allowed, first attempt included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Whether another attempt follows the failed attempt `attempt` (0-based).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    /// Wait before the attempt that follows `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, self.max_delay, attempt)
    }
}

/// `min(base * 2^attempt, max)`, saturating at `max` on overflow.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}
