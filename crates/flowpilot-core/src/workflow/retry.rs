//! Retry policy for step execution.
//!
//! A step's `retry_count` is the number of re-attempts allowed after the
//! first attempt fails, so a step runs at most `retry_count + 1` times.
//! The wait before re-attempt `n` grows linearly: `backoff_base * n`.

use std::time::Duration;

use flowpilot_types::config::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(backoff_base: Duration) -> Self {
        Self { backoff_base }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(Duration::from_millis(config.retry_backoff_base_ms))
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32, retry_count: u32) -> bool {
        attempt <= retry_count
    }

    /// Upper bound on attempts for a step.
    pub fn max_attempts(retry_count: u32) -> u32 {
        retry_count.saturating_add(1)
    }

    /// Delay before the re-attempt that follows failed attempt `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}
