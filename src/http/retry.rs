//! Retry backoff policy.

use std::time::Duration;

/// Exponential backoff with proportional jitter, applied between transport
/// retry attempts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first. Default: 3.
    pub max_retries: u32,
    /// Base delay before the first retry. Default: 1s.
    pub base_delay: Duration,
    /// Upper bound on the computed delay, before jitter. Default: 30s.
    pub max_delay: Duration,
    /// Exponential growth factor. Default: 2.0.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before retrying after `attempt` (1-based):
    /// `min(base · multiplier^(attempt-1), max) + U(0, 0.1·delay)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential =
            self.base_delay.as_millis() as f64 * self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let capped = exponential.min(self.max_delay.as_millis() as f64);
        let jitter = capped * 0.1 * rand::random::<f64>();
        Duration::from_millis((capped + jitter) as u64)
    }
}
