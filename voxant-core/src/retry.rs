//! Exponential backoff policy for transient upstream failures.
//!
//! Base 1s doubling per attempt with random jitter, capped at three
//! attempts. Callers only sleep when the remaining stage budget still covers
//! the delay.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule for retryable upstream errors.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max_attempts: u32,
    /// Fraction of the computed delay added as random jitter (0.0 - 1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2.0,
            max_attempts: 3,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Delay before the given attempt (1-based). Attempt 1 waits the base.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base.as_secs_f64() * self.factor.powi(exp as i32);
        let jitter = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter) * raw
        } else {
            0.0
        };
        Duration::from_secs_f64(raw + jitter)
    }

    /// Whether another attempt fits: attempts remain and the backoff delay
    /// still fits inside the remaining budget.
    pub fn should_retry(&self, attempt: u32, remaining_budget: Duration) -> bool {
        attempt < self.max_attempts && self.delay(attempt) < remaining_budget
    }
}
