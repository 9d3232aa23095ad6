//! Exponential backoff policy for adapter calls.

use std::time::Duration;

use crate::adapter::AdapterError;
use crate::config::DispatchConfig;

/// Retry policy value object.
///
/// Attempt `n` failing with a transient error waits
/// `min(base_delay × multiplier^(n-1), max_delay)` before attempt `n + 1`.
/// A rate-limit `retry_after` hint raises the wait, still capped.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
            multiplier: config.multiplier,
            max_delay: config.max_delay,
        }
    }

    /// Single attempt, no retry.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Backoff after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(30) as i32;
        if exp == 0 {
            return self.base_delay.min(self.max_delay);
        }
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::try_from_secs_f64(secs)
            .map(|d| d.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }

    /// Worst-case time for one call: every attempt timing out plus the
    /// backoff between attempts.
    pub fn budget(&self, timeout: Duration) -> Duration {
        let backoffs: Duration = (1..self.max_attempts).map(|n| self.backoff(n)).sum();
        timeout.saturating_mul(self.max_attempts) + backoffs
    }

    /// Delay before the next attempt, or `None` when the failure is final.
    pub fn next_delay(&self, attempt: u32, err: &AdapterError) -> Option<Duration> {
        if !err.is_transient() || attempt >= self.max_attempts {
            return None;
        }
        let backoff = self.backoff(attempt);
        let delay = match err {
            AdapterError::RateLimited {
                retry_after: Some(hint),
            } => backoff.max(*hint).min(self.max_delay),
            _ => backoff,
        };
        Some(delay)
    }
}
