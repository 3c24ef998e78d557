use std::cmp;
use std::time::Duration;

/// Exponential backoff with a ceiling for failed job retries.
///
/// The delay before attempt `n` becomes eligible again is
/// `min(base * 2^n, max)`.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Base delay, doubled per attempt.
    pub base: Duration,
    /// Upper bound on the computed delay.
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            max: Duration::from_secs(60 * 60),
        }
    }
}

impl BackoffPolicy {
    /// Delay to apply after `attempts` executions have failed.
    pub fn delay_for(&self, attempts: i32) -> Duration {
        // Shifts beyond 31 bits would overflow long before the ceiling
        // matters anyway.
        let exponent = attempts.clamp(0, 31) as u32;
        let factor = 1u32 << exponent;
        let delay = self.base.checked_mul(factor).unwrap_or(self.max);
        cmp::min(delay, self.max)
    }
}
