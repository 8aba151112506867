// Bounded retry with exponential backoff and jitter for broker publishes inside the scheduler

use rand::Rng;
use std::time::Duration;

/// Calculates the pause before each retry of a failed broker operation
pub trait RetryStrategy: Send + Sync {
    /// Delay before retry number `attempt` (0-based), or None once retries are exhausted
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    fn max_retries(&self) -> u32;
}

/// Doubling backoff: base, 2×base, 4×base, … capped at `max_delay_ms`, plus up
/// to `jitter_factor` of random extra delay.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            jitter_factor: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_factor: f64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// No retries at all
    pub fn disabled() -> Self {
        Self::new(0, 0, 0, 0.0)
    }

    fn base_delay(&self, attempt: u32) -> u64 {
        let factor = 2_u64.checked_pow(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    fn add_jitter_ms(&self, base_delay_ms: u64) -> u64 {
        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;
        if jitter_range_ms == 0 {
            return base_delay_ms;
        }

        let jitter_ms = rand::thread_rng().gen_range(0..=jitter_range_ms);
        base_delay_ms + jitter_ms
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }

        let delay_ms = self.add_jitter_ms(self.base_delay(attempt));
        Some(Duration::from_millis(delay_ms))
    }

    fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
