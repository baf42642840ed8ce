//! Exponential backoff with jitter for the reconnect loop.

use rand::Rng;
use std::time::Duration;

/// Backoff schedule: `min(max_delay, base_delay * 2^attempt)` plus a
/// uniform random jitter of up to `jitter_fraction` of the delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_fraction: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_fraction: jitter_fraction.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Attempts made since the last successful connect.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Reset after a successful connect.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Deterministic delay for a given attempt, before jitter. Capped at
    /// `max_delay`; the exponent is clamped so the shift can never
    /// overflow.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(20);
        let scaled = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay);
        scaled.min(self.max_delay)
    }

    /// Delay to sleep before the next attempt, advancing the counter.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        let jitter_max = delay.as_secs_f64() * self.jitter_fraction;
        if jitter_max > 0.0 {
            let jitter = rand::rng().random_range(0.0..jitter_max);
            delay + Duration::from_secs_f64(jitter)
        } else {
            delay
        }
    }
}
