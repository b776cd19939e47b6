//! Reconnect backoff
//!
//! Exponential backoff with full jitter between reconnect attempts, so a
//! consistently failing endpoint is not hot-looped against.

use rand::Rng;
use std::time::Duration;

/// Base delay for the first retry
const BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound on any single delay
const MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff with full jitter
#[derive(Debug)]
pub struct ReconnectBackoff {
    attempts: u32,
    base: Duration,
    max: Duration,
}

impl ReconnectBackoff {
    /// Create a backoff with the default delay curve
    #[must_use]
    pub fn new() -> Self {
        Self::with_bounds(BASE_DELAY, MAX_DELAY)
    }

    /// Create a backoff with explicit bounds
    #[must_use]
    pub fn with_bounds(base: Duration, max: Duration) -> Self {
        Self {
            attempts: 0,
            base,
            max,
        }
    }

    /// Next delay to sleep before reconnecting
    ///
    /// Full jitter: uniformly random in `[0, min(base * 2^attempts, max)]`.
    pub fn next_delay(&mut self) -> Duration {
        let exp = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempts))
            .min(self.max);
        self.attempts = self.attempts.saturating_add(1);

        if exp.is_zero() {
            return Duration::ZERO;
        }
        let jittered = rand::thread_rng().gen_range(0..=exp.as_millis() as u64);
        Duration::from_millis(jittered)
    }

    /// Number of delays handed out since the last reset
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}
