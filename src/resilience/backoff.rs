//! Exponential backoff for retry logic
//!
//! `delay = min(initial * multiplier^(attempt - 1), max)`, optionally
//! replaced by a uniform draw from `[0, delay]` (full jitter) so that
//! concurrent callers retrying the same upstream spread out.

use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

/// Configuration for exponential backoff
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Upper bound on any single delay
    pub max_delay_ms: u64,
    /// Growth factor per attempt (typically 2.0)
    pub multiplier: f64,
    /// Full jitter: draw uniformly from `[0, delay]`
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl BackoffConfig {
    /// Short delays, no jitter. For tests.
    pub fn aggressive() -> Self {
        Self {
            initial_delay_ms: 10,
            max_delay_ms: 1_000,
            multiplier: 2.0,
            jitter: false,
        }
    }

    /// Delay for `attempt` (1-based) drawn with `rng`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        Duration::from_millis(compute_delay(
            attempt,
            self.initial_delay_ms,
            self.max_delay_ms,
            self.multiplier,
            self.jitter,
            rng,
        ))
    }
}

/// Retry delay in milliseconds for `attempt` (1-based; 0 is treated as 1).
///
/// Deterministic for a seeded `rng`; without jitter the rng is not touched.
pub fn compute_delay<R: Rng + ?Sized>(
    attempt: u32,
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
    jitter: bool,
    rng: &mut R,
) -> u64 {
    let capped = capped_delay(attempt, initial_delay_ms, max_delay_ms, multiplier);
    if jitter && capped > 0 {
        rng.gen_range(0..=capped)
    } else {
        capped
    }
}

fn capped_delay(attempt: u32, initial_delay_ms: u64, max_delay_ms: u64, multiplier: f64) -> u64 {
    let exponent = attempt.max(1) - 1;
    let raw = initial_delay_ms as f64 * multiplier.powi(exponent.min(i32::MAX as u32) as i32);
    // NaN/inf from huge exponents collapse onto the cap.
    if !raw.is_finite() || raw >= max_delay_ms as f64 {
        max_delay_ms
    } else {
        raw.max(0.0) as u64
    }
}
