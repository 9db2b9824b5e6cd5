//! Reconnect Backoff
//!
//! Exponential backoff for upstream reconnects:
//! `delay(attempt) = min(base * 2^(attempt - 1), cap)`, optionally with
//! symmetric jitter. Jittered delays are clamped to the cap as well.
//! Attempt numbers start at 1.

use std::time::Duration;

use rand::Rng;

/// Backoff configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Delay of the first attempt.
    pub base: Duration,
    /// Upper bound of every delay.
    pub cap: Duration,
    /// Jitter as a fraction of the delay (0.1 = ±10%). Zero disables it.
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(5),
            cap: Duration::from_secs(30),
            jitter_factor: 0.0,
        }
    }
}

impl BackoffConfig {
    /// Create a configuration without jitter.
    #[must_use]
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            jitter_factor: 0.0,
        }
    }

    /// Deterministic delay for `attempt`, before jitter.
    ///
    /// Attempt `0` is treated as `1`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u128 << exponent;
        let millis = self.base.as_millis().saturating_mul(factor);
        let capped = millis.min(self.cap.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    /// Delay for `attempt` with jitter applied, never above `cap`.
    #[must_use]
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let delay = self.delay(attempt);
        if self.jitter_factor <= 0.0 {
            return delay;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = delay.as_millis() as f64;
        let jitter_range = base_millis * self.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64).min(self.cap)
    }
}
