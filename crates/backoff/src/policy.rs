//! Backoff policy with exponential growth and full jitter.

use rand::RngExt;
use std::time::Duration;

/// Configuration for retry timing and budget.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, counting the initial one. `1` means no
    /// retries at all.
    pub max_attempts: u32,
    /// Base delay; attempt *n* (0-indexed) backs off by `base_delay * 2^n`.
    pub base_delay: Duration,
    /// Hard cap on the computed delay.
    pub max_delay: Duration,
    /// When true, the actual delay is drawn uniformly from `[0, computed]`
    /// ("full jitter") so a fleet reconnecting at once does not retry in
    /// lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that performs the initial attempt only.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// The capped exponential delay for a 0-indexed attempt, before jitter.
    pub fn raw_delay(&self, attempt: u32) -> Duration {
        // 2^attempt via checked shift so large attempts saturate instead of
        // overflowing the multiplier.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// The delay to actually sleep before retrying after `attempt`.
    ///
    /// With jitter enabled this is uniform in `[0, raw_delay(attempt)]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let raw = self.raw_delay(attempt);
        if !self.jitter || raw.is_zero() {
            return raw;
        }
        let raw_ms = u64::try_from(raw.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=raw_ms))
    }
}
