//! Retry delay calculation.
//!
//! Exponential backoff with additive jitter:
//!
//! ```text
//! base   = min(base_delay_ms * 2^attempt, max_delay_ms)
//! jitter = base_delay_ms * jitter_factor * random()      random() ∈ [0, 1)
//! delay  = base + jitter
//! ```
//!
//! Only the exponential term is capped. Jitter is always drawn relative to
//! the *base* delay, so it stays small even when the cap is reached.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Retry tuning. Immutable per retry manager.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on the exponential term, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Number of retries allowed per key before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Jitter as a fraction of `base_delay_ms`, in `[0, 1]`.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_jitter_factor() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_retries: default_max_retries(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// Rejected retry settings.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryConfigError {
    /// A zero base delay would retry in a tight loop.
    #[error("base_delay_ms must be greater than zero")]
    ZeroBaseDelay,
    /// The cap is below the first delay.
    #[error("max_delay_ms ({max}) must be >= base_delay_ms ({base})")]
    CapBelowBase {
        /// Configured base delay.
        base: u64,
        /// Configured cap.
        max: u64,
    },
    /// Jitter factor outside `[0, 1]` (or NaN).
    #[error("jitter_factor must be within [0, 1], got {0}")]
    JitterOutOfRange(f64),
}

impl RetryConfig {
    /// Check the settings for values that would break the schedule.
    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.base_delay_ms == 0 {
            return Err(RetryConfigError::ZeroBaseDelay);
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(RetryConfigError::CapBelowBase {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(RetryConfigError::JitterOutOfRange(self.jitter_factor));
        }
        Ok(())
    }
}

/// Calculate the delay before retry number `attempt` (0-based).
pub fn calculate_retry_delay(attempt: u32, config: &RetryConfig) -> Duration {
    calculate_retry_delay_with(attempt, config, random_unit())
}

/// Calculate the delay with an explicit `random` sample in `[0, 1)`.
///
/// Deterministic; used by tests and by callers that inject their own
/// randomness source.
pub fn calculate_retry_delay_with(attempt: u32, config: &RetryConfig, random: f64) -> Duration {
    let exponential = 2u64
        .checked_pow(attempt)
        .and_then(|factor| config.base_delay_ms.checked_mul(factor))
        .unwrap_or(u64::MAX);
    let base = exponential.min(config.max_delay_ms);

    let random = if random.is_finite() {
        random.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let jitter = config.base_delay_ms as f64 * config.jitter_factor * random;

    Duration::from_millis(base.saturating_add(jitter.round() as u64))
}

/// Uniform sample in `[0, 1)` from the OS RNG.
///
/// Falls back to zero jitter if the RNG is unavailable.
fn random_unit() -> f64 {
    let mut bytes = [0u8; 8];
    if getrandom::getrandom(&mut bytes).is_err() {
        return 0.0;
    }
    // 53 random mantissa bits
    (u64::from_le_bytes(bytes) >> 11) as f64 / (1u64 << 53) as f64
}
