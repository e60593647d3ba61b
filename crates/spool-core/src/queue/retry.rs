//! Retry policy: decides the delay before a failed job becomes eligible again.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy for failed attempts.
///
/// The policy only decides *when* a retry happens. Whether one happens at all is
/// decided by `attempts < max_attempts` on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Same delay after every failure.
    Fixed { delay_ms: u64 },

    /// delay = base_delay * multiplier^(attempts - 1), capped at max_delay.
    Exponential {
        base_delay_ms: u64,
        multiplier: f64,
        max_delay_ms: u64,
    },
}

fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed { delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        RetryPolicy::Fixed {
            delay_ms: saturating_millis(delay),
        }
    }

    pub fn exponential(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        RetryPolicy::Exponential {
            base_delay_ms: saturating_millis(base_delay),
            multiplier,
            max_delay_ms: saturating_millis(max_delay),
        }
    }

    /// Delay before the next attempt.
    ///
    /// # Arguments
    /// * `attempts` - Number of attempts already made (1-indexed).
    pub fn next_delay(&self, attempts: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            RetryPolicy::Exponential {
                base_delay_ms,
                multiplier,
                max_delay_ms,
            } => {
                let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
                let delay_ms = base_delay_ms as f64 * multiplier.powi(exponent);
                if !delay_ms.is_finite() || delay_ms >= max_delay_ms as f64 {
                    Duration::from_millis(max_delay_ms)
                } else {
                    Duration::from_millis(delay_ms.max(0.0) as u64)
                }
            }
        }
    }
}
