//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::queue::RetryPolicy;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },
}

/// Upper bound for `reap_interval_secs` (one year).
pub const MAX_REAP_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

/// Scheduler configuration.
///
/// Every field has a default, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of handler invocations in flight.
    pub concurrency: usize,
    /// `max_attempts` for jobs that don't specify one.
    pub default_max_attempts: u32,
    /// Per-attempt timeout.
    pub job_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Terminal jobs older than this are removed by the reaper.
    pub retention_secs: u64,
    pub reap_interval_secs: u64,
    /// Buffer size of the broadcast event channel.
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            default_max_attempts: 3,
            job_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            retention_secs: 24 * 60 * 60, // 24 hours
            reap_interval_secs: 60 * 60,  // 1 hour
            event_capacity: 256,
        }
    }
}

impl SchedulerConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn positive(key: &'static str, value: u64) -> Result<(), ConfigError> {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: "must be greater than zero".to_string(),
                });
            }
            Ok(())
        }

        positive("concurrency", self.concurrency as u64)?;
        positive("default_max_attempts", u64::from(self.default_max_attempts))?;
        positive("job_timeout_ms", self.job_timeout_ms)?;
        positive("reap_interval_secs", self.reap_interval_secs)?;
        if self.reap_interval_secs > MAX_REAP_INTERVAL_SECS {
            return Err(ConfigError::InvalidValue {
                key: "reap_interval_secs",
                message: format!("must be at most {MAX_REAP_INTERVAL_SECS}"),
            });
        }
        positive("event_capacity", self.event_capacity as u64)?;
        if let RetryPolicy::Exponential { multiplier, .. } = self.retry {
            if !(multiplier.is_finite() && multiplier >= 1.0) {
                return Err(ConfigError::InvalidValue {
                    key: "retry.multiplier",
                    message: format!("must be a finite number >= 1.0, got {multiplier}"),
                });
            }
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}
