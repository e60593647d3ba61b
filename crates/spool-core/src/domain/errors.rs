//! Errors - エラー型と分類
//!
//! - `SpoolError`: 呼び出し側に返すエラー
//! - `JobFailure`: 1 回の試行の失敗（ジョブに記録される）
//! - `ProcessError`: Processor が返すエラー

use std::time::Duration;

use thiserror::Error;

use super::ids::JobId;
use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("missing processors for job types: {0:?}")]
    MissingProcessors(Vec<String>),
}

/// Why a dispatch attempt failed.
///
/// `Display` is the string recorded in `Job::error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobFailure {
    /// Configuration error: never retried.
    #[error("no processor registered for job type '{0}'")]
    NoProcessor(String),

    #[error("{0}")]
    Handler(String),

    #[error("job timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("processor panicked: {0}")]
    Panicked(String),
}

impl JobFailure {
    /// Transient failures consume an attempt and may be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, JobFailure::NoProcessor(_))
    }
}

/// Error returned by a processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessError {
    message: String,
}

impl ProcessError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProcessError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProcessError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for ProcessError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json decode: {err}"))
    }
}

/// Lets processors use `?` on `ProgressHandle::update`.
impl From<SpoolError> for ProcessError {
    fn from(err: SpoolError) -> Self {
        Self::new(err.to_string())
    }
}
