//! Job record and derived status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;

/// Derived job status.
///
/// Not stored: computed from the lifecycle timestamps.
/// - Waiting: no `processing_started_at`, no terminal timestamp
/// - Processing: `processing_started_at` set, no terminal timestamp
/// - Completed / Failed: terminal timestamp set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Per-job scheduling options, resolved at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    pub priority: i32,
    /// Delay before the first dispatch, in milliseconds.
    pub delay_ms: u64,
    pub max_attempts: u32,
}

impl JobOptions {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// One unit of deferred work.
///
/// Design:
/// - Identity fields (`id`, `job_type`, `payload`, `priority`, `max_attempts`, `delay_ms`,
///   `created_at`) never change after creation.
/// - Lifecycle fields change only through the transition methods below.
/// - At most one of `completed_at` / `failed_at` is ever set, and never cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub created_at: DateTime<Utc>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub progress: u8,
}

impl Job {
    pub fn new(
        id: JobId,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: JobOptions,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            job_type: job_type.into(),
            payload,
            priority: options.priority,
            attempts: 0,
            max_attempts: options.max_attempts.max(1),
            delay_ms: options.delay_ms,
            created_at,
            processing_started_at: None,
            completed_at: None,
            failed_at: None,
            error: None,
            progress: 0,
        }
    }

    pub fn status(&self) -> JobStatus {
        if self.completed_at.is_some() {
            JobStatus::Completed
        } else if self.failed_at.is_some() {
            JobStatus::Failed
        } else if self.processing_started_at.is_some() {
            JobStatus::Processing
        } else {
            JobStatus::Waiting
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Timestamp of the terminal transition, if any.
    pub fn terminal_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.failed_at)
    }

    /// Whether another attempt is allowed after the current one failed.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Mark as processing (increment attempts).
    pub(crate) fn begin_attempt(&mut self, at: DateTime<Utc>) {
        self.processing_started_at = Some(at);
        self.attempts += 1;
    }

    /// Mark as completed. Returns false if the job was already terminal.
    pub(crate) fn complete(&mut self, at: DateTime<Utc>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.completed_at = Some(at);
        self.progress = 100;
        true
    }

    /// Mark as permanently failed. Returns false if the job was already terminal.
    pub(crate) fn fail(&mut self, at: DateTime<Utc>, error: impl Into<String>) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.failed_at = Some(at);
        self.error = Some(error.into());
        true
    }

    /// Back to waiting after a failed attempt; the retry delay is tracked by the store.
    pub(crate) fn reset_for_retry(&mut self, error: impl Into<String>) {
        self.processing_started_at = None;
        self.error = Some(error.into());
    }

    /// Clamp and store progress. Ignored once terminal.
    pub(crate) fn set_progress(&mut self, percent: i32) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.progress = percent.clamp(0, 100) as u8;
        true
    }
}
