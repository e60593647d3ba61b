//! Events - ライフサイクルイベント
//!
//! ジョブの遷移（completed / failed / cancelled / progress）と
//! スケジューラ全体のシグナル（paused / resumed）を表現します。

use serde::{Deserialize, Serialize};

use super::job::Job;

/// Event kind, used to filter listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Completed,
    Failed,
    Cancelled,
    Progress,
    Paused,
    Resumed,
}

/// JobEvent は遷移が起きた順に配信される
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    Completed {
        job: Job,
        result: serde_json::Value,
    },
    /// Permanent failure (retries exhausted, or no processor registered).
    Failed {
        job: Job,
        error: String,
    },
    Cancelled {
        job: Job,
    },
    Progress {
        job: Job,
    },
    Paused,
    Resumed,
}

impl JobEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            JobEvent::Completed { .. } => EventKind::Completed,
            JobEvent::Failed { .. } => EventKind::Failed,
            JobEvent::Cancelled { .. } => EventKind::Cancelled,
            JobEvent::Progress { .. } => EventKind::Progress,
            JobEvent::Paused => EventKind::Paused,
            JobEvent::Resumed => EventKind::Resumed,
        }
    }

    /// The job this event is about; `None` for scheduler-level signals.
    pub fn job(&self) -> Option<&Job> {
        match self {
            JobEvent::Completed { job, .. }
            | JobEvent::Failed { job, .. }
            | JobEvent::Cancelled { job }
            | JobEvent::Progress { job } => Some(job),
            JobEvent::Paused | JobEvent::Resumed => None,
        }
    }
}
