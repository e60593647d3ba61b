//! LogEventSink - イベントを tracing に書き出す EventSink

use crate::domain::JobEvent;
use crate::ports::EventSink;

/// Writes every lifecycle event as a tracing event (target `spool::events`).
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: &JobEvent) {
        match event {
            JobEvent::Completed { job, .. } => tracing::info!(
                target: "spool::events",
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                "job completed"
            ),
            JobEvent::Failed { job, error } => tracing::warn!(
                target: "spool::events",
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                error = %error,
                "job failed"
            ),
            JobEvent::Cancelled { job } => tracing::info!(
                target: "spool::events",
                job_id = %job.id,
                job_type = %job.job_type,
                "job cancelled"
            ),
            JobEvent::Progress { job } => tracing::debug!(
                target: "spool::events",
                job_id = %job.id,
                progress = job.progress,
                "job progress"
            ),
            JobEvent::Paused => tracing::info!(target: "spool::events", "scheduler paused"),
            JobEvent::Resumed => tracing::info!(target: "spool::events", "scheduler resumed"),
        }
    }
}
