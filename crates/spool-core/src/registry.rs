//! Registry - job_type ごとの Processor 登録
//!
//! - `Processor`: 1 回の試行を実行する object-safe な trait
//! - `JobContext` / `ProgressHandle`: 試行中のジョブと進捗の報告先
//! - `ProcessorRegistry`: job_type -> Processor（後勝ち）

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;

use crate::app::dispatcher::Dispatcher;
use crate::domain::{Job, JobId, ProcessError, SpoolError};

/// A processor for a specific job type.
///
/// Processors are only ever invoked by the dispatcher.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: JobContext) -> Result<serde_json::Value, ProcessError>;
}

/// What a processor gets for one attempt.
pub struct JobContext {
    job: Job,
    progress: ProgressHandle,
}

impl JobContext {
    pub(crate) fn new(job: Job, progress: ProgressHandle) -> Self {
        Self { job, progress }
    }

    /// Snapshot of the job taken when the attempt started.
    pub fn job(&self) -> &Job {
        &self.job
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.job.payload
    }

    /// 1-indexed attempt number.
    pub fn attempt(&self) -> u32 {
        self.job.attempts
    }

    pub fn progress(&self) -> &ProgressHandle {
        &self.progress
    }

    pub fn into_parts(self) -> (Job, ProgressHandle) {
        (self.job, self.progress)
    }
}

/// Reports progress for one job back to the scheduler.
///
/// Holds a weak reference: once the scheduler is dropped, updates are no-ops.
#[derive(Clone)]
pub struct ProgressHandle {
    job_id: JobId,
    dispatcher: Weak<Dispatcher>,
}

impl ProgressHandle {
    pub(crate) fn new(job_id: JobId, dispatcher: Weak<Dispatcher>) -> Self {
        Self { job_id, dispatcher }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Same as `Scheduler::update_progress` for this job.
    pub fn update(&self, percent: i32) -> Result<(), SpoolError> {
        match self.dispatcher.upgrade() {
            Some(dispatcher) => dispatcher.update_progress(self.job_id, percent),
            None => Ok(()),
        }
    }
}

/// Processor built from an async closure. See [`processor_fn`].
pub struct FnProcessor<F> {
    f: F,
}

/// Adapt an async closure into a [`Processor`].
///
/// ```ignore
/// scheduler.register_processor("email.send", processor_fn(|ctx| async move {
///     send(ctx.payload()).await?;
///     Ok(serde_json::json!({"sent": true}))
/// }));
/// ```
pub fn processor_fn<F, Fut>(f: F) -> FnProcessor<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ProcessError>> + Send + 'static,
{
    FnProcessor { f }
}

#[async_trait]
impl<F, Fut> Processor for FnProcessor<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ProcessError>> + Send + 'static,
{
    async fn process(&self, ctx: JobContext) -> Result<serde_json::Value, ProcessError> {
        (self.f)(ctx).await
    }
}

/// Registry of processors (job_type -> processor).
///
/// Design:
/// - Registration may happen at any time, also while jobs are being dispatched.
/// - Last write wins: registering a type again replaces the previous processor.
///   Jobs already running keep the processor they started with.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: RwLock<HashMap<String, Arc<dyn Processor>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor. Returns the one it replaced, if any.
    pub fn register(
        &self,
        job_type: impl Into<String>,
        processor: Arc<dyn Processor>,
    ) -> Option<Arc<dyn Processor>> {
        let job_type = job_type.into();
        let previous = self
            .processors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_type.clone(), processor);
        if previous.is_some() {
            tracing::warn!(job_type = %job_type, "processor replaced (last registration wins)");
        }
        previous
    }

    pub fn lookup(&self, job_type: &str) -> Option<Arc<dyn Processor>> {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(job_type)
            .cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.processors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
