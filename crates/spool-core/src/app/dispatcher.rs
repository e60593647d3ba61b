//! Dispatcher - スケジューリングの中核
//!
//! # フロー
//! 1. `pump()`: 同時実行上限まで waiting ジョブを選んで processing に遷移
//! 2. `run_attempt()`: Processor をタイムアウト付きで実行
//! 3. `settle()`: 成功 / リトライ / 恒久失敗を記録してイベントを発行
//! 4. 空きが出たので再び `pump()`
//!
//! ジョブストアの状態遷移と in-flight 集合の更新は同じロックの中で行います。
//! イベントはロック内で outbox に積み、ロックを外してから発行します。
//! 発行は `emit_lock` で 1 スレッドずつなので、配信順は遷移順と一致し、
//! リスナーからスケジューラを呼び直しても詰まりません。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::domain::{Job, JobEvent, JobFailure, JobId, JobOptions, JobStatus, SpoolError};
use crate::ports::{Clock, EventSink, IdGenerator};
use crate::queue::{JobFilter, JobStore, RetryPolicy, StatusCounts, deadline_after};
use crate::registry::{JobContext, Processor, ProcessorRegistry, ProgressHandle};

/// What `settle` does with the store after an attempt.
enum Settled {
    /// Back to waiting, eligible again at this instant.
    Retry(Instant),
    Terminal(JobEvent),
    /// The job was cancelled or removed while the handler ran.
    Ignored,
}

/// Dispatch tuning, resolved from `SchedulerConfig`.
#[derive(Debug, Clone)]
pub(crate) struct DispatchSettings {
    pub concurrency: usize,
    pub default_max_attempts: u32,
    pub job_timeout: Duration,
    pub retry: RetryPolicy,
    pub retention: Duration,
}

#[derive(Debug, Default)]
struct DispatchState {
    store: JobStore,
    /// Admission happens only between `start` and `stop`.
    running: bool,
    paused: bool,
    /// Instant a wake-up timer is already armed for.
    wakeup: Option<Instant>,
    /// Events in transition order, not yet delivered.
    outbox: VecDeque<JobEvent>,
}

pub(crate) struct Dispatcher {
    state: Mutex<DispatchState>,
    registry: ProcessorRegistry,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    settings: DispatchSettings,
    /// Signalled whenever the in-flight set becomes empty.
    drained: Notify,
    /// Held by the thread currently draining the outbox.
    emit_lock: Mutex<()>,
}

impl Dispatcher {
    pub(crate) fn new(
        settings: DispatchSettings,
        registry: ProcessorRegistry,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            state: Mutex::new(DispatchState::default()),
            registry,
            events,
            clock,
            ids,
            settings,
            drained: Notify::new(),
            emit_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver queued events outside the state lock.
    ///
    /// If another thread (or an outer call on this one, via a listener) is already
    /// draining, the events are left for it so that order is kept.
    fn flush_events(&self) {
        loop {
            let guard = match self.emit_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            loop {
                let next = self.lock().outbox.pop_front();
                let Some(event) = next else {
                    break;
                };
                self.events.emit(&event);
            }
            drop(guard);

            // 解放の直前に積まれた分を拾う
            if self.lock().outbox.is_empty() {
                return;
            }
        }
    }

    pub(crate) fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    pub(crate) fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Job store access
    // ------------------------------------------------------------------

    pub(crate) fn enqueue(
        self: &Arc<Self>,
        job_type: String,
        payload: serde_json::Value,
        priority: i32,
        delay: Duration,
        max_attempts: Option<u32>,
    ) -> JobId {
        let options = JobOptions {
            priority,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            max_attempts: max_attempts.unwrap_or(self.settings.default_max_attempts),
        };
        let id = self.ids.generate_job_id();
        {
            let mut state = self.lock();
            state
                .store
                .create(id, job_type.as_str(), payload, options, self.clock.now());
        }
        tracing::debug!(
            job_id = %id,
            job_type = %job_type,
            priority,
            delay_ms = options.delay_ms,
            "job enqueued"
        );
        self.pump();
        id
    }

    pub(crate) fn get(&self, id: JobId) -> Option<Job> {
        self.lock().store.get(id).cloned()
    }

    pub(crate) fn list(&self, filter: &JobFilter) -> Vec<Job> {
        self.lock().store.list(filter)
    }

    /// (total, per-status counts, in-flight) from one consistent snapshot.
    pub(crate) fn counts(&self) -> (usize, StatusCounts, usize) {
        let state = self.lock();
        (
            state.store.len(),
            state.store.counts(),
            state.store.in_flight_len(),
        )
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub(crate) fn set_running(self: &Arc<Self>, running: bool) {
        self.lock().running = running;
        if running {
            self.pump();
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lock().running
    }

    pub(crate) fn pause(&self) {
        {
            let mut state = self.lock();
            if state.paused {
                return;
            }
            state.paused = true;
            tracing::info!("scheduler paused");
            state.outbox.push_back(JobEvent::Paused);
        }
        self.flush_events();
    }

    pub(crate) fn resume(self: &Arc<Self>) {
        {
            let mut state = self.lock();
            if !state.paused {
                return;
            }
            state.paused = false;
            tracing::info!("scheduler resumed");
            state.outbox.push_back(JobEvent::Resumed);
        }
        self.flush_events();
        self.pump();
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.lock().paused
    }

    /// Wait until no handler invocation is in flight.
    pub(crate) async fn wait_drained(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            // 登録してから確認しないと、間の notify_waiters を取りこぼす
            notified.as_mut().enable();

            let in_flight = self.lock().store.in_flight_len();
            if in_flight == 0 {
                return;
            }
            tracing::debug!(in_flight, "waiting for in-flight jobs to drain");
            notified.await;
        }
    }

    // ------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------

    /// Admit waiting jobs while capacity remains.
    pub(crate) fn pump(self: &Arc<Self>) {
        let (claimed, wake_at) = {
            let mut state = self.lock();
            if !state.running || state.paused {
                return;
            }

            let now = Instant::now();
            let mut claimed = Vec::new();
            while state.store.in_flight_len() < self.settings.concurrency {
                let Some(job) = state.store.claim_next(now, self.clock.now()) else {
                    break;
                };
                claimed.push(job);
            }

            // 遅延中のジョブがあればタイマーを 1 本だけ張る
            let wake_at = state
                .store
                .next_eligible_at(now)
                .filter(|at| state.wakeup.is_none_or(|armed| armed <= now || *at < armed));
            if wake_at.is_some() {
                state.wakeup = wake_at;
            }
            (claimed, wake_at)
        };

        for job in claimed {
            tracing::debug!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.attempts,
                max_attempts = job.max_attempts,
                "dispatching job"
            );
            tokio::spawn(Arc::clone(self).run_attempt(job));
        }

        if let Some(at) = wake_at {
            let dispatcher = Arc::downgrade(self);
            tokio::spawn(async move {
                tokio::time::sleep_until(at).await;
                if let Some(dispatcher) = dispatcher.upgrade() {
                    {
                        let mut state = dispatcher.lock();
                        if state.wakeup == Some(at) {
                            state.wakeup = None;
                        }
                    }
                    dispatcher.pump();
                }
            });
        }
    }

    async fn run_attempt(self: Arc<Self>, job: Job) {
        let id = job.id;
        let outcome = match self.registry.lookup(&job.job_type) {
            Some(processor) => self.invoke(processor, job).await,
            None => Err(JobFailure::NoProcessor(job.job_type.clone())),
        };
        self.settle(id, outcome);
        self.pump();
    }

    /// Run the processor in its own task, raced against the per-attempt timeout.
    async fn invoke(
        self: &Arc<Self>,
        processor: Arc<dyn Processor>,
        job: Job,
    ) -> Result<serde_json::Value, JobFailure> {
        let progress = ProgressHandle::new(job.id, Arc::downgrade(self));
        let ctx = JobContext::new(job, progress);
        let mut handle = tokio::spawn(async move { processor.process(ctx).await });

        match tokio::time::timeout(self.settings.job_timeout, &mut handle).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(err))) => Err(JobFailure::Handler(err.to_string())),
            Ok(Err(join_err)) => Err(JobFailure::Panicked(join_err.to_string())),
            Err(_elapsed) => {
                // 次の await ポイントで止まる。I/O 自体が止まる保証はない
                handle.abort();
                Err(JobFailure::Timeout(self.settings.job_timeout))
            }
        }
    }

    /// Record the outcome of one attempt.
    fn settle(&self, id: JobId, outcome: Result<serde_json::Value, JobFailure>) {
        let now = self.clock.now();
        let mut state = self.lock();
        state.store.release(id);
        let drained = state.store.in_flight_len() == 0;

        let settled = match state.store.get_mut(id) {
            None => {
                tracing::debug!(job_id = %id, "job removed while in flight, dropping result");
                Settled::Ignored
            }
            Some(job) if job.is_terminal() => {
                // キャンセル済みなど。結果は捨てる
                tracing::debug!(job_id = %id, status = ?job.status(), "ignoring result for terminal job");
                Settled::Ignored
            }
            Some(job) => self.apply_outcome(job, outcome, now),
        };
        match settled {
            Settled::Retry(at) => state.store.defer(id, at),
            Settled::Terminal(event) => state.outbox.push_back(event),
            Settled::Ignored => {}
        }
        drop(state);

        self.flush_events();
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Apply the retry/completion policy.
    fn apply_outcome(
        &self,
        job: &mut Job,
        outcome: Result<serde_json::Value, JobFailure>,
        now: DateTime<Utc>,
    ) -> Settled {
        match outcome {
            Ok(result) => {
                job.complete(now);
                tracing::info!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    "job completed"
                );
                Settled::Terminal(JobEvent::Completed {
                    job: job.clone(),
                    result,
                })
            }
            Err(failure) if failure.is_retryable() && job.can_retry() => {
                let delay = self.settings.retry.next_delay(job.attempts);
                job.reset_for_retry(failure.to_string());
                tracing::warn!(
                    job_id = %job.id,
                    job_type = %job.job_type,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %failure,
                    "job attempt failed, retry scheduled"
                );
                Settled::Retry(deadline_after(Instant::now(), delay))
            }
            Err(failure) => {
                let error = failure.to_string();
                job.fail(now, error.clone());
                match failure {
                    JobFailure::NoProcessor(_) => tracing::error!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        "no processor registered, job failed without retry"
                    ),
                    _ => tracing::error!(
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempts = job.attempts,
                        error = %error,
                        "job failed permanently"
                    ),
                }
                Settled::Terminal(JobEvent::Failed {
                    job: job.clone(),
                    error,
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Caller operations
    // ------------------------------------------------------------------

    pub(crate) fn update_progress(&self, id: JobId, percent: i32) -> Result<(), SpoolError> {
        {
            let mut state = self.lock();
            let job = state.store.get_mut(id).ok_or(SpoolError::JobNotFound(id))?;
            if !job.set_progress(percent) {
                tracing::debug!(job_id = %id, "progress update after termination ignored");
                return Ok(());
            }
            let event = JobEvent::Progress { job: job.clone() };
            state.outbox.push_back(event);
        }
        self.flush_events();
        Ok(())
    }

    /// Returns true if a cancellation action was taken.
    pub(crate) fn cancel(&self, id: JobId) -> bool {
        let now = self.clock.now();
        {
            let mut state = self.lock();
            let Some(status) = state.store.get(id).map(Job::status) else {
                return false;
            };

            let event = match status {
                JobStatus::Waiting => {
                    let Some(job) = state.store.remove(id) else {
                        return false;
                    };
                    tracing::info!(job_id = %id, "waiting job cancelled and removed");
                    JobEvent::Cancelled { job }
                }
                JobStatus::Processing => {
                    let Some(job) = state.store.get_mut(id) else {
                        return false;
                    };
                    // ハンドラは止められない。結果は settle で捨てられる
                    job.fail(now, "Cancelled");
                    tracing::info!(job_id = %id, "processing job cancelled (handler keeps running)");
                    JobEvent::Cancelled { job: job.clone() }
                }
                JobStatus::Completed | JobStatus::Failed => return false,
            };
            state.outbox.push_back(event);
        }
        self.flush_events();
        true
    }

    /// One reaper sweep. Returns the number of removed jobs.
    pub(crate) fn reap(&self) -> usize {
        let retention = chrono::Duration::from_std(self.settings.retention)
            .unwrap_or(chrono::Duration::MAX);
        let now = self.clock.now();
        let reaped = self.lock().store.reap(now, retention);
        if !reaped.is_empty() {
            tracing::info!(count = reaped.len(), "reaped terminal jobs past retention");
        }
        reaped.len()
    }
}
