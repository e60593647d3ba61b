//! Scheduler - 呼び出し側に見える表面
//!
//! enqueue / 参照 / キャンセル / 進捗 / 一時停止 / イベント購読をまとめます。
//! 実際のスケジューリングは `Dispatcher` が担当します。

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;

use super::builder::SchedulerBuilder;
use super::dispatcher::Dispatcher;
use super::reaper_loop::ReaperLoop;
use super::status::SchedulerStats;
use crate::config::SchedulerConfig;
use crate::domain::{EventKind, Job, JobEvent, JobId, ProcessError, SpoolError};
use crate::impls::EventBus;
use crate::queue::JobFilter;
use crate::registry::{JobContext, Processor, processor_fn};
use crate::typed::{Handler, Task, TypedProcessor};

/// Per-job options for `Scheduler::enqueue`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Higher runs first.
    pub priority: i32,
    /// Not eligible before this much time has passed.
    pub delay: Duration,
    /// Falls back to `SchedulerConfig::default_max_attempts`.
    pub max_attempts: Option<u32>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// In-process job scheduler.
///
/// # ライフサイクル
/// - `start()` 前に enqueue されたジョブは保存されるだけで、start 時にまとめて投入される
/// - `stop()` は新規投入を止め、実行中のハンドラが終わるまで待つ
/// - stop 後に再び `start()` できる
///
/// `start()` と、実行中の `enqueue` / `resume` は Tokio ランタイム内から呼ぶこと。
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    events: Arc<EventBus>,
    reaper: Mutex<Option<ReaperLoop>>,
    reap_interval: Duration,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Scheduler with the given config and no processors yet.
    pub fn new(config: SchedulerConfig) -> Result<Self, SpoolError> {
        SchedulerBuilder::new().config(config).build()
    }

    pub(crate) fn from_parts(
        dispatcher: Arc<Dispatcher>,
        events: Arc<EventBus>,
        reap_interval: Duration,
    ) -> Self {
        Self {
            dispatcher,
            events,
            reaper: Mutex::new(None),
            reap_interval,
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start dispatching and the periodic reaper. No-op when already running.
    pub fn start(&self) {
        {
            let mut reaper = self.reaper.lock().unwrap_or_else(PoisonError::into_inner);
            if reaper.is_some() {
                return;
            }
            *reaper = Some(ReaperLoop::spawn(
                Arc::clone(&self.dispatcher),
                self.reap_interval,
            ));
        }
        tracing::info!(
            concurrency = self.dispatcher.settings().concurrency,
            reap_interval_secs = self.reap_interval.as_secs(),
            "scheduler started"
        );
        self.dispatcher.set_running(true);
    }

    /// Stop admitting jobs, stop the reaper, then wait for in-flight handlers.
    ///
    /// Waiting jobs stay in the store and run after the next `start()`.
    pub async fn stop(&self) {
        self.dispatcher.set_running(false);
        let reaper = self
            .reaper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reaper) = reaper {
            reaper.shutdown_and_join().await;
        }
        self.dispatcher.wait_drained().await;
        tracing::info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }

    /// Stop admitting new work. Running handlers are not interrupted.
    pub fn pause(&self) {
        self.dispatcher.pause();
    }

    pub fn resume(&self) {
        self.dispatcher.resume();
    }

    pub fn is_paused(&self) -> bool {
        self.dispatcher.is_paused()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register (or replace) the processor for `job_type`.
    pub fn register_processor(&self, job_type: impl Into<String>, processor: impl Processor + 'static) {
        self.dispatcher
            .registry()
            .register(job_type, Arc::new(processor));
    }

    /// Register an async closure as the processor for `job_type`.
    pub fn register_fn<F, Fut>(&self, job_type: impl Into<String>, f: F)
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ProcessError>> + Send + 'static,
    {
        self.register_processor(job_type, processor_fn(f));
    }

    /// Register a typed handler under `T::TYPE`.
    pub fn register<T: Task, H: Handler<T> + 'static>(&self, handler: H) {
        self.register_processor(T::TYPE, TypedProcessor::<T, H>::new(handler));
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    pub fn enqueue(
        &self,
        job_type: impl Into<String>,
        payload: serde_json::Value,
        options: EnqueueOptions,
    ) -> JobId {
        self.dispatcher.enqueue(
            job_type.into(),
            payload,
            options.priority,
            options.delay,
            options.max_attempts,
        )
    }

    /// Enqueue a typed task under `T::TYPE`.
    pub fn enqueue_task<T: Task>(&self, task: &T, options: EnqueueOptions) -> Result<JobId, SpoolError> {
        let payload = serde_json::to_value(task)?;
        Ok(self.enqueue(T::TYPE, payload, options))
    }

    /// Snapshot of a job. `None` once it was cancelled while waiting or reaped.
    pub fn get_job(&self, id: JobId) -> Option<Job> {
        self.dispatcher.get(id)
    }

    /// Jobs matching `filter`, in dispatch order (priority desc, then oldest first).
    pub fn list_jobs(&self, filter: &JobFilter) -> Vec<Job> {
        self.dispatcher.list(filter)
    }

    /// Set progress (clamped to 0..=100). Ignored for terminal jobs.
    pub fn update_progress(&self, id: JobId, percent: i32) -> Result<(), SpoolError> {
        self.dispatcher.update_progress(id, percent)
    }

    /// Cancel a job.
    ///
    /// - waiting: removed from the store
    /// - processing: marked failed with error "Cancelled"; the handler keeps running
    ///   and its result is discarded
    /// - terminal or unknown: nothing happens, returns false
    pub fn cancel(&self, id: JobId) -> bool {
        self.dispatcher.cancel(id)
    }

    /// Run one reaper sweep now. Returns the number of removed jobs.
    pub fn reap_now(&self) -> usize {
        self.dispatcher.reap()
    }

    pub fn stats(&self) -> SchedulerStats {
        let (total, counts, in_flight) = self.dispatcher.counts();
        SchedulerStats {
            total,
            waiting: counts.waiting,
            processing: counts.processing,
            completed: counts.completed,
            failed: counts.failed,
            in_flight,
            registered_types: self.dispatcher.registry().registered_types(),
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Listener called for every event of `kind`, in transition order.
    ///
    /// Runs outside the scheduler lock, so it may call back into the scheduler
    /// (e.g. enqueue a follow-up job on `Completed`). Must not block.
    pub fn on_event<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.events.on(kind, listener);
    }

    pub fn on_any_event<F>(&self, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.events.on_any(listener);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let reaper = self
            .reaper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reaper) = reaper {
            reaper.request_shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::{Value, json};
    use tokio::sync::{Notify, Semaphore};
    use tokio::time::{Instant, sleep, timeout};

    use super::*;
    use crate::domain::JobStatus;
    use crate::ports::ManualClock;
    use crate::queue::RetryPolicy;
    use crate::registry::ProgressHandle;
    use crate::typed::task::fixtures::AddOne;

    fn config(concurrency: usize) -> SchedulerConfig {
        SchedulerConfig {
            concurrency,
            default_max_attempts: 3,
            job_timeout_ms: 10_000,
            retry: RetryPolicy::fixed(Duration::from_millis(100)),
            ..SchedulerConfig::default()
        }
    }

    fn scheduler(concurrency: usize) -> Scheduler {
        Scheduler::new(config(concurrency)).unwrap()
    }

    /// Receive events until `n` terminal ones (completed / failed / cancelled) arrived.
    async fn terminal_events(rx: &mut broadcast::Receiver<JobEvent>, n: usize) -> Vec<JobEvent> {
        let mut out = Vec::new();
        while out.len() < n {
            let event = timeout(Duration::from_secs(600), rx.recv())
                .await
                .expect("timed out waiting for events")
                .expect("event channel closed");
            if matches!(
                event.kind(),
                EventKind::Completed | EventKind::Failed | EventKind::Cancelled
            ) {
                out.push(event);
            }
        }
        out
    }

    fn record_names(scheduler: &Scheduler) -> Arc<Mutex<Vec<String>>> {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&order);
        scheduler.register_fn("work", move |ctx| {
            let seen = Arc::clone(&seen);
            async move {
                let name = ctx.payload()["name"].as_str().unwrap_or_default().to_string();
                seen.lock().unwrap().push(name);
                Ok::<_, ProcessError>(Value::Null)
            }
        });
        order
    }

    #[tokio::test(start_paused = true)]
    async fn higher_priority_runs_first() {
        let scheduler = scheduler(1);
        let order = record_names(&scheduler);
        let mut rx = scheduler.subscribe();

        scheduler.enqueue("work", json!({"name": "A"}), EnqueueOptions::new().priority(5));
        scheduler.enqueue("work", json!({"name": "B"}), EnqueueOptions::new().priority(10));
        scheduler.start();

        terminal_events(&mut rx, 2).await;
        assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn equal_priority_is_fifo() {
        let scheduler = scheduler(1);
        let order = record_names(&scheduler);
        let mut rx = scheduler.subscribe();

        scheduler.enqueue("work", json!({"name": "C"}), EnqueueOptions::new().priority(5));
        scheduler.enqueue("work", json!({"name": "D"}), EnqueueOptions::new().priority(5));
        scheduler.start();

        terminal_events(&mut rx, 2).await;
        assert_eq!(*order.lock().unwrap(), vec!["C", "D"]);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_cap_is_respected() {
        let scheduler = scheduler(3);
        let gate = Arc::new(Semaphore::new(0));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        {
            let (gate, running, peak) = (Arc::clone(&gate), Arc::clone(&running), Arc::clone(&peak));
            scheduler.register_fn("block", move |_ctx| {
                let (gate, running, peak) = (Arc::clone(&gate), Arc::clone(&running), Arc::clone(&peak));
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let _permit = gate
                        .acquire()
                        .await
                        .map_err(|e| ProcessError::new(e.to_string()))?;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, ProcessError>(Value::Null)
                }
            });
        }
        let mut rx = scheduler.subscribe();

        scheduler.start();
        for _ in 0..10 {
            scheduler.enqueue("block", Value::Null, EnqueueOptions::new());
        }
        sleep(Duration::from_millis(10)).await;

        let stats = scheduler.stats();
        assert_eq!(stats.processing, 3);
        assert_eq!(stats.in_flight, 3);
        assert_eq!(stats.waiting, 7);

        gate.add_permits(1);
        terminal_events(&mut rx, 10).await;
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.stats().completed, 10);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn retry_then_success_emits_one_completed() {
        let scheduler = scheduler(1);
        scheduler.register_fn("flaky", |ctx| async move {
            if ctx.attempt() < 3 {
                return Err(ProcessError::new(format!("attempt {} failed", ctx.attempt())));
            }
            Ok::<_, ProcessError>(json!("ok"))
        });
        let completed = Arc::new(AtomicUsize::new(0));
        {
            let completed = Arc::clone(&completed);
            scheduler.on_event(EventKind::Completed, move |_| {
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }
        let mut rx = scheduler.subscribe();

        scheduler.start();
        let id = scheduler.enqueue("flaky", Value::Null, EnqueueOptions::new().max_attempts(3));

        let events = terminal_events(&mut rx, 1).await;
        assert!(matches!(&events[0], JobEvent::Completed { result, .. } if *result == json!("ok")));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);

        let job = scheduler.get_job(id).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.progress, 100);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_emit_one_failed() {
        let scheduler = scheduler(1);
        scheduler.register_fn("broken", |_ctx| async { Err::<Value, _>(ProcessError::new("boom")) });
        let failed = Arc::new(AtomicUsize::new(0));
        {
            let failed = Arc::clone(&failed);
            scheduler.on_event(EventKind::Failed, move |_| {
                failed.fetch_add(1, Ordering::SeqCst);
            });
        }
        let mut rx = scheduler.subscribe();

        scheduler.start();
        let id = scheduler.enqueue("broken", Value::Null, EnqueueOptions::new().max_attempts(2));

        let events = terminal_events(&mut rx, 1).await;
        assert!(matches!(&events[0], JobEvent::Failed { error, .. } if error == "boom"));

        sleep(Duration::from_secs(5)).await;
        assert_eq!(failed.load(Ordering::SeqCst), 1);

        let job = scheduler.get_job(id).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.attempts, 2);
        assert!(job.failed_at.is_some());
        assert!(job.completed_at.is_none());
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hung_handler_times_out() {
        let scheduler = Scheduler::new(SchedulerConfig {
            job_timeout_ms: 250,
            ..config(1)
        })
        .unwrap();
        scheduler.register_fn("hang", |_ctx| async {
            std::future::pending::<()>().await;
            Ok::<_, ProcessError>(Value::Null)
        });
        let mut rx = scheduler.subscribe();

        scheduler.start();
        let started = Instant::now();
        let id = scheduler.enqueue("hang", Value::Null, EnqueueOptions::new().max_attempts(1));

        let events = terminal_events(&mut rx, 1).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_secs(1));
        assert!(matches!(&events[0], JobEvent::Failed { error, .. } if error.contains("timed out")));

        let job = scheduler.get_job(id).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(scheduler.stats().in_flight, 0);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_delay_keeps_job_waiting() {
        let scheduler = scheduler(1);
        scheduler.register_fn("work", |_ctx| async { Ok::<_, ProcessError>(Value::Null) });
        scheduler.start();

        let id = scheduler.enqueue(
            "work",
            Value::Null,
            EnqueueOptions::new().delay(Duration::from_secs(1 << 62)),
        );
        sleep(Duration::from_millis(50)).await;

        let job = scheduler.get_job(id).unwrap();
        assert_eq!(job.delay_ms, u64::MAX);
        assert_eq!(job.status(), JobStatus::Waiting);
        scheduler.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn listener_can_enqueue_follow_up_job() {
        let scheduler = Arc::new(scheduler(2));
        scheduler.register_fn("first", |_ctx| async { Ok::<_, ProcessError>(json!(1)) });
        scheduler.register_fn("second", |_ctx| async { Ok::<_, ProcessError>(json!(2)) });
        {
            let weak = Arc::downgrade(&scheduler);
            scheduler.on_event(EventKind::Completed, move |event| {
                let Some(job) = event.job() else { return };
                if job.job_type != "first" {
                    return;
                }
                if let Some(scheduler) = weak.upgrade() {
                    // 呼び戻し: enqueue と参照
                    assert_eq!(scheduler.get_job(job.id).unwrap().status(), JobStatus::Completed);
                    scheduler.enqueue("second", Value::Null, EnqueueOptions::new());
                }
            });
        }
        let mut rx = scheduler.subscribe();
        scheduler.start();
        scheduler.enqueue("first", Value::Null, EnqueueOptions::new());

        let events = timeout(Duration::from_secs(3), terminal_events(&mut rx, 2))
            .await
            .expect("follow-up job did not complete");
        let types: Vec<&str> = events
            .iter()
            .filter_map(|e| e.job().map(|job| job.job_type.as_str()))
            .collect();
        assert_eq!(types, vec!["first", "second"]);

        timeout(Duration::from_secs(3), scheduler.stop())
            .await
            .expect("stop did not return");
        assert_eq!(scheduler.stats().completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_waiting_job_removes_it() {
        let scheduler = scheduler(1);
        scheduler.register_fn("work", |_ctx| async { Ok::<_, ProcessError>(Value::Null) });
        let mut rx = scheduler.subscribe();

        scheduler.start();
        let id = scheduler.enqueue(
            "work",
            Value::Null,
            EnqueueOptions::new().delay(Duration::from_secs(3600)),
        );

        assert!(scheduler.cancel(id));
        assert!(scheduler.get_job(id).is_none());
        assert!(scheduler.list_jobs(&JobFilter::new()).is_empty());
        assert!(!scheduler.cancel(id));

        let events = terminal_events(&mut rx, 1).await;
        assert!(matches!(&events[0], JobEvent::Cancelled { job } if job.id == id));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_processing_job_discards_late_result() {
        let scheduler = scheduler(1);
        let release = Arc::new(Notify::new());
        {
            let release = Arc::clone(&release);
            scheduler.register_fn("slow", move |_ctx| {
                let release = Arc::clone(&release);
                async move {
                    release.notified().await;
                    Ok::<_, ProcessError>(json!("late"))
                }
            });
        }
        let completed = Arc::new(AtomicUsize::new(0));
        {
            let completed = Arc::clone(&completed);
            scheduler.on_event(EventKind::Completed, move |_| {
                completed.fetch_add(1, Ordering::SeqCst);
            });
        }
        let mut rx = scheduler.subscribe();

        scheduler.start();
        let id = scheduler.enqueue("slow", Value::Null, EnqueueOptions::new());
        sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.get_job(id).unwrap().status(), JobStatus::Processing);

        assert!(scheduler.cancel(id));
        let events = terminal_events(&mut rx, 1).await;
        assert!(matches!(&events[0], JobEvent::Cancelled { job } if job.id == id));

        let job = scheduler.get_job(id).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("Cancelled"));
        // ハンドラはまだ走っている
        assert_eq!(scheduler.stats().in_flight, 1);
        assert!(!scheduler.cancel(id));

        release.notify_one();
        sleep(Duration::from_millis(10)).await;

        let job = scheduler.get_job(id).unwrap();
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(completed.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.stats().in_flight, 0);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn progress_is_clamped() {
        let scheduler = scheduler(1);
        let mut rx = scheduler.subscribe();
        let id = scheduler.enqueue("work", Value::Null, EnqueueOptions::new());

        scheduler.update_progress(id, 150).unwrap();
        assert_eq!(scheduler.get_job(id).unwrap().progress, 100);
        scheduler.update_progress(id, -5).unwrap();
        assert_eq!(scheduler.get_job(id).unwrap().progress, 0);

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, JobEvent::Progress { job } if job.progress == 100));
    }

    #[tokio::test]
    async fn progress_for_unknown_job_is_an_error() {
        let scheduler = scheduler(1);
        let id = scheduler.enqueue("work", Value::Null, EnqueueOptions::new());
        assert!(scheduler.cancel(id));

        let result = scheduler.update_progress(id, 10);
        assert!(matches!(result, Err(SpoolError::JobNotFound(missing)) if missing == id));
    }

    #[tokio::test(start_paused = true)]
    async fn processor_reports_progress() {
        let scheduler = scheduler(1);
        scheduler.register_fn("report", |ctx| async move {
            ctx.progress().update(40)?;
            Ok::<_, ProcessError>(Value::Null)
        });
        let mut rx = scheduler.subscribe();

        scheduler.start();
        scheduler.enqueue("report", Value::Null, EnqueueOptions::new());

        let progress = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
        assert!(matches!(progress, JobEvent::Progress { job } if job.progress == 40));
        let done = terminal_events(&mut rx, 1).await;
        assert!(matches!(&done[0], JobEvent::Completed { job, .. } if job.progress == 100));
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reap_now_removes_only_expired_terminal_jobs() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let scheduler = Scheduler::builder()
            .config(config(1))
            .clock(clock.clone())
            .processor("work", processor_fn(|_ctx| async { Ok::<_, ProcessError>(Value::Null) }))
            .build()
            .unwrap();
        let mut rx = scheduler.subscribe();
        scheduler.start();

        let old = scheduler.enqueue("work", Value::Null, EnqueueOptions::new());
        terminal_events(&mut rx, 1).await;

        clock.advance(chrono::Duration::hours(20));
        let recent = scheduler.enqueue("work", Value::Null, EnqueueOptions::new());
        terminal_events(&mut rx, 1).await;

        let later = scheduler.enqueue(
            "work",
            Value::Null,
            EnqueueOptions::new().delay(Duration::from_secs(100 * 3600)),
        );

        clock.advance(chrono::Duration::hours(5));
        assert_eq!(scheduler.reap_now(), 1);
        assert!(scheduler.get_job(old).is_none());
        assert!(scheduler.get_job(recent).is_some());
        assert_eq!(scheduler.get_job(later).unwrap().status(), JobStatus::Waiting);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_reaper_runs_while_started() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let scheduler = Scheduler::builder()
            .config(SchedulerConfig {
                retention_secs: 3600,
                reap_interval_secs: 1,
                ..config(1)
            })
            .clock(clock.clone())
            .processor("work", processor_fn(|_ctx| async { Ok::<_, ProcessError>(Value::Null) }))
            .build()
            .unwrap();
        let mut rx = scheduler.subscribe();
        scheduler.start();

        let id = scheduler.enqueue("work", Value::Null, EnqueueOptions::new());
        terminal_events(&mut rx, 1).await;
        assert!(scheduler.get_job(id).is_some());

        clock.advance(chrono::Duration::hours(2));
        sleep(Duration::from_millis(1500)).await;
        assert!(scheduler.get_job(id).is_none());
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_type_fails_without_retry() {
        let scheduler = scheduler(1);
        let mut rx = scheduler.subscribe();
        scheduler.start();

        let id = scheduler.enqueue("ghost", Value::Null, EnqueueOptions::new().max_attempts(5));
        let events = terminal_events(&mut rx, 1).await;
        assert!(matches!(&events[0], JobEvent::Failed { error, .. } if error.contains("no processor")));

        let job = scheduler.get_job(id).unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.status(), JobStatus::Failed);
        scheduler.stop().await;
    }

    struct Panics;

    #[async_trait]
    impl Processor for Panics {
        async fn process(&self, _ctx: JobContext) -> Result<Value, ProcessError> {
            panic!("boom")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_processor_is_a_failed_attempt() {
        let scheduler = scheduler(1);
        scheduler.register_processor("panic", Panics);
        let mut rx = scheduler.subscribe();
        scheduler.start();

        let id = scheduler.enqueue("panic", Value::Null, EnqueueOptions::new().max_attempts(2));
        let events = terminal_events(&mut rx, 1).await;
        assert!(matches!(&events[0], JobEvent::Failed { error, .. } if error.contains("panicked")));
        assert_eq!(scheduler.get_job(id).unwrap().attempts, 2);
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn pause_gates_admission_and_resume_keeps_priority() {
        let scheduler = scheduler(1);
        let order = record_names(&scheduler);
        let kinds = Arc::new(Mutex::new(Vec::new()));
        {
            let kinds = Arc::clone(&kinds);
            scheduler.on_any_event(move |e| kinds.lock().unwrap().push(e.kind()));
        }
        let mut rx = scheduler.subscribe();
        scheduler.start();

        scheduler.pause();
        scheduler.pause();
        assert!(scheduler.is_paused());
        scheduler.enqueue("work", json!({"name": "A"}), EnqueueOptions::new().priority(5));
        scheduler.enqueue("work", json!({"name": "B"}), EnqueueOptions::new().priority(10));

        sleep(Duration::from_millis(100)).await;
        assert_eq!(scheduler.stats().waiting, 2);
        assert!(order.lock().unwrap().is_empty());

        scheduler.resume();
        assert!(!scheduler.is_paused());
        terminal_events(&mut rx, 2).await;
        assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);
        assert_eq!(
            *kinds.lock().unwrap(),
            vec![
                EventKind::Paused,
                EventKind::Resumed,
                EventKind::Completed,
                EventKind::Completed
            ]
        );
        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_waits_for_in_flight_handlers() {
        let scheduler = scheduler(2);
        scheduler.register_fn("sleepy", |_ctx| async {
            sleep(Duration::from_millis(500)).await;
            Ok::<_, ProcessError>(Value::Null)
        });

        scheduler.start();
        assert!(scheduler.is_running());
        let id = scheduler.enqueue("sleepy", Value::Null, EnqueueOptions::new());
        sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.stats().in_flight, 1);

        scheduler.stop().await;
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.get_job(id).unwrap().status(), JobStatus::Completed);

        // 停止中は投入しない
        let queued = scheduler.enqueue("sleepy", Value::Null, EnqueueOptions::new());
        sleep(Duration::from_secs(1)).await;
        assert_eq!(scheduler.get_job(queued).unwrap().status(), JobStatus::Waiting);

        // 再開できる
        let mut rx = scheduler.subscribe();
        scheduler.start();
        terminal_events(&mut rx, 1).await;
        assert_eq!(scheduler.get_job(queued).unwrap().status(), JobStatus::Completed);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn new_scheduler_starts_empty() {
        let first = scheduler(1);
        let id = first.enqueue("work", Value::Null, EnqueueOptions::new());
        assert_eq!(first.stats().total, 1);
        drop(first);

        let second = scheduler(1);
        assert!(second.get_job(id).is_none());
        assert_eq!(second.stats(), SchedulerStats::default());
    }

    struct AddOneHandler;

    #[async_trait]
    impl Handler<AddOne> for AddOneHandler {
        async fn handle(&self, task: AddOne, _progress: ProgressHandle) -> Result<Value, ProcessError> {
            Ok(json!(task.value + 1))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn typed_task_roundtrip_through_scheduler() {
        let scheduler = scheduler(1);
        scheduler.register::<AddOne, _>(AddOneHandler);
        assert_eq!(scheduler.stats().registered_types, vec![AddOne::TYPE]);
        let mut rx = scheduler.subscribe();
        scheduler.start();

        let id = scheduler
            .enqueue_task(&AddOne { value: 1 }, EnqueueOptions::new())
            .unwrap();
        assert_eq!(scheduler.get_job(id).unwrap().job_type, AddOne::TYPE);

        let events = terminal_events(&mut rx, 1).await;
        assert!(matches!(&events[0], JobEvent::Completed { result, .. } if *result == json!(2)));
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn list_jobs_filters_and_orders() {
        let scheduler = scheduler(1);
        let low = scheduler.enqueue("a", Value::Null, EnqueueOptions::new().priority(1));
        let high = scheduler.enqueue("a", Value::Null, EnqueueOptions::new().priority(9));
        scheduler.enqueue("b", Value::Null, EnqueueOptions::new());

        let ids: Vec<JobId> = scheduler
            .list_jobs(&JobFilter::new().job_type("a"))
            .into_iter()
            .map(|job| job.id)
            .collect();
        assert_eq!(ids, vec![high, low]);

        let limited = scheduler.list_jobs(&JobFilter::new().status(JobStatus::Waiting).limit(2));
        assert_eq!(limited.len(), 2);
    }
}
