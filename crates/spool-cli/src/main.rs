use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use spool_core::impls::LogEventSink;
use spool_core::{
    EnqueueOptions, EventKind, Handler, JobEvent, JobId, ProcessError, ProgressHandle, RetryPolicy,
    Scheduler, SchedulerConfig, Task,
};

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    name: String,
}

impl Task for Hello {
    const TYPE: &'static str = "demo.hello.v1";
}

struct HelloHandler {
    remaining_failures: AtomicU32,
}

impl HelloHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<Hello> for HelloHandler {
    async fn handle(&self, task: Hello, _progress: ProgressHandle) -> Result<serde_json::Value, ProcessError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(format!("intentional failure (left={left})").into());
        }

        println!("Hello, {}!", task.name);
        Ok(serde_json::json!({ "greeted": task.name }))
    }
}

/// RUST_LOG で絞り込み。SPOOL_LOG_JSON が設定されていれば JSON で出力
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let _ = if std::env::var_os("SPOOL_LOG_JSON").is_some() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// 引数があれば JSON の設定ファイルとして読む
fn load_config() -> anyhow::Result<SchedulerConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file {path}"))?;
            SchedulerConfig::from_json(&raw).with_context(|| format!("invalid config file {path}"))
        }
        None => Ok(SchedulerConfig {
            concurrency: 2,
            retry: RetryPolicy::fixed(Duration::from_millis(200)),
            ..SchedulerConfig::default()
        }),
    }
}

/// 取りこぼした終了イベントはストアの状態で補う（削除済みも終了扱い）
fn drop_finished(scheduler: &Scheduler, pending: &mut Vec<JobId>) {
    pending.retain(|id| {
        scheduler
            .get_job(*id)
            .is_some_and(|job| !job.is_terminal())
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // (A) スケジューラと Processor を用意
    let config = load_config()?;
    let scheduler = Scheduler::builder()
        .config(config)
        .event_sink(Arc::new(LogEventSink))
        .register::<Hello, _>(HelloHandler::new(2))
        .build()?;

    scheduler.register_fn("demo.report", |ctx| async move {
        for step in 1..=4 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            ctx.progress().update(step * 25)?;
        }
        Ok::<_, ProcessError>(serde_json::json!({ "pages": 4 }))
    });

    scheduler.on_event(EventKind::Failed, |event| {
        if let JobEvent::Failed { job, error } = event {
            eprintln!("job {} failed: {error}", job.id);
        }
    });

    // (B) start 前に投入: 優先度の高い順に流れる
    let mut events = scheduler.subscribe();
    let mut pending = vec![
        scheduler.enqueue_task(&Hello { name: "spool".into() }, EnqueueOptions::new().priority(1))?,
        scheduler.enqueue("demo.report", serde_json::Value::Null, EnqueueOptions::new().priority(10)),
        scheduler.enqueue("demo.missing", serde_json::Value::Null, EnqueueOptions::new()),
    ];
    for id in &pending {
        println!("enqueued job: {id}");
    }

    // (C) 起動して、全ジョブの終了をイベントで待つ
    scheduler.start();
    while !pending.is_empty() {
        match events.recv().await {
            Ok(event) => {
                let terminal = matches!(
                    event.kind(),
                    EventKind::Completed | EventKind::Failed | EventKind::Cancelled
                );
                if let (true, Some(job)) = (terminal, event.job()) {
                    pending.retain(|id| *id != job.id);
                    println!(
                        "finished: id={} type={} status={:?} attempts={}",
                        job.id,
                        job.job_type,
                        job.status(),
                        job.attempts
                    );
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event receiver lagged, re-checking pending jobs");
                drop_finished(&scheduler, &mut pending);
            }
            Err(RecvError::Closed) => break,
        }
    }

    println!("stats: {}", serde_json::to_string_pretty(&scheduler.stats())?);

    // (D) 実行中のハンドラを待って止める
    scheduler.stop().await;
    Ok(())
}
