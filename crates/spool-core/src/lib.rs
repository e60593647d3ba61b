//! spool-core
//!
//! In-process job scheduler: priority ordering, bounded concurrency,
//! per-attempt timeouts, retries, cancellation, progress and lifecycle events.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job, events, errors）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator, EventSink）
//! - **queue**: インメモリのジョブストアとリトライポリシー
//! - **registry**: Processor trait と job_type ごとの登録
//! - **typed**: 型付き Task API（Task trait, Handler trait）
//! - **impls**: 実装（EventBus, LogEventSink）
//! - **app**: スケジューラ本体（builder, scheduler, dispatcher, reaper）
//! - **config**: 設定値と検証

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod registry;
pub mod typed;

pub use app::{EnqueueOptions, Scheduler, SchedulerBuilder, SchedulerStats};
pub use config::{ConfigError, SchedulerConfig};
pub use domain::{
    EventKind, Job, JobEvent, JobFailure, JobId, JobOptions, JobStatus, ProcessError, SpoolError,
};
pub use queue::{JobFilter, RetryPolicy};
pub use registry::{JobContext, Processor, ProgressHandle, processor_fn};
pub use typed::{Handler, Task};
