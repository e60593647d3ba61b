//! App - アプリケーション層
//!
//! ports とジョブストアを組み合わせてスケジューラを実装します。
//!
//! # 主要コンポーネント
//! - **SchedulerBuilder**: スケジューラの構築とワイヤリング
//! - **Scheduler**: 呼び出し側に見える表面
//! - **Dispatcher**: 投入・タイムアウト・リトライ・イベント発行
//! - **ReaperLoop**: 保持期間を過ぎた終了済みジョブの回収

pub mod builder;
pub(crate) mod dispatcher;
pub(crate) mod reaper_loop;
pub mod scheduler;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::SchedulerBuilder;
pub use self::scheduler::{EnqueueOptions, Scheduler};
pub use self::status::SchedulerStats;
