//! EventSink port - ライフサイクルイベントの配信先
//!
//! Dispatcher はこの trait だけを知っています。
//! プロセス内リスナー、チャネル、外部バスなどはすべて実装側の詳細です。

use crate::domain::JobEvent;

/// EventSink はイベントを受け取る
///
/// # 契約
/// - 遷移が起きた順に 1 件ずつ呼ばれる（バッチなし）
/// - ジョブストアのロックの外で呼ばれるので、スケジューラを呼び戻してよい
/// - ブロックしてはいけない（後続のイベント配信が止まる）
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &JobEvent);
}
