//! ReaperLoop - 保持期間を過ぎた終了済みジョブの回収
//!
//! # フロー
//! 1. 一定間隔で起きる
//! 2. completed / failed のジョブのうち、終了時刻から retention を超えたものを削除
//! 3. waiting / processing のジョブには触らない（詰まりは監視で検出する）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::dispatcher::Dispatcher;
use crate::queue::deadline_after;

/// Handle to a running reaper task.
/// - `shutdown_and_join()` で停止して終了を待つ
pub(crate) struct ReaperLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ReaperLoop {
    pub(crate) fn spawn(dispatcher: Arc<Dispatcher>, interval: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(reaper_loop(dispatcher, interval, shutdown_rx));
        Self { shutdown_tx, join }
    }

    /// Signal the loop without waiting for it to exit.
    pub(crate) fn request_shutdown(&self) {
        // receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    pub(crate) async fn shutdown_and_join(self) {
        self.request_shutdown();
        if let Err(e) = self.join.await {
            tracing::error!("reaper task ended abnormally: {e}");
        }
    }
}

async fn reaper_loop(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    // 最初の tick は 1 周期後
    let first = deadline_after(tokio::time::Instant::now(), interval);
    let mut ticker = tokio::time::interval_at(first, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                // 次のループで判定
                continue;
            }
            _ = ticker.tick() => {
                dispatcher.reap();
            }
        }
    }
    tracing::debug!("reaper loop stopped");
}
