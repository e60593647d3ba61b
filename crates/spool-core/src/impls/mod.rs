//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **EventBus**: プロセス内のリスナー + broadcast チャネル
//! - **LogEventSink**: tracing への書き出し

pub mod event_bus;
pub mod log_sink;

pub use self::event_bus::EventBus;
pub use self::log_sink::LogEventSink;
