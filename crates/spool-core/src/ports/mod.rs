//! Ports - 抽象化レイヤー
//!
//! スケジューラの外側（時刻、ID 生成、イベント配信）とのインターフェースです。
//! テストや別実装への差し替えはこの境界で行います。

pub mod clock;
pub mod event_sink;
pub mod id_generator;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
