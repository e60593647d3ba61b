//! Typed - 型付き Task API
//!
//! job_type の typo を型で排除し、payload の型と Handler の対応を静的に保証します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `Processor` trait - object-safe, type erasure

pub mod handler;
pub mod task;

pub use self::handler::{Handler, TypedProcessor};
pub use self::task::Task;
