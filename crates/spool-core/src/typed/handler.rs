//! Handler trait - 型付き Task を実行する Handler の定義
//!
//! - 表層: `Handler<T>` - 型安全
//! - 内部: `TypedProcessor<T, H>` - payload をデコードして `Processor` として振る舞う

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::domain::ProcessError;
use crate::registry::{JobContext, Processor, ProgressHandle};

/// Handler は Task を実行して結果を返す
///
/// # 使用例
/// ```ignore
/// struct SendEmailHandler;
///
/// #[async_trait]
/// impl Handler<SendEmail> for SendEmailHandler {
///     async fn handle(&self, task: SendEmail, progress: ProgressHandle)
///         -> Result<serde_json::Value, ProcessError> {
///         Ok(serde_json::json!({"to": task.to}))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(
        &self,
        task: T,
        progress: ProgressHandle,
    ) -> Result<serde_json::Value, ProcessError>;
}

/// Type erasure: `Handler<T>` を `Processor` に変換する
pub struct TypedProcessor<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedProcessor<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> Processor for TypedProcessor<T, H> {
    async fn process(&self, ctx: JobContext) -> Result<serde_json::Value, ProcessError> {
        let (job, progress) = ctx.into_parts();
        // デコード失敗は通常の失敗として扱う（リトライ対象）
        let task: T = serde_json::from_value(job.payload)?;
        self.handler.handle(task, progress).await
    }
}
