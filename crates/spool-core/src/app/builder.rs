//! SchedulerBuilder - スケジューラの構築とワイヤリング
//!
//! - Builder パターン
//! - 起動時検証（Fail-fast 設計）

use std::sync::Arc;

use super::dispatcher::{DispatchSettings, Dispatcher};
use super::scheduler::Scheduler;
use crate::config::SchedulerConfig;
use crate::domain::SpoolError;
use crate::impls::EventBus;
use crate::ports::{Clock, EventSink, IdGenerator, SystemClock, UlidGenerator};
use crate::registry::{Processor, ProcessorRegistry};
use crate::typed::{Handler, Task, TypedProcessor};

/// SchedulerBuilder はスケジューラを構築
///
/// # 使用例
/// ```ignore
/// let scheduler = SchedulerBuilder::new()
///     .config(config)
///     .register::<SendEmail, _>(SendEmailHandler)
///     .expect_types(&[SendEmail::TYPE, "report.render"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_types() で期待される job_type を登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば SpoolError::MissingProcessors を返す
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    registry: ProcessorRegistry,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    sinks: Vec<Arc<dyn EventSink>>,
    expected_types: Option<Vec<String>>,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            registry: ProcessorRegistry::new(),
            clock: None,
            ids: None,
            sinks: Vec::new(),
            expected_types: None,
        }
    }

    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn id_generator(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(ids));
        self
    }

    /// Attach an extra sink next to the built-in event bus.
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn processor(self, job_type: impl Into<String>, processor: impl Processor + 'static) -> Self {
        self.registry.register(job_type, Arc::new(processor));
        self
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(self, handler: H) -> Self {
        self.registry
            .register(T::TYPE, Arc::new(TypedProcessor::<T, H>::new(handler)));
        self
    }

    /// 期待される job_type のリストを設定
    pub fn expect_types(mut self, job_types: &[&str]) -> Self {
        self.expected_types = Some(job_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// # 検証
    /// - 設定値が妥当か
    /// - expect_types() で設定された job_type が全て登録されているか
    pub fn build(self) -> Result<Scheduler, SpoolError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_types {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(SpoolError::MissingProcessors(missing));
            }
        }

        let events = Arc::new(EventBus::new(self.config.event_capacity));
        for sink in self.sinks {
            events.attach(sink);
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let settings = DispatchSettings {
            concurrency: self.config.concurrency,
            default_max_attempts: self.config.default_max_attempts,
            job_timeout: self.config.job_timeout(),
            retry: self.config.retry.clone(),
            retention: self.config.retention(),
        };
        let dispatcher = Dispatcher::new(
            settings,
            self.registry,
            Arc::clone(&events) as Arc<dyn EventSink>,
            clock,
            ids,
        );

        Ok(Scheduler::from_parts(
            Arc::new(dispatcher),
            events,
            self.config.reap_interval(),
        ))
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
