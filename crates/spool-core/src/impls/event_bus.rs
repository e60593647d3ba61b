//! EventBus - プロセス内のイベント配信
//!
//! 1 つのイベントを次の順に配信します:
//! 1. `on` で登録されたリスナー（種類でフィルタ）
//! 2. `attach` された追加の EventSink
//! 3. broadcast チャネル（`subscribe` の受信側）

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::domain::{EventKind, JobEvent};
use crate::ports::EventSink;

type Listener = Box<dyn Fn(&JobEvent) + Send + Sync>;

pub struct EventBus {
    listeners: RwLock<Vec<(Option<EventKind>, Listener)>>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    tx: broadcast::Sender<JobEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            listeners: RwLock::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
            tx,
        }
    }

    /// Register a listener for one event kind.
    pub fn on<F>(&self, kind: EventKind, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.push_listener(Some(kind), Box::new(listener));
    }

    /// Register a listener for every event.
    pub fn on_any<F>(&self, listener: F)
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.push_listener(None, Box::new(listener));
    }

    /// Attach another sink (external bus, log shipping, ...).
    pub fn attach(&self, sink: Arc<dyn EventSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Receive every event from now on. A slow receiver may observe `Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }

    fn push_listener(&self, kind: Option<EventKind>, listener: Listener) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((kind, listener));
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &JobEvent) {
        let kind = event.kind();
        {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            for (filter, listener) in listeners.iter() {
                if filter.is_none_or(|k| k == kind) {
                    listener(event);
                }
            }
        }
        {
            let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner);
            for sink in sinks.iter() {
                sink.emit(event);
            }
        }
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
    }
}
