use crate::types::{EngineEvent, EngineEventKind};
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error};

pub type EventHandler = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// 引擎实例内的事件总线
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<HashMap<EngineEventKind, Vec<EventHandler>>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn on(&self, kind: EngineEventKind, handler: EventHandler) {
        self.handlers.write().await.entry(kind).or_default().push(handler);
    }

    /// 依次调用该类事件的处理器,处理器 panic 只记录日志
    pub async fn emit(&self, event: &EngineEvent) {
        let kind = event.kind();
        let handlers = match self.handlers.read().await.get(&kind) {
            Some(handlers) => handlers.clone(),
            None => return,
        };

        debug!(?kind, handlers = handlers.len(), "分发事件");
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                error!(?kind, "事件处理器 panic, 已忽略");
            }
        }
    }

    pub async fn emit_all(&self, events: &[EngineEvent]) {
        for event in events {
            self.emit(event).await;
        }
    }
}
