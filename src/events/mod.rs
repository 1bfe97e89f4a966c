// 引擎事件分发

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::state::Execution;

/// 引擎事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EngineEventKind {
    ProcessStarted,
    ProcessCompleted,
    ActivityStarted,
    ActivityCompleted,
    ActivityCancelled,
    SequenceFlowTaken,
    JobFailed,
    JobDeadLettered,
    MultiInstanceCompleted,
}

/// 引擎事件
#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    pub kind: EngineEventKind,
    pub process_instance_id: Option<String>,
    pub execution_id: Option<String>,
    pub element_id: Option<String>,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl EngineEvent {
    pub fn new(kind: EngineEventKind) -> Self {
        Self {
            kind,
            process_instance_id: None,
            execution_id: None,
            element_id: None,
            payload: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn for_execution(kind: EngineEventKind, execution: &Execution) -> Self {
        Self {
            process_instance_id: Some(execution.process_instance_id.clone()),
            execution_id: Some(execution.id.clone()),
            element_id: execution.current_element.clone(),
            ..Self::new(kind)
        }
    }

    pub fn with_element(mut self, element_id: impl Into<String>) -> Self {
        self.element_id = Some(element_id.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// 引擎事件监听器
///
/// 返回的错误和发生的 panic 都会被分发器隔离，不影响正在执行的事务。
pub trait EngineEventListener: Send + Sync {
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()>;

    fn accepts(&self, _kind: EngineEventKind) -> bool {
        true
    }
}

impl<F> EngineEventListener for F
where
    F: Fn(&EngineEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &EngineEvent) -> anyhow::Result<()> {
        (self)(event)
    }
}

/// 事件分发器
#[derive(Default)]
pub struct EventDispatcher {
    listeners: RwLock<Vec<Arc<dyn EngineEventListener>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn EngineEventListener>) {
        self.listeners.write().push(listener);
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn dispatch(&self, event: EngineEvent) {
        let listeners: Vec<Arc<dyn EngineEventListener>> = self.listeners.read().clone();
        for listener in listeners {
            if !listener.accepts(event.kind) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(kind = ?event.kind, error = %err, "event listener failed");
                }
                Err(_) => {
                    warn!(kind = ?event.kind, "event listener panicked");
                }
            }
        }
    }
}
