use std::sync::Arc;

use crate::behavior::HandlerRegistry;
use crate::config::EngineConfig;
use crate::events::EventDispatcher;
use crate::flow::ProcessRegistry;
use crate::history::HistorySink;
use crate::state::EntityStore;

use super::debugger::ProcessDebugger;

/// 引擎共享服务，所有命令上下文共用
pub struct EngineServices {
    pub config: EngineConfig,
    pub store: Arc<dyn EntityStore>,
    pub registry: ProcessRegistry,
    pub handlers: HandlerRegistry,
    pub events: EventDispatcher,
    pub history: Arc<dyn HistorySink>,
    pub debugger: Option<Arc<dyn ProcessDebugger>>,
}
