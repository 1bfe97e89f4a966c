// 运行时：议程、操作状态机和命令层

mod agenda;
mod conditional;
mod context;
mod continue_process;
mod debugger;
mod destroy_scope;
mod executor;
mod processor;
mod services;
mod take_outgoing;
mod trigger;
mod types;
mod variable_listener;

pub(crate) mod compensation;
pub(crate) mod end_execution;
pub(crate) mod error_propagation;
pub(crate) mod multi_instance;
pub(crate) mod process_instance;
pub(crate) mod scopes;

pub use agenda::Agenda;
pub use context::CommandContext;
pub use debugger::{ActivityBreakpoints, ProcessDebugger};
pub use executor::{ProcessEngine, ProcessEngineBuilder};
pub use services::EngineServices;
pub use types::Operation;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use crate::behavior::HandlerRegistry;
    use crate::config::EngineConfig;
    use crate::events::EventDispatcher;
    use crate::flow::{ProcessDefinition, ProcessRegistry};
    use crate::history::NoopHistory;
    use crate::state::MemoryStore;

    use super::{CommandContext, EngineServices};

    /// 只部署一个流程定义的命令上下文，用于单步驱动操作
    pub(crate) fn context_with(definition: ProcessDefinition) -> CommandContext {
        let registry = ProcessRegistry::new();
        registry.register(definition);
        let services = EngineServices {
            config: EngineConfig::default(),
            store: Arc::new(MemoryStore::new()),
            registry,
            handlers: HandlerRegistry::new(),
            events: EventDispatcher::new(),
            history: Arc::new(NoopHistory),
            debugger: None,
        };
        CommandContext::new(Arc::new(services))
    }
}
