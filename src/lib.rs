pub mod behavior;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod history;
pub mod jobs;
pub mod runtime;
pub mod state;
pub mod utils;

pub use behavior::{
    handler_from_fn, listener_from_fn, ActivityBehavior, DelegateExecution, ExecutionListener,
    HandlerRegistry, ListenerEvent, TaskHandler,
};
pub use config::{EngineConfig, EnvConfig};
pub use error::{EngineError, ErrorKind, Result};
pub use events::{EngineEvent, EngineEventKind, EngineEventListener, EventDispatcher};
pub use flow::{
    condition_always, condition_from_fn, condition_variable_absent, condition_variable_equals,
    condition_variable_exists, condition_variable_not_equals, AdhocSpec, CallActivitySpec,
    Condition, Element, EndEventKind, EventTrigger, FlowNode, FlowNodeKind, MultiInstanceSpec,
    ProcessBuilder, ProcessDefinition, ProcessRegistry, SequenceFlow, ThrowEventKind,
};
pub use history::{ActivityGuard, ActivityRecord, HistorySink, MemoryHistory, NoopHistory, ProcessRecord};
pub use jobs::{Job, JobExecutor, JobExecutorHandle, JobId, JobKind, JobRunSummary, JobService, JobState};
pub use runtime::{
    ActivityBreakpoints, Agenda, CommandContext, EngineServices, Operation, ProcessDebugger,
    ProcessEngine, ProcessEngineBuilder,
};
#[cfg(feature = "memory-store")]
pub use state::MemoryStore;
pub use state::{
    ChangeSet, EntityStore, EventSubscription, Execution, ExecutionId, ExecutionTree,
    SubscriptionKind, UnitOfWork, VariableChange, VariableChangeFilter, VariableChangeType,
    VariableView,
};
pub use utils::{logging, validation};
