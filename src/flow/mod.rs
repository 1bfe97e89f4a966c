// Flow 模块 - 编译后的流程图定义

pub mod builder;
pub mod conditions;
pub mod constants;
pub mod nodes;
pub mod registry;
pub mod types;

// 重新导出核心类型
pub use builder::ProcessBuilder;
pub use conditions::{
    condition_always, condition_from_fn, condition_variable_absent, condition_variable_equals,
    condition_variable_exists, condition_variable_not_equals, Condition,
};
pub use nodes::{
    AdhocSpec, CallActivitySpec, EndEventKind, EventTrigger, FlowNode, FlowNodeKind,
    MultiInstanceSpec, ThrowEventKind,
};
pub use registry::ProcessRegistry;
pub use types::{Element, ProcessDefinition, SequenceFlow};
