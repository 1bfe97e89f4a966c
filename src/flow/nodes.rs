use std::fmt;
use std::sync::Arc;

use crate::behavior::{ActivityBehavior, ExecutionListener, ListenerEvent};
use crate::flow::conditions::Condition;
use crate::state::VariableChangeFilter;

/// 事件触发类型
#[derive(Clone)]
pub enum EventTrigger {
    None,
    /// None 表示捕获任意错误码
    Error(Option<String>),
    Message(String),
    Signal(String),
    Conditional(Condition),
    VariableListener {
        variable: String,
        change: VariableChangeFilter,
    },
    Compensate,
}

impl EventTrigger {
    pub fn name(&self) -> &'static str {
        match self {
            EventTrigger::None => "none",
            EventTrigger::Error(_) => "error",
            EventTrigger::Message(_) => "message",
            EventTrigger::Signal(_) => "signal",
            EventTrigger::Conditional(_) => "conditional",
            EventTrigger::VariableListener { .. } => "variable-listener",
            EventTrigger::Compensate => "compensate",
        }
    }

    /// 错误码匹配：精确匹配或捕获全部
    pub fn catches_error(&self, code: &str) -> Option<bool> {
        match self {
            EventTrigger::Error(Some(expected)) if expected == code => Some(true),
            EventTrigger::Error(None) => Some(false),
            _ => None,
        }
    }
}

/// 结束事件类型
#[derive(Clone, Debug)]
pub enum EndEventKind {
    None,
    Error(String),
    Terminate,
    /// 可选的补偿目标活动
    Compensate(Option<String>),
}

/// 中间抛出事件类型
#[derive(Clone, Debug)]
pub enum ThrowEventKind {
    None,
    Signal(String),
    Compensate(Option<String>),
}

/// 多实例特性
#[derive(Clone)]
pub struct MultiInstanceSpec {
    pub sequential: bool,
    pub cardinality: Option<usize>,
    /// 存放数组的变量名
    pub collection: Option<String>,
    pub element_variable: Option<String>,
    pub completion_condition: Option<Condition>,
    /// 并行实例完成后通过作业异步检查整体完成
    pub async_leave: bool,
}

impl MultiInstanceSpec {
    pub fn parallel(cardinality: usize) -> Self {
        Self {
            sequential: false,
            cardinality: Some(cardinality),
            collection: None,
            element_variable: None,
            completion_condition: None,
            async_leave: false,
        }
    }

    pub fn sequential(cardinality: usize) -> Self {
        Self {
            sequential: true,
            ..Self::parallel(cardinality)
        }
    }

    pub fn over_collection(
        collection: impl Into<String>,
        element_variable: impl Into<String>,
        sequential: bool,
    ) -> Self {
        Self {
            sequential,
            cardinality: None,
            collection: Some(collection.into()),
            element_variable: Some(element_variable.into()),
            completion_condition: None,
            async_leave: false,
        }
    }

    pub fn with_completion_condition(mut self, condition: Condition) -> Self {
        self.completion_condition = Some(condition);
        self
    }

    pub fn with_async_leave(mut self) -> Self {
        self.async_leave = true;
        self
    }
}

/// 自由子流程配置
#[derive(Clone, Default)]
pub struct AdhocSpec {
    pub completion_condition: Option<Condition>,
    pub cancel_remaining_instances: bool,
}

/// 调用活动配置
#[derive(Clone, Debug, Default)]
pub struct CallActivitySpec {
    pub called_element: String,
    /// (调用方变量, 被调用流程变量)
    pub inputs: Vec<(String, String)>,
    /// (被调用流程变量, 调用方变量)
    pub outputs: Vec<(String, String)>,
}

/// 节点类型
#[derive(Clone)]
pub enum FlowNodeKind {
    StartEvent {
        trigger: EventTrigger,
        interrupting: bool,
    },
    EndEvent(EndEventKind),
    IntermediateCatch(EventTrigger),
    IntermediateThrow(ThrowEventKind),
    BoundaryEvent {
        attached_to: String,
        trigger: EventTrigger,
        interrupting: bool,
    },
    /// 无行为的任务，直接通过
    Task,
    ServiceTask {
        handler: String,
    },
    UserTask,
    ReceiveTask,
    ExclusiveGateway,
    ParallelGateway,
    SubProcess,
    EventSubProcess,
    AdhocSubProcess(AdhocSpec),
    CallActivity(CallActivitySpec),
    /// 用户提供行为的节点
    Custom,
}

impl FlowNodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            FlowNodeKind::StartEvent { .. } => "startEvent",
            FlowNodeKind::EndEvent(_) => "endEvent",
            FlowNodeKind::IntermediateCatch(_) => "intermediateCatchEvent",
            FlowNodeKind::IntermediateThrow(_) => "intermediateThrowEvent",
            FlowNodeKind::BoundaryEvent { .. } => "boundaryEvent",
            FlowNodeKind::Task => "task",
            FlowNodeKind::ServiceTask { .. } => "serviceTask",
            FlowNodeKind::UserTask => "userTask",
            FlowNodeKind::ReceiveTask => "receiveTask",
            FlowNodeKind::ExclusiveGateway => "exclusiveGateway",
            FlowNodeKind::ParallelGateway => "parallelGateway",
            FlowNodeKind::SubProcess => "subProcess",
            FlowNodeKind::EventSubProcess => "eventSubProcess",
            FlowNodeKind::AdhocSubProcess(_) => "adHocSubProcess",
            FlowNodeKind::CallActivity(_) => "callActivity",
            FlowNodeKind::Custom => "custom",
        }
    }
}

/// 流程节点
#[derive(Clone)]
pub struct FlowNode {
    pub id: String,
    pub name: Option<String>,
    pub kind: FlowNodeKind,
    /// 所在的子流程容器，None 表示流程级
    pub parent: Option<String>,
    pub asynchronous: bool,
    pub exclusive: bool,
    pub for_compensation: bool,
    pub default_flow: Option<String>,
    pub boundary_events: Vec<String>,
    pub multi_instance: Option<MultiInstanceSpec>,
    pub listeners: Vec<(ListenerEvent, Arc<dyn ExecutionListener>)>,
    /// None 表示直通节点
    pub behavior: Option<Arc<dyn ActivityBehavior>>,
}

impl FlowNode {
    pub fn new(id: impl Into<String>, kind: FlowNodeKind) -> Self {
        Self {
            id: id.into(),
            name: None,
            kind,
            parent: None,
            asynchronous: false,
            exclusive: true,
            for_compensation: false,
            default_flow: None,
            boundary_events: Vec::new(),
            multi_instance: None,
            listeners: Vec::new(),
            behavior: None,
        }
    }

    /// 进入时需要创建子作用域执行的容器节点
    pub fn is_sub_process_container(&self) -> bool {
        matches!(
            self.kind,
            FlowNodeKind::SubProcess | FlowNodeKind::AdhocSubProcess(_)
        )
    }

    pub fn is_boundary_event(&self) -> bool {
        matches!(self.kind, FlowNodeKind::BoundaryEvent { .. })
    }

    pub fn is_parallel_gateway(&self) -> bool {
        matches!(self.kind, FlowNodeKind::ParallelGateway)
    }

    pub fn is_event_sub_process(&self) -> bool {
        matches!(self.kind, FlowNodeKind::EventSubProcess)
    }

    pub fn listeners_for(&self, event: ListenerEvent) -> Vec<Arc<dyn ExecutionListener>> {
        self.listeners
            .iter()
            .filter(|(kind, _)| *kind == event)
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl fmt::Debug for FlowNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowNode")
            .field("id", &self.id)
            .field("kind", &self.kind.name())
            .field("parent", &self.parent)
            .field("asynchronous", &self.asynchronous)
            .field("multi_instance", &self.multi_instance.is_some())
            .field("has_behavior", &self.behavior.is_some())
            .finish()
    }
}
