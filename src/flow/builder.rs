use std::collections::HashMap;
use std::sync::Arc;

use crate::behavior::{default_behavior, ActivityBehavior, ExecutionListener, ListenerEvent};
use crate::error::{EngineError, Result};
use crate::flow::conditions::Condition;
use crate::flow::nodes::{
    AdhocSpec, CallActivitySpec, EndEventKind, EventTrigger, FlowNode, FlowNodeKind,
    MultiInstanceSpec, ThrowEventKind,
};
use crate::flow::types::{ProcessDefinition, SequenceFlow};
use crate::state::VariableChangeFilter;
use crate::utils::validation::ProcessValidator;

/// 流程定义构建器
///
/// 节点添加到当前容器中；`sub_process` 等方法在闭包内切换容器：
/// ```
/// use processflow::ProcessBuilder;
///
/// let mut builder = ProcessBuilder::new("order");
/// builder
///     .start_event("start")
///     .sub_process("review", |sub| {
///         sub.start_event("review_start")
///             .user_task("approve")
///             .end_event("review_end")
///             .flow("review_start", "approve")
///             .flow("approve", "review_end");
///     })
///     .end_event("end")
///     .flow("start", "review")
///     .flow("review", "end");
/// let definition = builder.build().unwrap();
/// assert_eq!(definition.initial.as_deref(), Some("start"));
/// ```
pub struct ProcessBuilder {
    key: String,
    name: Option<String>,
    nodes: HashMap<String, FlowNode>,
    flows: Vec<SequenceFlow>,
    initial: Option<String>,
    containers: Vec<String>,
    listeners: Vec<(ListenerEvent, Arc<dyn ExecutionListener>)>,
    flow_listeners: Vec<(String, Arc<dyn ExecutionListener>)>,
    compensation_handlers: HashMap<String, String>,
    errors: Vec<String>,
}

impl ProcessBuilder {
    pub fn new<T: Into<String>>(key: T) -> Self {
        Self {
            key: key.into(),
            name: None,
            nodes: HashMap::new(),
            flows: Vec::new(),
            initial: None,
            containers: Vec::new(),
            listeners: Vec::new(),
            flow_listeners: Vec::new(),
            compensation_handlers: HashMap::new(),
            errors: Vec::new(),
        }
    }

    pub fn name(&mut self, name: impl Into<String>) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    fn add_node(&mut self, id: &str, kind: FlowNodeKind) -> &mut Self {
        if self.nodes.contains_key(id) {
            self.errors.push(format!("duplicate element id `{id}`"));
            return self;
        }
        let mut node = FlowNode::new(id, kind);
        node.parent = self.containers.last().cloned();
        if node.parent.is_none()
            && self.initial.is_none()
            && matches!(
                node.kind,
                FlowNodeKind::StartEvent {
                    trigger: EventTrigger::None,
                    ..
                }
            )
        {
            self.initial = Some(id.to_string());
        }
        self.nodes.insert(id.to_string(), node);
        self
    }

    fn with_node(&mut self, id: &str, apply: impl FnOnce(&mut FlowNode)) -> &mut Self {
        match self.nodes.get_mut(id) {
            Some(node) => apply(node),
            None => self.errors.push(format!("unknown element `{id}`")),
        }
        self
    }

    fn in_container(&mut self, id: &str, build: impl FnOnce(&mut ProcessBuilder)) -> &mut Self {
        self.containers.push(id.to_string());
        build(self);
        self.containers.pop();
        self
    }

    // ---- events ----

    pub fn start_event(&mut self, id: &str) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::StartEvent {
                trigger: EventTrigger::None,
                interrupting: true,
            },
        )
    }

    pub fn message_start_event(&mut self, id: &str, message: &str, interrupting: bool) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::StartEvent {
                trigger: EventTrigger::Message(message.to_string()),
                interrupting,
            },
        )
    }

    pub fn signal_start_event(&mut self, id: &str, signal: &str, interrupting: bool) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::StartEvent {
                trigger: EventTrigger::Signal(signal.to_string()),
                interrupting,
            },
        )
    }

    pub fn error_start_event(&mut self, id: &str, error_code: Option<&str>) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::StartEvent {
                trigger: EventTrigger::Error(error_code.map(str::to_string)),
                interrupting: true,
            },
        )
    }

    pub fn conditional_start_event(
        &mut self,
        id: &str,
        condition: Condition,
        interrupting: bool,
    ) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::StartEvent {
                trigger: EventTrigger::Conditional(condition),
                interrupting,
            },
        )
    }

    pub fn variable_listener_start_event(
        &mut self,
        id: &str,
        variable: &str,
        change: VariableChangeFilter,
        interrupting: bool,
    ) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::StartEvent {
                trigger: EventTrigger::VariableListener {
                    variable: variable.to_string(),
                    change,
                },
                interrupting,
            },
        )
    }

    pub fn end_event(&mut self, id: &str) -> &mut Self {
        self.add_node(id, FlowNodeKind::EndEvent(EndEventKind::None))
    }

    pub fn error_end_event(&mut self, id: &str, error_code: &str) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::EndEvent(EndEventKind::Error(error_code.to_string())),
        )
    }

    pub fn terminate_end_event(&mut self, id: &str) -> &mut Self {
        self.add_node(id, FlowNodeKind::EndEvent(EndEventKind::Terminate))
    }

    pub fn compensation_end_event(&mut self, id: &str, activity: Option<&str>) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::EndEvent(EndEventKind::Compensate(activity.map(str::to_string))),
        )
    }

    pub fn message_catch(&mut self, id: &str, message: &str) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::IntermediateCatch(EventTrigger::Message(message.to_string())),
        )
    }

    pub fn signal_catch(&mut self, id: &str, signal: &str) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::IntermediateCatch(EventTrigger::Signal(signal.to_string())),
        )
    }

    pub fn conditional_catch(&mut self, id: &str, condition: Condition) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::IntermediateCatch(EventTrigger::Conditional(condition)),
        )
    }

    pub fn variable_listener_catch(
        &mut self,
        id: &str,
        variable: &str,
        change: VariableChangeFilter,
    ) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::IntermediateCatch(EventTrigger::VariableListener {
                variable: variable.to_string(),
                change,
            }),
        )
    }

    pub fn none_throw(&mut self, id: &str) -> &mut Self {
        self.add_node(id, FlowNodeKind::IntermediateThrow(ThrowEventKind::None))
    }

    pub fn signal_throw(&mut self, id: &str, signal: &str) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::IntermediateThrow(ThrowEventKind::Signal(signal.to_string())),
        )
    }

    pub fn compensation_throw(&mut self, id: &str, activity: Option<&str>) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::IntermediateThrow(ThrowEventKind::Compensate(
                activity.map(str::to_string),
            )),
        )
    }

    // ---- boundary events ----

    pub fn boundary_event(
        &mut self,
        id: &str,
        attached_to: &str,
        trigger: EventTrigger,
        interrupting: bool,
    ) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::BoundaryEvent {
                attached_to: attached_to.to_string(),
                trigger,
                interrupting,
            },
        )
    }

    pub fn error_boundary(&mut self, id: &str, attached_to: &str, error_code: Option<&str>) -> &mut Self {
        self.boundary_event(
            id,
            attached_to,
            EventTrigger::Error(error_code.map(str::to_string)),
            true,
        )
    }

    pub fn message_boundary(
        &mut self,
        id: &str,
        attached_to: &str,
        message: &str,
        interrupting: bool,
    ) -> &mut Self {
        self.boundary_event(
            id,
            attached_to,
            EventTrigger::Message(message.to_string()),
            interrupting,
        )
    }

    pub fn signal_boundary(
        &mut self,
        id: &str,
        attached_to: &str,
        signal: &str,
        interrupting: bool,
    ) -> &mut Self {
        self.boundary_event(
            id,
            attached_to,
            EventTrigger::Signal(signal.to_string()),
            interrupting,
        )
    }

    pub fn conditional_boundary(
        &mut self,
        id: &str,
        attached_to: &str,
        condition: Condition,
        interrupting: bool,
    ) -> &mut Self {
        self.boundary_event(
            id,
            attached_to,
            EventTrigger::Conditional(condition),
            interrupting,
        )
    }

    pub fn variable_listener_boundary(
        &mut self,
        id: &str,
        attached_to: &str,
        variable: &str,
        change: VariableChangeFilter,
        interrupting: bool,
    ) -> &mut Self {
        self.boundary_event(
            id,
            attached_to,
            EventTrigger::VariableListener {
                variable: variable.to_string(),
                change,
            },
            interrupting,
        )
    }

    /// 为活动关联补偿处理活动
    pub fn compensation_handler(&mut self, activity: &str, handler: &str) -> &mut Self {
        let boundary_id = format!("{activity}_compensation");
        self.boundary_event(&boundary_id, activity, EventTrigger::Compensate, true);
        self.compensation_handlers
            .insert(activity.to_string(), handler.to_string());
        self
    }

    // ---- activities ----

    pub fn task(&mut self, id: &str) -> &mut Self {
        self.add_node(id, FlowNodeKind::Task)
    }

    pub fn service_task(&mut self, id: &str, handler: &str) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::ServiceTask {
                handler: handler.to_string(),
            },
        )
    }

    pub fn user_task(&mut self, id: &str) -> &mut Self {
        self.add_node(id, FlowNodeKind::UserTask)
    }

    pub fn receive_task(&mut self, id: &str) -> &mut Self {
        self.add_node(id, FlowNodeKind::ReceiveTask)
    }

    pub fn custom_node(&mut self, id: &str, behavior: Arc<dyn ActivityBehavior>) -> &mut Self {
        self.add_node(id, FlowNodeKind::Custom);
        self.with_node(id, |node| node.behavior = Some(behavior))
    }

    pub fn exclusive_gateway(&mut self, id: &str) -> &mut Self {
        self.add_node(id, FlowNodeKind::ExclusiveGateway)
    }

    pub fn parallel_gateway(&mut self, id: &str) -> &mut Self {
        self.add_node(id, FlowNodeKind::ParallelGateway)
    }

    pub fn sub_process(&mut self, id: &str, build: impl FnOnce(&mut ProcessBuilder)) -> &mut Self {
        self.add_node(id, FlowNodeKind::SubProcess);
        self.in_container(id, build)
    }

    pub fn event_sub_process(
        &mut self,
        id: &str,
        build: impl FnOnce(&mut ProcessBuilder),
    ) -> &mut Self {
        self.add_node(id, FlowNodeKind::EventSubProcess);
        self.in_container(id, build)
    }

    pub fn adhoc_sub_process(
        &mut self,
        id: &str,
        spec: AdhocSpec,
        build: impl FnOnce(&mut ProcessBuilder),
    ) -> &mut Self {
        self.add_node(id, FlowNodeKind::AdhocSubProcess(spec));
        self.in_container(id, build)
    }

    pub fn call_activity(&mut self, id: &str, called_element: &str) -> &mut Self {
        self.add_node(
            id,
            FlowNodeKind::CallActivity(CallActivitySpec {
                called_element: called_element.to_string(),
                ..CallActivitySpec::default()
            }),
        )
    }

    pub fn call_activity_input(&mut self, id: &str, source: &str, target: &str) -> &mut Self {
        let (source, target) = (source.to_string(), target.to_string());
        self.with_node(id, move |node| {
            if let FlowNodeKind::CallActivity(spec) = &mut node.kind {
                spec.inputs.push((source, target));
            }
        })
    }

    pub fn call_activity_output(&mut self, id: &str, source: &str, target: &str) -> &mut Self {
        let (source, target) = (source.to_string(), target.to_string());
        self.with_node(id, move |node| {
            if let FlowNodeKind::CallActivity(spec) = &mut node.kind {
                spec.outputs.push((source, target));
            }
        })
    }

    // ---- node characteristics ----

    pub fn node_name(&mut self, id: &str, name: &str) -> &mut Self {
        let name = name.to_string();
        self.with_node(id, move |node| node.name = Some(name))
    }

    pub fn asynchronous(&mut self, id: &str) -> &mut Self {
        self.with_node(id, |node| node.asynchronous = true)
    }

    pub fn non_exclusive(&mut self, id: &str) -> &mut Self {
        self.with_node(id, |node| node.exclusive = false)
    }

    pub fn multi_instance(&mut self, id: &str, spec: MultiInstanceSpec) -> &mut Self {
        self.with_node(id, move |node| node.multi_instance = Some(spec))
    }

    pub fn listener(
        &mut self,
        id: &str,
        event: ListenerEvent,
        listener: Arc<dyn ExecutionListener>,
    ) -> &mut Self {
        self.with_node(id, move |node| node.listeners.push((event, listener)))
    }

    pub fn process_listener(
        &mut self,
        event: ListenerEvent,
        listener: Arc<dyn ExecutionListener>,
    ) -> &mut Self {
        self.listeners.push((event, listener));
        self
    }

    // ---- sequence flows ----

    fn next_flow_id(&self, from: &str, to: &str) -> String {
        let base = format!("{from}-{to}");
        if !self.flows.iter().any(|flow| flow.id == base) {
            return base;
        }
        let mut index = 2;
        loop {
            let candidate = format!("{base}-{index}");
            if !self.flows.iter().any(|flow| flow.id == candidate) {
                return candidate;
            }
            index += 1;
        }
    }

    fn push_flow(
        &mut self,
        id: Option<&str>,
        from: &str,
        to: &str,
        condition: Option<Condition>,
        skip: Option<Condition>,
    ) -> String {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| self.next_flow_id(from, to));
        self.flows.push(SequenceFlow {
            id: id.clone(),
            source: from.to_string(),
            target: to.to_string(),
            condition,
            skip,
            listeners: Vec::new(),
        });
        id
    }

    pub fn flow(&mut self, from: &str, to: &str) -> &mut Self {
        self.push_flow(None, from, to, None, None);
        self
    }

    pub fn flow_with_id(&mut self, id: &str, from: &str, to: &str) -> &mut Self {
        self.push_flow(Some(id), from, to, None, None);
        self
    }

    pub fn conditional_flow(&mut self, from: &str, to: &str, condition: Condition) -> &mut Self {
        self.push_flow(None, from, to, Some(condition), None);
        self
    }

    pub fn default_flow(&mut self, from: &str, to: &str) -> &mut Self {
        let id = self.push_flow(None, from, to, None, None);
        self.with_node(from, move |node| node.default_flow = Some(id))
    }

    pub fn skippable_flow(
        &mut self,
        from: &str,
        to: &str,
        condition: Option<Condition>,
        skip: Condition,
    ) -> &mut Self {
        self.push_flow(None, from, to, condition, Some(skip));
        self
    }

    pub fn flow_listener(&mut self, flow_id: &str, listener: Arc<dyn ExecutionListener>) -> &mut Self {
        self.flow_listeners.push((flow_id.to_string(), listener));
        self
    }

    pub fn build(&mut self) -> Result<ProcessDefinition> {
        if !self.errors.is_empty() {
            return Err(EngineError::InvalidDefinition(self.errors.join("; ")));
        }

        let mut nodes = self.nodes.clone();

        let attachments: Vec<(String, String)> = nodes
            .values()
            .filter_map(|node| match &node.kind {
                FlowNodeKind::BoundaryEvent { attached_to, .. } => {
                    Some((attached_to.clone(), node.id.clone()))
                }
                _ => None,
            })
            .collect();
        for (attached_to, boundary) in attachments {
            if let Some(node) = nodes.get_mut(&attached_to) {
                node.boundary_events.push(boundary);
                node.boundary_events.sort();
            }
        }
        for handler in self.compensation_handlers.values() {
            if let Some(node) = nodes.get_mut(handler) {
                node.for_compensation = true;
            }
        }
        for node in nodes.values_mut() {
            if node.behavior.is_none() {
                node.behavior = default_behavior(&node.kind);
            }
        }

        let mut flows = HashMap::new();
        let mut outgoing: HashMap<String, Vec<String>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<String>> = HashMap::new();
        for flow in &self.flows {
            let mut flow = flow.clone();
            flow.listeners = self
                .flow_listeners
                .iter()
                .filter(|(id, _)| *id == flow.id)
                .map(|(_, listener)| Arc::clone(listener))
                .collect();
            outgoing
                .entry(flow.source.clone())
                .or_default()
                .push(flow.id.clone());
            incoming
                .entry(flow.target.clone())
                .or_default()
                .push(flow.id.clone());
            flows.insert(flow.id.clone(), Arc::new(flow));
        }

        let definition = ProcessDefinition {
            key: self.key.clone(),
            name: self.name.clone(),
            nodes: nodes
                .into_iter()
                .map(|(id, node)| (id, Arc::new(node)))
                .collect(),
            flows,
            outgoing,
            incoming,
            initial: self.initial.clone(),
            listeners: self.listeners.clone(),
            compensation_handlers: self.compensation_handlers.clone(),
        };
        ProcessValidator::validate(&definition)?;
        Ok(definition)
    }
}
