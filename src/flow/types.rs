use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::behavior::{ExecutionListener, ListenerEvent};
use crate::error::{EngineError, Result};
use crate::flow::conditions::Condition;
use crate::flow::nodes::{EventTrigger, FlowNode, FlowNodeKind};

/// 顺序流
#[derive(Clone)]
pub struct SequenceFlow {
    pub id: String,
    pub source: String,
    pub target: String,
    pub condition: Option<Condition>,
    /// 跳过表达式：启用时跳过条件求值
    pub skip: Option<Condition>,
    pub listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl fmt::Debug for SequenceFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceFlow")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}

/// 执行可以停留的元素
#[derive(Debug, Clone, Copy)]
pub enum Element<'a> {
    Node(&'a Arc<FlowNode>),
    Flow(&'a Arc<SequenceFlow>),
}

/// 编译后的流程定义
#[derive(Clone)]
pub struct ProcessDefinition {
    pub key: String,
    pub name: Option<String>,
    pub nodes: HashMap<String, Arc<FlowNode>>,
    pub flows: HashMap<String, Arc<SequenceFlow>>,
    /// 节点 id -> 按声明顺序的出线 id
    pub outgoing: HashMap<String, Vec<String>>,
    pub incoming: HashMap<String, Vec<String>>,
    /// 流程级的初始开始事件
    pub initial: Option<String>,
    pub listeners: Vec<(ListenerEvent, Arc<dyn ExecutionListener>)>,
    /// 被补偿活动 -> 补偿处理活动
    pub compensation_handlers: HashMap<String, String>,
}

impl ProcessDefinition {
    pub fn node(&self, id: &str) -> Option<&Arc<FlowNode>> {
        self.nodes.get(id)
    }

    pub fn require_node(&self, id: &str) -> Result<Arc<FlowNode>> {
        self.nodes
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownElement {
                process: self.key.clone(),
                element: id.to_string(),
            })
    }

    pub fn flow(&self, id: &str) -> Option<&Arc<SequenceFlow>> {
        self.flows.get(id)
    }

    /// 节点或顺序流
    pub fn element(&self, id: &str) -> Option<Element<'_>> {
        if let Some(node) = self.nodes.get(id) {
            return Some(Element::Node(node));
        }
        self.flows.get(id).map(Element::Flow)
    }

    /// 节点所在的子流程容器
    pub fn container_of(&self, node_id: &str) -> Option<Arc<FlowNode>> {
        self.nodes
            .get(node_id)
            .and_then(|node| node.parent.as_deref())
            .and_then(|parent| self.nodes.get(parent).cloned())
    }

    /// 元素是否存在（节点或顺序流）
    pub fn has_element(&self, id: &str) -> bool {
        self.element(id).is_some()
    }

    pub fn outgoing(&self, node_id: &str) -> Vec<Arc<SequenceFlow>> {
        self.flow_list(self.outgoing.get(node_id))
    }

    pub fn incoming(&self, node_id: &str) -> Vec<Arc<SequenceFlow>> {
        self.flow_list(self.incoming.get(node_id))
    }

    fn flow_list(&self, ids: Option<&Vec<String>>) -> Vec<Arc<SequenceFlow>> {
        ids.map(|ids| {
            ids.iter()
                .filter_map(|id| self.flows.get(id).cloned())
                .collect()
        })
        .unwrap_or_default()
    }

    /// 容器内的直接子节点，None 表示流程级；按 id 排序保证确定性
    pub fn children_of(&self, container: Option<&str>) -> Vec<Arc<FlowNode>> {
        let mut nodes: Vec<Arc<FlowNode>> = self
            .nodes
            .values()
            .filter(|node| node.parent.as_deref() == container)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    pub fn event_sub_processes_in(&self, container: Option<&str>) -> Vec<Arc<FlowNode>> {
        self.children_of(container)
            .into_iter()
            .filter(|node| node.is_event_sub_process())
            .collect()
    }

    pub fn start_events_of(&self, container: Option<&str>) -> Vec<Arc<FlowNode>> {
        self.children_of(container)
            .into_iter()
            .filter(|node| matches!(node.kind, FlowNodeKind::StartEvent { .. }))
            .collect()
    }

    /// 容器的 none 开始事件
    pub fn initial_of(&self, container: Option<&str>) -> Option<Arc<FlowNode>> {
        if container.is_none() {
            if let Some(initial) = &self.initial {
                return self.nodes.get(initial).cloned();
            }
        }
        self.start_events_of(container).into_iter().find(|node| {
            matches!(
                node.kind,
                FlowNodeKind::StartEvent {
                    trigger: EventTrigger::None,
                    ..
                }
            )
        })
    }

    pub fn boundary_events_of(&self, node_id: &str) -> Vec<Arc<FlowNode>> {
        self.nodes
            .get(node_id)
            .map(|node| {
                node.boundary_events
                    .iter()
                    .filter_map(|id| self.nodes.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn compensation_handler_for(&self, activity_id: &str) -> Option<Arc<FlowNode>> {
        self.compensation_handlers
            .get(activity_id)
            .and_then(|handler| self.nodes.get(handler).cloned())
    }

    pub fn listeners_for(&self, event: ListenerEvent) -> Vec<Arc<dyn ExecutionListener>> {
        self.listeners
            .iter()
            .filter(|(kind, _)| *kind == event)
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

impl fmt::Debug for ProcessDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessDefinition")
            .field("key", &self.key)
            .field("nodes", &self.nodes.len())
            .field("flows", &self.flows.len())
            .field("initial", &self.initial)
            .finish()
    }
}
