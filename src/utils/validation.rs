use crate::error::{EngineError, Result};
use crate::flow::nodes::{EventTrigger, FlowNodeKind};
use crate::flow::types::ProcessDefinition;

/// 流程定义验证器
pub struct ProcessValidator;

impl ProcessValidator {
    /// 验证整个流程定义
    pub fn validate(definition: &ProcessDefinition) -> Result<()> {
        Self::validate_process_key(&definition.key)?;
        for id in definition.nodes.keys() {
            Self::validate_element_id(id)?;
        }
        Self::validate_start_events(definition)?;
        Self::validate_flows(definition)?;
        Self::validate_nodes(definition)?;
        Self::validate_compensation(definition)?;
        Ok(())
    }

    /// 验证流程 key
    pub fn validate_process_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(invalid("process key must not be empty"));
        }
        if key.len() > 255 {
            return Err(invalid(format!(
                "process key `{key}` exceeds 255 characters"
            )));
        }
        Ok(())
    }

    /// 验证元素 ID
    pub fn validate_element_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(invalid("element id must not be empty"));
        }
        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '.')
        {
            return Err(invalid(format!(
                "element id `{id}` contains invalid characters"
            )));
        }
        Ok(())
    }

    fn validate_start_events(definition: &ProcessDefinition) -> Result<()> {
        if definition.start_events_of(None).is_empty() {
            return Err(invalid(format!(
                "process `{}` has no start event",
                definition.key
            )));
        }
        Ok(())
    }

    fn validate_flows(definition: &ProcessDefinition) -> Result<()> {
        for flow in definition.flows.values() {
            for endpoint in [&flow.source, &flow.target] {
                if definition.node(endpoint).is_none() {
                    return Err(invalid(format!(
                        "sequence flow `{}` references unknown element `{endpoint}`",
                        flow.id
                    )));
                }
            }
            let source_parent = definition.node(&flow.source).and_then(|n| n.parent.clone());
            let target_parent = definition.node(&flow.target).and_then(|n| n.parent.clone());
            if source_parent != target_parent {
                return Err(invalid(format!(
                    "sequence flow `{}` crosses a sub-process boundary",
                    flow.id
                )));
            }
        }
        Ok(())
    }

    fn validate_nodes(definition: &ProcessDefinition) -> Result<()> {
        for node in definition.nodes.values() {
            if let Some(default_flow) = &node.default_flow {
                let owned = definition
                    .flow(default_flow)
                    .map(|flow| flow.source == node.id)
                    .unwrap_or(false);
                if !owned {
                    return Err(invalid(format!(
                        "default flow `{default_flow}` is not an outgoing flow of `{}`",
                        node.id
                    )));
                }
            }

            match &node.kind {
                FlowNodeKind::BoundaryEvent { attached_to, .. } => {
                    let attached = definition.node(attached_to).ok_or_else(|| {
                        invalid(format!(
                            "boundary event `{}` is attached to unknown activity `{attached_to}`",
                            node.id
                        ))
                    })?;
                    if attached.is_boundary_event() {
                        return Err(invalid(format!(
                            "boundary event `{}` cannot be attached to another boundary event",
                            node.id
                        )));
                    }
                }
                FlowNodeKind::ServiceTask { handler } if handler.is_empty() => {
                    return Err(invalid(format!(
                        "service task `{}` has no handler name",
                        node.id
                    )));
                }
                FlowNodeKind::CallActivity(spec) if spec.called_element.is_empty() => {
                    return Err(invalid(format!(
                        "call activity `{}` has no called element",
                        node.id
                    )));
                }
                FlowNodeKind::SubProcess => {
                    if definition.initial_of(Some(&node.id)).is_none() {
                        return Err(invalid(format!(
                            "sub-process `{}` has no none start event",
                            node.id
                        )));
                    }
                }
                FlowNodeKind::EventSubProcess => {
                    let starts = definition.start_events_of(Some(&node.id));
                    if starts.len() != 1 {
                        return Err(invalid(format!(
                            "event sub-process `{}` must have exactly one start event",
                            node.id
                        )));
                    }
                    if let FlowNodeKind::StartEvent {
                        trigger: EventTrigger::None,
                        ..
                    } = &starts[0].kind
                    {
                        return Err(invalid(format!(
                            "event sub-process `{}` needs a triggered start event",
                            node.id
                        )));
                    }
                }
                _ => {}
            }

            if let Some(spec) = &node.multi_instance {
                if spec.cardinality.is_none() && spec.collection.is_none() {
                    return Err(invalid(format!(
                        "multi-instance activity `{}` needs a cardinality or a collection",
                        node.id
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_compensation(definition: &ProcessDefinition) -> Result<()> {
        for (activity, handler) in &definition.compensation_handlers {
            if definition.node(activity).is_none() {
                return Err(invalid(format!(
                    "compensation boundary references unknown activity `{activity}`"
                )));
            }
            match definition.node(handler) {
                Some(node) if node.for_compensation => {}
                _ => {
                    return Err(invalid(format!(
                        "compensation handler `{handler}` of `{activity}` is not a compensation activity"
                    )))
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> EngineError {
    EngineError::InvalidDefinition(message.into())
}
