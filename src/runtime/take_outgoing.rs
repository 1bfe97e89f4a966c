use std::sync::Arc;

use tracing::debug;

use crate::behavior::ListenerEvent;
use crate::error::{EngineError, Result};
use crate::events::EngineEventKind;
use crate::flow::constants::SKIP_EXPRESSION_ENABLED;
use crate::flow::nodes::{EventTrigger, FlowNode, FlowNodeKind};
use crate::flow::{ProcessDefinition, SequenceFlow};
use crate::state::{EventSubscription, SubscriptionKind, VariableView};

use super::context::CommandContext;
use super::{compensation, end_execution, multi_instance, scopes};

/// 离开当前节点，沿选中的出线继续；没有出线时结束执行
pub(crate) fn execute(
    ctx: &mut CommandContext,
    execution_id: &str,
    evaluate_conditions: bool,
) -> Result<()> {
    let node = ctx.node_of(execution_id)?;
    if node.for_compensation {
        return compensation::cleanup_compensation(ctx, execution_id);
    }
    let definition = ctx.definition_of(execution_id)?;

    leave_node(ctx, execution_id, &node)?;

    let execution = ctx.execution(execution_id)?.clone();
    let execution_id = if execution.scope && !execution.is_process_instance() {
        // 作用域执行本身不沿出线前进：在父执行下创建新执行，旧作用域整体销毁
        let parent = execution.parent_id.clone().ok_or_else(|| {
            EngineError::programmatic(format!("scope execution `{execution_id}` has no parent"))
        })?;
        let continuation = ctx.unit_of_work_mut().create_child(&parent)?;
        {
            let next = ctx.execution_mut(&continuation)?;
            next.current_element = Some(node.id.clone());
            next.concurrent = execution.concurrent;
        }
        ctx.agenda_mut().plan_destroy_scope(execution_id);
        continuation
    } else {
        remove_boundary_executions(ctx, execution_id)?;
        execution_id.to_string()
    };

    if !node.is_sub_process_container() {
        register_compensation(ctx, &execution_id, &definition, &node)?;
    }

    let outgoing = definition.outgoing(&node.id);
    if outgoing.is_empty() {
        if let Some(adhoc) = adhoc_container(&definition, &node) {
            return end_adhoc_child(ctx, &execution_id, &adhoc);
        }
        debug!(execution = %execution_id, activity = %node.id, "no outgoing sequence flow, ending execution");
        ctx.agenda_mut().plan_end_execution(&execution_id);
        return Ok(());
    }

    let view = ctx.variables(&execution_id);
    let selected = select_flows(&node, &outgoing, &view, evaluate_conditions);
    if selected.is_empty() {
        return Err(EngineError::NoOutgoingFlow {
            activity: node.id.clone(),
        });
    }
    fan_out(ctx, &execution_id, &selected)
}

/// 节点离开时的收尾：结束监听器、历史、完成事件
pub(crate) fn leave_node(ctx: &mut CommandContext, execution_id: &str, node: &FlowNode) -> Result<()> {
    ctx.fire_listeners(
        execution_id,
        node.listeners_for(ListenerEvent::End),
        ListenerEvent::End,
    )?;
    // 多实例根没有自己的活动历史，只有各实例有
    let multi_instance_root =
        node.multi_instance.is_some() && !multi_instance::is_instance(ctx, execution_id);
    if !node.is_parallel_gateway() && !multi_instance_root {
        let execution = ctx.execution(execution_id)?.clone();
        ctx.history().record_activity_end(&execution, &node.id, None);
    }
    ctx.dispatch_for(EngineEventKind::ActivityCompleted, execution_id);
    Ok(())
}

fn remove_boundary_executions(ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
    for child in ctx.unit_of_work().find_children_by_parent(execution_id) {
        let is_boundary = match ctx.node_of(&child) {
            Ok(node) => node.is_boundary_event(),
            Err(_) => false,
        };
        if is_boundary {
            ctx.unit_of_work_mut().delete_subtree(&child, None)?;
        }
    }
    Ok(())
}

/// 已完成的可补偿活动在其作用域上登记补偿订阅
fn register_compensation(
    ctx: &mut CommandContext,
    execution_id: &str,
    definition: &ProcessDefinition,
    node: &FlowNode,
) -> Result<()> {
    let compensable = definition.boundary_events_of(&node.id).iter().any(|boundary| {
        matches!(
            boundary.kind,
            FlowNodeKind::BoundaryEvent {
                trigger: EventTrigger::Compensate,
                ..
            }
        )
    });
    if !compensable {
        return Ok(());
    }
    let scope = ctx
        .unit_of_work()
        .tree()
        .parent_scope(execution_id)
        .ok_or_else(|| {
            EngineError::programmatic(format!("execution `{execution_id}` has no parent scope"))
        })?;
    let process_instance_id = ctx.execution(execution_id)?.process_instance_id.clone();
    debug!(activity = %node.id, scope = %scope, "registered compensation subscription");
    ctx.unit_of_work_mut().add_subscription(EventSubscription::new(
        SubscriptionKind::Compensate,
        None,
        scope,
        process_instance_id,
        node.id.clone(),
    ));
    Ok(())
}

/// 选择出线
///
/// 条件为真的非默认出线全部选中；启用跳过表达式且跳过为真的出线无条件选中。
/// 没有选中时退回默认出线。排他网关只取第一条。
pub(crate) fn select_flows(
    node: &FlowNode,
    outgoing: &[Arc<SequenceFlow>],
    view: &VariableView,
    evaluate_conditions: bool,
) -> Vec<Arc<SequenceFlow>> {
    let skip_enabled = view.get_bool(SKIP_EXPRESSION_ENABLED) == Some(true);
    let sole = outgoing.len() == 1;

    let mut selected: Vec<Arc<SequenceFlow>> = outgoing
        .iter()
        .filter(|flow| node.default_flow.as_deref() != Some(flow.id.as_str()))
        .filter(|flow| {
            let skipped = skip_enabled
                && flow
                    .skip
                    .as_ref()
                    .map(|skip| sole || skip(view))
                    .unwrap_or(false);
            if skipped {
                return true;
            }
            !evaluate_conditions
                || flow
                    .condition
                    .as_ref()
                    .map(|condition| condition(view))
                    .unwrap_or(true)
        })
        .cloned()
        .collect();

    if selected.is_empty() {
        if let Some(default_flow) = &node.default_flow {
            if let Some(flow) = outgoing.iter().find(|flow| &flow.id == default_flow) {
                selected.push(Arc::clone(flow));
            }
        }
    }
    if matches!(node.kind, FlowNodeKind::ExclusiveGateway) {
        selected.truncate(1);
    }
    selected
}

/// 分叉：第一条出线复用当前执行，其余出线在同一父执行下创建新执行；
/// 全部创建完成后才计划继续
fn fan_out(
    ctx: &mut CommandContext,
    execution_id: &str,
    selected: &[Arc<SequenceFlow>],
) -> Result<()> {
    let parent = ctx.execution(execution_id)?.parent_id.clone().ok_or_else(|| {
        EngineError::programmatic(format!(
            "process instance execution `{execution_id}` cannot take sequence flows"
        ))
    })?;
    let forking = selected.len() > 1;

    let mut planned = Vec::with_capacity(selected.len());
    for (index, flow) in selected.iter().enumerate() {
        let id = if index == 0 {
            execution_id.to_string()
        } else {
            ctx.unit_of_work_mut().create_child(&parent)?
        };
        let execution = ctx.execution_mut(&id)?;
        execution.current_element = Some(flow.id.clone());
        execution.active = false;
        if forking {
            execution.concurrent = true;
        }
        planned.push(id);
    }

    debug!(
        execution = %execution_id,
        flows = selected.len(),
        "taking outgoing sequence flows"
    );
    for id in &planned {
        ctx.agenda_mut().plan_continue(id);
    }
    Ok(())
}

fn adhoc_container(definition: &ProcessDefinition, node: &FlowNode) -> Option<Arc<FlowNode>> {
    definition
        .container_of(&node.id)
        .filter(|container| matches!(container.kind, FlowNodeKind::AdhocSubProcess(_)))
}

/// 自由子流程内的活动结束：按完成条件决定是否结束整个子流程
fn end_adhoc_child(ctx: &mut CommandContext, execution_id: &str, container: &FlowNode) -> Result<()> {
    let FlowNodeKind::AdhocSubProcess(spec) = &container.kind else {
        return Ok(());
    };
    let scope = ctx
        .unit_of_work()
        .tree()
        .parent_scope(execution_id)
        .ok_or_else(|| {
            EngineError::programmatic(format!("execution `{execution_id}` has no parent scope"))
        })?;
    ctx.unit_of_work_mut().delete_subtree(execution_id, None)?;

    let completed = spec
        .completion_condition
        .as_ref()
        .map(|condition| condition(&ctx.variables(&scope)))
        .unwrap_or(false);
    if !completed {
        return Ok(());
    }
    if spec.cancel_remaining_instances {
        scopes::cancel_children(ctx, &scope, crate::flow::constants::delete_reason::ADHOC_CANCELLED)?;
    } else if scopes::remaining_children(ctx, &scope) > 0 {
        debug!(sub_process = %container.id, "ad hoc completion condition met, waiting for active children");
        return Ok(());
    }
    debug!(sub_process = %container.id, "ad hoc sub-process completed");
    end_execution::scope_completed(ctx, &scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{condition_always, condition_from_fn, ProcessBuilder};
    use crate::runtime::test_support::context_with;
    use crate::runtime::Operation;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn view(values: serde_json::Value) -> VariableView {
        let map: BTreeMap<String, serde_json::Value> = serde_json::from_value(values).unwrap();
        VariableView::new(map)
    }

    #[test]
    fn default_flow_used_when_no_condition_holds() {
        let never = condition_from_fn(|_| false);
        let mut builder = ProcessBuilder::new("p");
        builder
            .start_event("start")
            .exclusive_gateway("gw")
            .end_event("a")
            .end_event("b")
            .end_event("c")
            .flow("start", "gw")
            .conditional_flow("gw", "a", never.clone())
            .conditional_flow("gw", "b", never)
            .default_flow("gw", "c");
        let definition = builder.build().unwrap();
        let node = definition.node("gw").unwrap();

        let selected = select_flows(node, &definition.outgoing("gw"), &view(json!({})), true);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].target, "c");
    }

    #[test]
    fn all_true_conditions_selected_without_default() {
        let mut builder = ProcessBuilder::new("p");
        builder
            .start_event("start")
            .task("fork")
            .end_event("a")
            .end_event("b")
            .end_event("c")
            .flow("start", "fork")
            .conditional_flow("fork", "a", condition_always())
            .flow("fork", "b")
            .default_flow("fork", "c");
        let definition = builder.build().unwrap();
        let node = definition.node("fork").unwrap();

        let targets: Vec<String> =
            select_flows(node, &definition.outgoing("fork"), &view(json!({})), true)
                .into_iter()
                .map(|flow| flow.target.clone())
                .collect();
        assert_eq!(targets, vec!["a", "b"]);
    }

    #[test]
    fn skip_expression_only_applies_when_enabled() {
        let never = condition_from_fn(|_| false);
        let mut builder = ProcessBuilder::new("p");
        builder
            .start_event("start")
            .task("t")
            .end_event("a")
            .end_event("b")
            .flow("start", "t")
            .skippable_flow("t", "a", Some(never.clone()), condition_always())
            .conditional_flow("t", "b", never);
        let definition = builder.build().unwrap();
        let node = definition.node("t").unwrap();
        let outgoing = definition.outgoing("t");

        assert!(select_flows(node, &outgoing, &view(json!({})), true).is_empty());
        let enabled = view(json!({ SKIP_EXPRESSION_ENABLED: true }));
        let selected = select_flows(node, &outgoing, &enabled, true);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].target, "a");
    }

    #[test]
    fn fork_creates_every_branch_before_planning() -> anyhow::Result<()> {
        let mut builder = ProcessBuilder::new("split");
        builder
            .start_event("start")
            .parallel_gateway("fork")
            .end_event("a")
            .end_event("b")
            .end_event("c")
            .flow("start", "fork")
            .flow("fork", "a")
            .flow("fork", "b")
            .flow("fork", "c");
        let mut ctx = context_with(builder.build()?);
        let root = ctx.unit_of_work_mut().create_process_instance("split");
        let arriving = ctx.unit_of_work_mut().create_child(&root)?;
        ctx.execution_mut(&arriving)?.current_element = Some("fork".into());

        execute(&mut ctx, &arriving, true)?;

        let branches = ctx.unit_of_work().find_children_by_parent(&root);
        assert_eq!(branches.len(), 3);
        assert!(branches.contains(&arriving), "first branch reuses the arriving execution");
        for id in &branches {
            let branch = ctx.execution(id)?;
            assert_eq!(branch.parent_id.as_deref(), Some(root.as_str()));
            assert!(!branch.active);
            assert!(branch.concurrent);
        }

        let planned: Vec<&str> = ctx
            .agenda()
            .operations()
            .map(|operation| {
                assert!(matches!(operation, Operation::Continue { .. }), "{}", operation.name());
                operation.execution()
            })
            .collect();
        assert_eq!(planned.len(), 3);
        for id in &branches {
            assert!(planned.contains(&id.as_str()));
        }
        Ok(())
    }

    #[test]
    fn node_without_outgoing_flow_plans_end_execution() -> anyhow::Result<()> {
        let mut builder = ProcessBuilder::new("dead_end");
        builder.start_event("start").task("t").flow("start", "t");
        let mut ctx = context_with(builder.build()?);
        let root = ctx.unit_of_work_mut().create_process_instance("dead_end");
        let current = ctx.unit_of_work_mut().create_child(&root)?;
        ctx.execution_mut(&current)?.current_element = Some("t".into());

        execute(&mut ctx, &current, true)?;

        let operations: Vec<&Operation> = ctx.agenda().operations().collect();
        assert_eq!(operations.len(), 1);
        assert!(matches!(
            operations[0],
            Operation::EndExecution { execution } if execution == &current
        ));
        assert_eq!(ctx.unit_of_work().find_children_by_parent(&root), vec![current.clone()]);
        Ok(())
    }
}
