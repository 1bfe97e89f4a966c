// 作用域管理：事件子流程监听、取消与剩余执行统计

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::behavior::subscribe_for_trigger;
use crate::error::{EngineError, Result};
use crate::events::EngineEventKind;
use crate::flow::constants::delete_reason;
use crate::flow::nodes::{EventTrigger, FlowNode, FlowNodeKind};
use crate::state::{EventSubscription, Execution, ExecutionId};

use super::context::CommandContext;

/// 进入作用域：为容器内事件子流程的开始事件创建监听执行和事件订阅
///
/// 错误开始事件由错误传播查找，条件开始事件由条件评估扫描，都不需要订阅。
pub(crate) fn enter_scope(
    ctx: &mut CommandContext,
    scope_id: &str,
    container: Option<&str>,
) -> Result<()> {
    let definition = ctx.definition_of(scope_id)?;
    for event_sub_process in definition.event_sub_processes_in(container) {
        for start in definition.children_of(Some(&event_sub_process.id)) {
            let FlowNodeKind::StartEvent { trigger, .. } = &start.kind else {
                continue;
            };
            if matches!(
                trigger,
                EventTrigger::None | EventTrigger::Error(_) | EventTrigger::Compensate
            ) {
                continue;
            }
            let listener = ctx.unit_of_work_mut().create_child(scope_id)?;
            {
                let execution = ctx.execution_mut(&listener)?;
                execution.current_element = Some(start.id.clone());
                execution.event_scope = true;
                execution.active = false;
            }
            subscribe_for_trigger(ctx, &listener, &start.id, trigger)?;
            debug!(
                scope = %scope_id,
                event_sub_process = %event_sub_process.id,
                start = %start.id,
                trigger = trigger.name(),
                "registered event sub-process start"
            );
        }
    }
    Ok(())
}

/// 事件订阅被触发：开始事件订阅启动事件子流程，其余唤醒等待的执行
pub(crate) fn fire_subscription(
    ctx: &mut CommandContext,
    subscription: &EventSubscription,
    payload: &Value,
) -> Result<()> {
    let Some(execution) = ctx
        .unit_of_work()
        .find_by_id(&subscription.execution_id)
        .cloned()
    else {
        return Ok(());
    };
    let definition = ctx.definition(&execution.process_definition_key)?;
    let is_start = definition
        .node(&subscription.activity_id)
        .map(|node| matches!(node.kind, FlowNodeKind::StartEvent { .. }))
        .unwrap_or(false);
    if is_start {
        return fire_event_sub_process_start(ctx, &subscription.execution_id, payload);
    }
    ctx.agenda_mut()
        .plan_trigger(&subscription.execution_id, None, payload.clone());
    Ok(())
}

/// 由监听执行启动其所在的事件子流程
pub(crate) fn fire_event_sub_process_start(
    ctx: &mut CommandContext,
    listener_id: &str,
    payload: &Value,
) -> Result<()> {
    let listener = ctx.execution(listener_id)?.clone();
    let definition = ctx.definition(&listener.process_definition_key)?;
    let start = definition.require_node(listener.current_element().unwrap_or_default())?;
    let FlowNodeKind::StartEvent { interrupting, .. } = &start.kind else {
        return Err(EngineError::programmatic(format!(
            "execution `{listener_id}` is not an event sub-process listener"
        )));
    };
    let event_sub_process = definition.require_node(start.parent.as_deref().unwrap_or_default())?;
    let scope = listener.parent_id.clone().ok_or_else(|| {
        EngineError::programmatic(format!("listener `{listener_id}` has no scope"))
    })?;
    let interrupting = *interrupting;
    start_event_sub_process(ctx, &scope, &event_sub_process, &start, payload, interrupting)?;
    Ok(())
}

/// 在作用域内启动事件子流程；中断型先取消作用域内的其他执行
pub(crate) fn start_event_sub_process(
    ctx: &mut CommandContext,
    scope_id: &str,
    event_sub_process: &Arc<FlowNode>,
    start: &Arc<FlowNode>,
    payload: &Value,
    interrupting: bool,
) -> Result<ExecutionId> {
    if interrupting {
        cancel_children(ctx, scope_id, delete_reason::EVENT_SUB_PROCESS_INTERRUPTING)?;
    }
    let sub_scope = ctx.unit_of_work_mut().create_child(scope_id)?;
    {
        let execution = ctx.execution_mut(&sub_scope)?;
        execution.scope = true;
        execution.current_element = Some(event_sub_process.id.clone());
        execution.concurrent = !interrupting;
    }
    let execution = ctx.execution(&sub_scope)?.clone();
    ctx.history()
        .record_activity_start(&execution, &event_sub_process.id);
    ctx.dispatch_for(EngineEventKind::ActivityStarted, &sub_scope);

    if let Value::Object(values) = payload {
        for (name, value) in values {
            ctx.set_variable_local(&sub_scope, name, value.clone())?;
        }
    }

    let child = ctx.unit_of_work_mut().create_child(&sub_scope)?;
    ctx.execution_mut(&child)?.current_element = Some(start.id.clone());
    debug!(
        scope = %scope_id,
        event_sub_process = %event_sub_process.id,
        interrupting,
        "event sub-process started"
    );
    ctx.agenda_mut().plan_continue(&child);
    Ok(sub_scope)
}

/// 取消执行及其子树，为活动中的节点记录取消
pub(crate) fn cancel_subtree(ctx: &mut CommandContext, execution_id: &str, reason: &str) -> Result<()> {
    let mut ids = ctx.unit_of_work().tree().descendants_post_order(execution_id);
    ids.push(execution_id.to_string());
    for id in &ids {
        let Some(execution) = ctx.unit_of_work().find_by_id(id).cloned() else {
            continue;
        };
        if !execution.active || !is_at_node(ctx, &execution) {
            continue;
        }
        if let Some(activity) = execution.current_element() {
            ctx.history()
                .record_activity_end(&execution, activity, Some(reason));
        }
        ctx.dispatch_for(EngineEventKind::ActivityCancelled, id);
    }
    debug!(execution = %execution_id, reason, "cancelling execution subtree");
    ctx.unit_of_work_mut().delete_subtree(execution_id, Some(reason))
}

/// 取消作用域内的全部子执行，保留补偿副本
pub(crate) fn cancel_children(ctx: &mut CommandContext, scope_id: &str, reason: &str) -> Result<()> {
    for child in ctx.unit_of_work().find_children_by_parent(scope_id) {
        let Some(execution) = ctx.unit_of_work().find_by_id(&child).cloned() else {
            continue;
        };
        if execution.event_scope && !is_at_start_event(ctx, &execution) {
            continue;
        }
        cancel_subtree(ctx, &child, reason)?;
    }
    Ok(())
}

/// 仍阻止作用域结束的子执行数
///
/// 边界事件执行和空闲的事件作用域执行不计入；非活动执行只有在议程中还有操作
/// 或者在等待作业时才计入，在并行网关处等待合并的执行不计入。
pub(crate) fn remaining_children(ctx: &CommandContext, parent_id: &str) -> usize {
    ctx.unit_of_work()
        .find_children_by_parent(parent_id)
        .iter()
        .filter_map(|child| ctx.unit_of_work().find_by_id(child))
        .filter(|execution| !(execution.event_scope && !execution.active))
        .filter(|execution| !is_at_boundary_event(ctx, execution))
        .filter(|execution| execution.active || execution.event_scope || is_in_flight(ctx, execution))
        .count()
}

/// 非活动执行仍在前进：已计划后续操作，或者停在异步作业或断点上
fn is_in_flight(ctx: &CommandContext, execution: &Execution) -> bool {
    ctx.agenda().is_planned(&execution.id)
        || !ctx.unit_of_work().jobs_for_execution(&execution.id).is_empty()
}

/// 删除作用域下等待中的事件子流程监听执行
pub(crate) fn delete_idle_event_scope_children(ctx: &mut CommandContext, scope_id: &str) -> Result<()> {
    for child in ctx.unit_of_work().find_children_by_parent(scope_id) {
        let idle_listener = ctx
            .unit_of_work()
            .find_by_id(&child)
            .map(|execution| is_idle_event_listener(ctx, execution))
            .unwrap_or(false);
        if idle_listener {
            ctx.unit_of_work_mut().delete_subtree(&child, None)?;
        }
    }
    Ok(())
}

fn node_kind_matches(
    ctx: &CommandContext,
    execution: &Execution,
    predicate: impl Fn(&FlowNode) -> bool,
) -> bool {
    let Some(element) = execution.current_element() else {
        return false;
    };
    ctx.definition(&execution.process_definition_key)
        .ok()
        .and_then(|definition| definition.node(element).map(|node| predicate(node)))
        .unwrap_or(false)
}

fn is_at_node(ctx: &CommandContext, execution: &Execution) -> bool {
    node_kind_matches(ctx, execution, |_| true)
}

fn is_at_boundary_event(ctx: &CommandContext, execution: &Execution) -> bool {
    node_kind_matches(ctx, execution, FlowNode::is_boundary_event)
}

/// 停在事件子流程开始事件上、尚未触发的监听执行
fn is_idle_event_listener(ctx: &CommandContext, execution: &Execution) -> bool {
    execution.event_scope && !execution.active && is_at_start_event(ctx, execution)
}

fn is_at_start_event(ctx: &CommandContext, execution: &Execution) -> bool {
    node_kind_matches(ctx, execution, |node| {
        matches!(node.kind, FlowNodeKind::StartEvent { .. })
    })
}
