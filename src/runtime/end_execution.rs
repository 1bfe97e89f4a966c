use tracing::debug;

use crate::behavior;
use crate::error::{EngineError, Result};
use crate::flow::nodes::FlowNode;
use crate::state::SubscriptionKind;

use super::context::CommandContext;
use super::take_outgoing::leave_node;
use super::{compensation, multi_instance, process_instance, scopes};

/// 结束一个没有出线的执行；父作用域内没有其他活动子执行时结束该作用域
pub(crate) fn execute(ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
    let execution = ctx.execution(execution_id)?.clone();
    if execution.is_process_instance() {
        return process_instance::end(ctx, execution_id);
    }
    let parent = execution.parent_id.clone().ok_or_else(|| {
        EngineError::programmatic(format!("execution `{execution_id}` has no parent"))
    })?;
    ctx.unit_of_work_mut().delete_subtree(execution_id, None)?;

    let remaining = scopes::remaining_children(ctx, &parent);
    if remaining > 0 {
        debug!(execution = %execution_id, scope = %parent, remaining, "execution ended, scope still active");
        return Ok(());
    }
    scopes::delete_idle_event_scope_children(ctx, &parent)?;
    scope_completed(ctx, &parent)
}

/// 作用域内的全部执行都已结束
pub(crate) fn scope_completed(ctx: &mut CommandContext, scope_id: &str) -> Result<()> {
    let scope = ctx.execution(scope_id)?.clone();
    if scope.is_process_instance() {
        return process_instance::end(ctx, scope_id);
    }
    if scope.multi_instance_root {
        ctx.agenda_mut().plan_monitor_multi_instance(scope_id, false);
        return Ok(());
    }
    if multi_instance::is_instance(ctx, scope_id) {
        return multi_instance::leave_instance(ctx, scope_id);
    }

    let node = ctx.node_of(scope_id)?;
    if node.is_event_sub_process() {
        return end_event_sub_process(ctx, scope_id, &node);
    }
    if node.for_compensation {
        return compensation::cleanup_compensation(ctx, scope_id);
    }
    if node.is_sub_process_container() {
        return handle_subprocess_end(ctx, scope_id, &node);
    }
    behavior::leave(ctx, scope_id)
}

fn end_event_sub_process(ctx: &mut CommandContext, scope_id: &str, node: &FlowNode) -> Result<()> {
    let parent = ctx.execution(scope_id)?.parent_id.clone().ok_or_else(|| {
        EngineError::programmatic(format!("event sub-process scope `{scope_id}` has no parent"))
    })?;
    leave_node(ctx, scope_id, node)?;
    ctx.unit_of_work_mut().delete_subtree(scope_id, None)?;
    debug!(event_sub_process = %node.id, scope = %parent, "event sub-process completed");

    if scopes::remaining_children(ctx, &parent) > 0 {
        return Ok(());
    }
    scopes::delete_idle_event_scope_children(ctx, &parent)?;
    scope_completed(ctx, &parent)
}

/// 子流程正常结束：保留补偿所需的副本，在父执行下继续沿出线前进
pub(crate) fn handle_subprocess_end(
    ctx: &mut CommandContext,
    scope_id: &str,
    node: &FlowNode,
) -> Result<()> {
    let definition = ctx.definition_of(scope_id)?;
    let scope = ctx.execution(scope_id)?.clone();
    let parent = scope.parent_id.clone().ok_or_else(|| {
        EngineError::programmatic(format!("sub-process scope `{scope_id}` has no parent"))
    })?;

    let compensable = definition.compensation_handler_for(&node.id).is_some()
        || ctx
            .unit_of_work()
            .subscriptions_for_execution(scope_id)
            .iter()
            .any(|subscription| subscription.kind == SubscriptionKind::Compensate);
    if compensable {
        compensation::create_compensation_copy(ctx, scope_id, node)?;
    }

    let continuation = ctx.unit_of_work_mut().create_child(&parent)?;
    {
        let execution = ctx.execution_mut(&continuation)?;
        execution.current_element = Some(node.id.clone());
        execution.concurrent = scope.concurrent;
    }
    ctx.unit_of_work_mut().delete_subtree(scope_id, None)?;
    debug!(sub_process = %node.id, execution = %continuation, "sub-process completed");
    ctx.agenda_mut().plan_take_outgoing(&continuation, true);
    Ok(())
}
