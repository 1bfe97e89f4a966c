use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::behavior::{self, ListenerEvent};
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EngineEventKind};
use crate::flow::nodes::{EventTrigger, FlowNode, FlowNodeKind};
use crate::flow::{Element, SequenceFlow};
use crate::jobs::JobService;
use crate::state::ExecutionId;

use super::context::CommandContext;
use super::{error_propagation, multi_instance};

/// 进入执行当前所在的元素
///
/// 位于顺序流上时走到目标节点；位于节点上时执行节点行为，
/// 必要时先建立子流程作用域或多实例根执行，异步节点改为创建作业。
pub(crate) async fn execute(
    ctx: &mut CommandContext,
    execution_id: &str,
    force_synchronous: bool,
    in_compensation: bool,
) -> Result<()> {
    let definition = ctx.definition_of(execution_id)?;
    let element = ctx
        .execution(execution_id)?
        .current_element
        .clone()
        .ok_or_else(|| {
            EngineError::programmatic(format!("execution `{execution_id}` has no current element"))
        })?;

    let node = match definition.element(&element) {
        Some(Element::Flow(flow)) => {
            let flow = Arc::clone(flow);
            return continue_through_flow(ctx, execution_id, &flow);
        }
        Some(Element::Node(node)) => Arc::clone(node),
        None => definition.require_node(&element)?,
    };

    if node.multi_instance.is_some()
        && !in_compensation
        && !multi_instance::is_instance(ctx, execution_id)
    {
        return multi_instance::enter(ctx, execution_id, &node).await;
    }

    let mut execution_id = execution_id.to_string();
    if node.is_sub_process_container() && !ctx.execution(&execution_id)?.scope {
        execution_id = create_sub_process_scope(ctx, &execution_id, &node)?;
    }

    if node.asynchronous && !force_synchronous {
        let job = JobService::create_async_job(ctx, &execution_id, node.exclusive)?;
        debug!(
            execution = %execution_id,
            activity = %node.id,
            job = %job.id,
            "activity is asynchronous, scheduled job"
        );
        JobService::schedule_async_job(ctx, job);
        return Ok(());
    }

    execute_synchronous(ctx, &execution_id, &node, in_compensation).await
}

fn continue_through_flow(
    ctx: &mut CommandContext,
    execution_id: &str,
    flow: &Arc<SequenceFlow>,
) -> Result<()> {
    ctx.fire_listeners(execution_id, flow.listeners.clone(), ListenerEvent::Take)?;
    let event = EngineEvent::for_execution(EngineEventKind::SequenceFlowTaken, ctx.execution(execution_id)?)
        .with_payload(json!({ "source": flow.source, "target": flow.target }));
    ctx.dispatch(event);

    ctx.execution_mut(execution_id)?.current_element = Some(flow.target.clone());
    ctx.agenda_mut().plan_continue(execution_id);
    Ok(())
}

/// 进入子流程容器：用新的作用域执行替换进入的执行
fn create_sub_process_scope(
    ctx: &mut CommandContext,
    execution_id: &str,
    node: &FlowNode,
) -> Result<ExecutionId> {
    let incoming = ctx.execution(execution_id)?.clone();
    let parent = incoming.parent_id.clone().ok_or_else(|| {
        EngineError::programmatic(format!(
            "cannot enter sub-process `{}` with a process instance execution",
            node.id
        ))
    })?;
    let scope_id = ctx.unit_of_work_mut().create_child(&parent)?;
    {
        let scope = ctx.execution_mut(&scope_id)?;
        scope.scope = true;
        scope.current_element = Some(node.id.clone());
        scope.concurrent = incoming.concurrent;
        scope.variables = incoming.variables;
    }
    ctx.unit_of_work_mut().delete_execution(execution_id, None)?;
    debug!(execution = %execution_id, scope = %scope_id, sub_process = %node.id, "created sub-process scope");
    Ok(scope_id)
}

async fn execute_synchronous(
    ctx: &mut CommandContext,
    execution_id: &str,
    node: &Arc<FlowNode>,
    in_compensation: bool,
) -> Result<()> {
    ctx.execution_mut(execution_id)?.active = true;

    if !in_compensation && !multi_instance::is_instance(ctx, execution_id) {
        create_boundary_executions(ctx, execution_id, node).await?;
    }

    ctx.fire_listeners(
        execution_id,
        node.listeners_for(ListenerEvent::Start),
        ListenerEvent::Start,
    )?;
    let execution = ctx.execution(execution_id)?.clone();
    ctx.history().record_activity_start(&execution, &node.id);
    ctx.dispatch_for(EngineEventKind::ActivityStarted, execution_id);
    debug!(
        execution = %execution_id,
        activity = %node.id,
        kind = node.kind.name(),
        "executing activity"
    );

    let Some(behavior) = node.behavior.clone() else {
        return behavior::leave(ctx, execution_id);
    };
    match behavior.execute(ctx, execution_id).await {
        Err(EngineError::BusinessFault { code, .. }) => {
            error_propagation::propagate_error(ctx, execution_id, &code)
        }
        other => other,
    }
}

/// 为节点上的边界事件创建子执行并执行其行为（补偿边界除外）
pub(crate) async fn create_boundary_executions(
    ctx: &mut CommandContext,
    execution_id: &str,
    node: &FlowNode,
) -> Result<()> {
    let definition = ctx.definition_of(execution_id)?;
    for boundary in definition.boundary_events_of(&node.id) {
        if matches!(
            boundary.kind,
            FlowNodeKind::BoundaryEvent {
                trigger: EventTrigger::Compensate,
                ..
            }
        ) {
            continue;
        }
        let child = ctx.unit_of_work_mut().create_child(execution_id)?;
        {
            let execution = ctx.execution_mut(&child)?;
            execution.current_element = Some(boundary.id.clone());
            execution.active = false;
        }
        if let Some(behavior) = boundary.behavior.clone() {
            behavior.execute(ctx, &child).await?;
        }
    }
    Ok(())
}
