// 多实例：根执行、实例执行、顺序/并行完成与并行监控

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EngineEventKind};
use crate::flow::constants::{delete_reason, multi_instance as vars};
use crate::flow::nodes::{FlowNode, MultiInstanceSpec};
use crate::jobs::{JobKind, JobService};
use crate::state::ExecutionId;

use super::context::CommandContext;
use super::continue_process::create_boundary_executions;
use super::scopes;
use super::take_outgoing::leave_node;

/// 执行是否为多实例的单个实例：父执行是同一节点上的多实例根
pub(crate) fn is_instance(ctx: &CommandContext, execution_id: &str) -> bool {
    let uow = ctx.unit_of_work();
    let Some(execution) = uow.find_by_id(execution_id) else {
        return false;
    };
    let Some(parent) = execution
        .parent_id
        .as_deref()
        .and_then(|parent| uow.find_by_id(parent))
    else {
        return false;
    };
    parent.multi_instance_root
        && parent.current_element.is_some()
        && parent.current_element == execution.current_element
}

fn spec_of(node: &FlowNode) -> Result<&MultiInstanceSpec> {
    node.multi_instance.as_ref().ok_or_else(|| {
        EngineError::programmatic(format!("element `{}` is not a multi-instance activity", node.id))
    })
}

fn count(ctx: &CommandContext, execution_id: &str, name: &str) -> usize {
    ctx.unit_of_work()
        .find_by_id(execution_id)
        .and_then(|execution| execution.variables.get(name))
        .and_then(Value::as_u64)
        .unwrap_or(0) as usize
}

/// 首次进入多实例节点：创建多实例根执行并展开实例
pub(crate) async fn enter(
    ctx: &mut CommandContext,
    execution_id: &str,
    node: &Arc<FlowNode>,
) -> Result<()> {
    let spec = spec_of(node)?.clone();
    let incoming = ctx.execution(execution_id)?.clone();
    let parent = incoming.parent_id.clone().ok_or_else(|| {
        EngineError::programmatic(format!(
            "multi-instance activity `{}` entered by a process instance execution",
            node.id
        ))
    })?;

    let root = ctx.unit_of_work_mut().create_child(&parent)?;
    {
        let execution = ctx.execution_mut(&root)?;
        execution.current_element = Some(node.id.clone());
        execution.multi_instance_root = true;
        execution.scope = true;
        execution.concurrent = incoming.concurrent;
        execution.variables = incoming.variables;
    }
    ctx.unit_of_work_mut().delete_execution(execution_id, None)?;
    create_boundary_executions(ctx, &root, node).await?;

    let view = ctx.variables(&root);
    let total = match &spec.collection {
        Some(collection) => view
            .get(collection)
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0),
        None => spec.cardinality.unwrap_or(0),
    };
    let active = if spec.sequential { total.min(1) } else { total };
    ctx.set_variable_untracked(&root, vars::NUMBER_OF_INSTANCES, json!(total))?;
    ctx.set_variable_untracked(&root, vars::NUMBER_OF_COMPLETED_INSTANCES, json!(0))?;
    ctx.set_variable_untracked(&root, vars::NUMBER_OF_ACTIVE_INSTANCES, json!(active))?;
    debug!(
        activity = %node.id,
        root = %root,
        instances = total,
        sequential = spec.sequential,
        "entering multi-instance activity"
    );

    if total == 0 {
        return finish(ctx, &root);
    }
    if spec.sequential {
        let instance = create_instance(ctx, &root, node, false)?;
        ctx.agenda_mut()
            .plan_continue_multi_instance(&instance, &root, 0);
        return Ok(());
    }
    let instances = (0..total)
        .map(|_| create_instance(ctx, &root, node, true))
        .collect::<Result<Vec<_>>>()?;
    for (loop_counter, instance) in instances.iter().enumerate() {
        ctx.agenda_mut()
            .plan_continue_multi_instance(instance, &root, loop_counter);
    }
    Ok(())
}

fn create_instance(
    ctx: &mut CommandContext,
    root: &str,
    node: &FlowNode,
    concurrent: bool,
) -> Result<ExecutionId> {
    let instance = ctx.unit_of_work_mut().create_child(root)?;
    let execution = ctx.execution_mut(&instance)?;
    execution.current_element = Some(node.id.clone());
    execution.scope = node.is_sub_process_container();
    execution.concurrent = concurrent;
    execution.active = false;
    Ok(instance)
}

/// 启动单个实例：写入循环计数和集合元素后进入节点
pub(crate) fn continue_instance(
    ctx: &mut CommandContext,
    execution_id: &str,
    root: &str,
    loop_counter: usize,
) -> Result<()> {
    let node = ctx.node_of(execution_id)?;
    let spec = spec_of(&node)?;
    ctx.execution_mut(execution_id)?.active = true;
    ctx.set_variable_untracked(execution_id, vars::LOOP_COUNTER, json!(loop_counter))?;
    if let (Some(collection), Some(element_variable)) = (&spec.collection, &spec.element_variable) {
        let item = ctx
            .variables(root)
            .get(collection)
            .and_then(|items| items.get(loop_counter))
            .cloned()
            .unwrap_or(Value::Null);
        ctx.set_variable_untracked(execution_id, element_variable, item)?;
    }
    ctx.agenda_mut().plan_continue(execution_id);
    Ok(())
}

/// 单个实例完成
pub(crate) fn leave_instance(ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
    let node = ctx.node_of(execution_id)?;
    let spec = spec_of(&node)?.clone();
    let root = ctx.execution(execution_id)?.parent_id.clone().ok_or_else(|| {
        EngineError::programmatic(format!("multi-instance execution `{execution_id}` has no root"))
    })?;
    leave_node(ctx, execution_id, &node)?;

    let total = count(ctx, &root, vars::NUMBER_OF_INSTANCES);
    let completed = count(ctx, &root, vars::NUMBER_OF_COMPLETED_INSTANCES) + 1;
    let active = count(ctx, &root, vars::NUMBER_OF_ACTIVE_INSTANCES).saturating_sub(1);
    ctx.set_variable_untracked(&root, vars::NUMBER_OF_COMPLETED_INSTANCES, json!(completed))?;
    ctx.set_variable_untracked(&root, vars::NUMBER_OF_ACTIVE_INSTANCES, json!(active))?;
    ctx.unit_of_work_mut().force_update(&root);

    ctx.unit_of_work_mut().delete_descendants(execution_id, None)?;
    ctx.execution_mut(execution_id)?.active = false;
    debug!(
        activity = %node.id,
        execution = %execution_id,
        completed,
        total,
        "multi-instance instance completed"
    );

    if spec.sequential {
        let condition_met = spec
            .completion_condition
            .as_ref()
            .map(|condition| condition(&ctx.variables(execution_id)))
            .unwrap_or(false);
        if completed >= total || condition_met {
            return finish(ctx, &root);
        }
        ctx.set_variable_untracked(&root, vars::NUMBER_OF_ACTIVE_INSTANCES, json!(1))?;
        ctx.execution_mut(execution_id)?.current_element = Some(node.id.clone());
        ctx.agenda_mut()
            .plan_continue_multi_instance(execution_id, &root, completed);
        return Ok(());
    }

    if spec.async_leave {
        JobService::schedule_monitor_job(ctx, &root, Utc::now())?;
    } else {
        ctx.agenda_mut().plan_monitor_multi_instance(&root, false);
    }
    Ok(())
}

/// 并行多实例的完成检查
///
/// 完成数以根执行上持久化的计数为准；满足数量阈值、没有活动实例或完成条件为真时结束，
/// 存在死信实例时以 `MultiInstanceFailed` 失败。由作业触发且未满足时重新调度自身。
pub(crate) fn monitor(ctx: &mut CommandContext, root: &str, from_job: bool) -> Result<()> {
    if !ctx.execution(root)?.multi_instance_root {
        return Ok(());
    }
    let node = ctx.node_of(root)?;
    let spec = spec_of(&node)?.clone();

    let instances: Vec<ExecutionId> = ctx
        .unit_of_work()
        .find_children_by_parent(root)
        .into_iter()
        .filter(|child| {
            ctx.unit_of_work()
                .find_by_id(child)
                .map(|execution| execution.is_at(&node.id))
                .unwrap_or(false)
        })
        .collect();
    let total = count(ctx, root, vars::NUMBER_OF_INSTANCES);
    let completed = match ctx
        .execution(root)?
        .variables
        .get(vars::NUMBER_OF_COMPLETED_INSTANCES)
        .and_then(Value::as_u64)
    {
        Some(stored) => stored as usize,
        None => instances
            .iter()
            .filter_map(|id| ctx.unit_of_work().find_by_id(id))
            .filter(|execution| !execution.active)
            .count(),
    };
    let failed = instances
        .iter()
        .filter(|id| ctx.unit_of_work().has_dead_letter_job(id))
        .count();
    let active = instances
        .iter()
        .filter(|id| !ctx.unit_of_work().has_dead_letter_job(id))
        .filter_map(|id| ctx.unit_of_work().find_by_id(id))
        .filter(|execution| execution.active)
        .count();
    let condition_met = spec
        .completion_condition
        .as_ref()
        .map(|condition| condition(&ctx.variables(root)))
        .unwrap_or(false);

    debug!(
        activity = %node.id,
        completed,
        active,
        failed,
        total,
        "checking multi-instance completion"
    );
    if completed >= total || active == 0 || condition_met {
        if failed > 0 {
            return Err(EngineError::MultiInstanceFailed {
                activity: node.id.clone(),
                failed,
            });
        }
        return finish(ctx, root);
    }

    if from_job && active > 0 {
        let interval = chrono::Duration::from_std(ctx.config().multi_instance_monitor_interval())
            .map_err(|err| EngineError::Other(err.into()))?;
        JobService::schedule_monitor_job(ctx, root, Utc::now() + interval)?;
    }
    Ok(())
}

/// 结束多实例：取消剩余实例，清理计数和监控作业，多实例根沿出线离开
fn finish(ctx: &mut CommandContext, root: &str) -> Result<()> {
    let node = ctx.node_of(root)?;
    let boundaries: Vec<String> = node.boundary_events.clone();
    for child in ctx.unit_of_work().find_children_by_parent(root) {
        let at_boundary = ctx
            .unit_of_work()
            .find_by_id(&child)
            .and_then(|execution| execution.current_element.clone())
            .map(|element| boundaries.contains(&element))
            .unwrap_or(false);
        if !at_boundary {
            scopes::cancel_subtree(ctx, &child, delete_reason::MULTI_INSTANCE_COMPLETED)?;
        }
    }
    for job in ctx.unit_of_work().jobs_for_execution(root) {
        if job.kind == JobKind::MultiInstanceMonitor {
            ctx.unit_of_work_mut().delete_job(&job.id);
        }
    }

    let total = count(ctx, root, vars::NUMBER_OF_INSTANCES);
    let completed = count(ctx, root, vars::NUMBER_OF_COMPLETED_INSTANCES);
    {
        let execution = ctx.execution_mut(root)?;
        execution.multi_instance_root = false;
        execution.variables.remove(vars::NUMBER_OF_INSTANCES);
        execution.variables.remove(vars::NUMBER_OF_COMPLETED_INSTANCES);
        execution.variables.remove(vars::NUMBER_OF_ACTIVE_INSTANCES);
    }
    let event = EngineEvent::for_execution(EngineEventKind::MultiInstanceCompleted, ctx.execution(root)?)
        .with_payload(json!({ "instances": total, "completed": completed }));
    ctx.dispatch(event);
    debug!(activity = %node.id, root = %root, completed, "multi-instance activity completed");
    ctx.agenda_mut().plan_take_outgoing(root, true);
    Ok(())
}
