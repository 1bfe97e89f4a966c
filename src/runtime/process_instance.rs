use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::behavior::{self, map_outputs, ListenerEvent};
use crate::error::{EngineError, Result};
use crate::events::EngineEventKind;
use crate::flow::constants::delete_reason;
use crate::flow::nodes::FlowNodeKind;
use crate::flow::ProcessDefinition;
use crate::state::ExecutionId;

use super::context::CommandContext;
use super::scopes;

/// 启动流程实例
///
/// 根执行作为流程级作用域停留在初始开始事件上，令牌由其子执行携带。
/// 由调用活动启动时 `super_execution` 指向调用方执行。
pub(crate) fn start(
    ctx: &mut CommandContext,
    definition: &Arc<ProcessDefinition>,
    variables: BTreeMap<String, Value>,
    super_execution: Option<&str>,
) -> Result<ExecutionId> {
    let initial = definition.initial_of(None).ok_or_else(|| {
        EngineError::InvalidDefinition(format!(
            "process `{}` has no none start event",
            definition.key
        ))
    })?;

    let root = ctx.unit_of_work_mut().create_process_instance(&definition.key);
    {
        let execution = ctx.execution_mut(&root)?;
        execution.current_element = Some(initial.id.clone());
        execution.super_execution_id = super_execution.map(str::to_string);
    }
    for (name, value) in variables {
        ctx.set_variable_untracked(&root, &name, value)?;
    }
    if let Some(super_execution) = super_execution {
        ctx.execution_mut(super_execution)?.sub_process_instance_id = Some(root.clone());
    }

    let instance = ctx.execution(&root)?.clone();
    ctx.history().record_process_start(&instance);
    ctx.fire_listeners(
        &root,
        definition.listeners_for(ListenerEvent::Start),
        ListenerEvent::Start,
    )?;
    ctx.dispatch_for(EngineEventKind::ProcessStarted, &root);

    scopes::enter_scope(ctx, &root, None)?;

    let child = ctx.unit_of_work_mut().create_child(&root)?;
    ctx.execution_mut(&child)?.current_element = Some(initial.id.clone());
    ctx.agenda_mut().plan_continue(&child);
    info!(
        process = %definition.key,
        process_instance = %root,
        called = super_execution.is_some(),
        "process instance started"
    );
    Ok(root)
}

/// 结束流程实例；仍有活动子执行时什么也不做
///
/// 被调用的流程实例结束后把输出变量写回调用方，调用方执行离开调用活动。
pub(crate) fn end(ctx: &mut CommandContext, root_id: &str) -> Result<()> {
    let remaining = scopes::remaining_children(ctx, root_id);
    if remaining > 0 {
        debug!(process_instance = %root_id, remaining, "process instance still has active executions");
        return Ok(());
    }
    let definition = ctx.definition_of(root_id)?;
    ctx.unit_of_work_mut()
        .delete_descendants(root_id, Some(delete_reason::PROCESS_COMPLETED))?;
    ctx.execution_mut(root_id)?.ended = true;

    let instance = ctx.execution(root_id)?.clone();
    ctx.history().record_process_end(&instance, None);
    ctx.fire_listeners(
        root_id,
        definition.listeners_for(ListenerEvent::End),
        ListenerEvent::End,
    )?;
    ctx.dispatch_for(EngineEventKind::ProcessCompleted, root_id);
    info!(process = %definition.key, process_instance = %root_id, "process instance completed");

    let caller = instance
        .super_execution_id
        .clone()
        .filter(|id| ctx.unit_of_work().contains(id));
    let Some(caller) = caller else {
        return ctx
            .unit_of_work_mut()
            .delete_execution(root_id, Some(delete_reason::PROCESS_COMPLETED));
    };

    let call_activity = ctx.node_of(&caller)?;
    if let FlowNodeKind::CallActivity(spec) = &call_activity.kind {
        map_outputs(ctx, spec, root_id, &caller)?;
    }
    ctx.unit_of_work_mut()
        .delete_execution(root_id, Some(delete_reason::PROCESS_COMPLETED))?;
    debug!(
        process_instance = %root_id,
        caller = %caller,
        activity = %call_activity.id,
        "returning to calling process"
    );
    behavior::leave(ctx, &caller)
}
