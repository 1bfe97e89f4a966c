use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::flow::nodes::{EventTrigger, FlowNodeKind};

use super::context::CommandContext;
use super::scopes;

/// 扫描流程实例内等待条件事件的执行，条件为真时触发
///
/// 中间条件捕获事件和条件边界事件计划触发；事件子流程的条件开始事件直接启动事件子流程。
pub(crate) fn execute(ctx: &mut CommandContext, process_instance_id: &str) -> Result<()> {
    let snapshot = ctx.unit_of_work().executions_of_instance(process_instance_id);
    for id in snapshot {
        // 前面的触发可能已经取消了这个执行
        let Some(execution) = ctx.unit_of_work().find_by_id(&id).cloned() else {
            continue;
        };
        let Some(element) = execution.current_element.clone() else {
            continue;
        };
        let definition = ctx.definition(&execution.process_definition_key)?;
        let Some(node) = definition.node(&element).cloned() else {
            continue;
        };

        match &node.kind {
            FlowNodeKind::IntermediateCatch(EventTrigger::Conditional(condition))
                if execution.active =>
            {
                if condition(&ctx.variables(&id)) {
                    debug!(execution = %id, activity = %node.id, "conditional catch event satisfied");
                    ctx.agenda_mut().plan_trigger(&id, None, Value::Null);
                }
            }
            FlowNodeKind::BoundaryEvent {
                trigger: EventTrigger::Conditional(condition),
                ..
            } => {
                let Some(attached) = execution.parent_id.as_deref() else {
                    continue;
                };
                if condition(&ctx.variables(attached)) {
                    debug!(execution = %id, boundary = %node.id, "conditional boundary event satisfied");
                    ctx.agenda_mut().plan_trigger(&id, None, Value::Null);
                }
            }
            FlowNodeKind::StartEvent {
                trigger: EventTrigger::Conditional(condition),
                ..
            } if execution.event_scope && !execution.active => {
                let Some(scope) = execution.parent_id.as_deref() else {
                    continue;
                };
                if condition(&ctx.variables(scope)) {
                    debug!(listener = %id, start = %node.id, "conditional event sub-process start satisfied");
                    scopes::fire_event_sub_process_start(ctx, &id, &Value::Null)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}
