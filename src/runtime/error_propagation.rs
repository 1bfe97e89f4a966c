use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::behavior::fire_boundary;
use crate::error::{EngineError, Result};
use crate::flow::nodes::{EventTrigger, FlowNode, FlowNodeKind};
use crate::flow::ProcessDefinition;
use crate::history::ActivityGuard;

use super::context::CommandContext;
use super::{multi_instance, scopes};

/// 业务错误沿执行树向外传播
///
/// 每一层先查找作用域内的错误事件子流程，再查找附着在该层节点上的错误边界事件；
/// 到达流程实例根时继续进入调用方流程。精确匹配错误码的捕获者优先于捕获全部的。
pub(crate) fn propagate_error(ctx: &mut CommandContext, execution_id: &str, code: &str) -> Result<()> {
    let mut current = Some(execution_id.to_string());
    while let Some(id) = current {
        let execution = ctx.execution(&id)?.clone();
        let definition = ctx.definition(&execution.process_definition_key)?;

        if execution.scope && !execution.multi_instance_root {
            let container = if execution.is_process_instance() {
                None
            } else {
                execution.current_element.clone()
            };
            if let Some((event_sub_process, start)) =
                find_error_start(&definition, container.as_deref(), code)
            {
                debug!(
                    code,
                    scope = %id,
                    event_sub_process = %event_sub_process.id,
                    "error caught by event sub-process"
                );
                scopes::start_event_sub_process(
                    ctx,
                    &id,
                    &event_sub_process,
                    &start,
                    &Value::Null,
                    true,
                )?;
                return Ok(());
            }
        }

        if !execution.is_process_instance() && !multi_instance::is_instance(ctx, &id) {
            if let Some(boundary) = execution
                .current_element()
                .and_then(|element| find_error_boundary(&definition, element, code))
            {
                debug!(code, execution = %id, boundary = %boundary.id, "error caught by boundary event");
                let _guard = ActivityGuard::start(ctx.history(), execution.clone(), &boundary.id);
                return fire_boundary(ctx, &id, &boundary, &Value::Null);
            }
        }

        current = execution
            .parent_id
            .clone()
            .or_else(|| execution.super_execution_id.clone());
    }

    warn!(code, execution = %execution_id, "business fault not caught");
    Err(EngineError::UnhandledBusinessFault {
        code: code.to_string(),
    })
}

fn best_match(
    candidates: impl Iterator<Item = (Arc<FlowNode>, bool)>,
) -> Option<Arc<FlowNode>> {
    let mut catch_all = None;
    for (node, exact) in candidates {
        if exact {
            return Some(node);
        }
        if catch_all.is_none() {
            catch_all = Some(node);
        }
    }
    catch_all
}

fn find_error_boundary(
    definition: &ProcessDefinition,
    activity: &str,
    code: &str,
) -> Option<Arc<FlowNode>> {
    best_match(
        definition
            .boundary_events_of(activity)
            .into_iter()
            .filter_map(|boundary| {
                let exact = match &boundary.kind {
                    FlowNodeKind::BoundaryEvent { trigger, .. } => trigger.catches_error(code),
                    _ => None,
                }?;
                Some((boundary, exact))
            }),
    )
}

fn find_error_start(
    definition: &ProcessDefinition,
    container: Option<&str>,
    code: &str,
) -> Option<(Arc<FlowNode>, Arc<FlowNode>)> {
    let mut catch_all = None;
    for event_sub_process in definition.event_sub_processes_in(container) {
        let starts = definition
            .start_events_of(Some(&event_sub_process.id))
            .into_iter()
            .filter_map(|start| {
                let exact = match &start.kind {
                    FlowNodeKind::StartEvent {
                        trigger: trigger @ EventTrigger::Error(_),
                        ..
                    } => trigger.catches_error(code),
                    _ => None,
                }?;
                Some((start, exact))
            });
        for (start, exact) in starts {
            if exact {
                return Some((Arc::clone(&event_sub_process), start));
            }
            if catch_all.is_none() {
                catch_all = Some((Arc::clone(&event_sub_process), start));
            }
        }
    }
    catch_all
}
