// 补偿：已完成作用域的副本、补偿订阅的重放和补偿处理器的收尾

use std::collections::HashMap;

use tracing::debug;

use crate::error::{EngineError, Result};
use crate::events::EngineEventKind;
use crate::flow::constants::delete_reason;
use crate::flow::nodes::FlowNode;
use crate::state::{EventSubscription, ExecutionId, SubscriptionKind};

use super::context::CommandContext;
use super::{end_execution, scopes};

/// 为即将结束的可补偿作用域创建事件作用域副本
///
/// 副本挂在流程实例根执行下，保持非活动；原作用域上的补偿订阅转移到副本，
/// 并在父作用域上登记指向副本的补偿订阅。嵌套作用域先前留下的副本同样挂在根执行下，
/// 不随外层作用域删除。
pub(crate) fn create_compensation_copy(
    ctx: &mut CommandContext,
    scope_id: &str,
    node: &FlowNode,
) -> Result<ExecutionId> {
    let process_instance_id = ctx.execution(scope_id)?.process_instance_id.clone();
    let parent_scope = ctx
        .unit_of_work()
        .tree()
        .parent_scope(scope_id)
        .ok_or_else(|| {
            EngineError::programmatic(format!("scope `{scope_id}` has no parent scope"))
        })?;

    let mut originals = vec![scope_id.to_string()];
    originals.extend(ctx.unit_of_work().tree().descendants_pre_order(scope_id));

    let mut copies: HashMap<ExecutionId, ExecutionId> = HashMap::new();
    for original_id in originals {
        let original = ctx.execution(&original_id)?.clone();
        let parent = original
            .parent_id
            .as_ref()
            .and_then(|parent| copies.get(parent))
            .cloned()
            .unwrap_or_else(|| process_instance_id.clone());
        let copy_id = ctx.unit_of_work_mut().create_child(&parent)?;
        {
            let copy = ctx.execution_mut(&copy_id)?;
            copy.current_element = original.current_element.clone();
            copy.scope = original.scope;
            copy.event_scope = true;
            copy.active = false;
            copy.variables = original.variables.clone();
        }
        for subscription in ctx.unit_of_work().subscriptions_for_execution(&original_id) {
            if subscription.kind != SubscriptionKind::Compensate {
                continue;
            }
            if let Some(moved) = ctx.unit_of_work_mut().subscription_mut(&subscription.id) {
                moved.execution_id = copy_id.clone();
            }
        }
        copies.insert(original_id, copy_id);
    }

    let copy_root = copies.get(scope_id).cloned().ok_or_else(|| {
        EngineError::programmatic(format!("compensation copy of `{scope_id}` missing"))
    })?;
    ctx.unit_of_work_mut().add_subscription(
        EventSubscription::new(
            SubscriptionKind::Compensate,
            None,
            parent_scope,
            process_instance_id,
            node.id.clone(),
        )
        .with_configuration(copy_root.clone()),
    );
    debug!(scope = %scope_id, copy = %copy_root, activity = %node.id, "created compensation copy");
    Ok(copy_root)
}

/// 按完成顺序的逆序重放作用域上的补偿订阅，返回计划的补偿处理器数量
///
/// 指定 `activity` 时只补偿该活动。
pub(crate) fn throw_compensation(
    ctx: &mut CommandContext,
    scope_id: &str,
    activity: Option<&str>,
) -> Result<usize> {
    let mut subscriptions: Vec<EventSubscription> = ctx
        .unit_of_work()
        .subscriptions_for_execution(scope_id)
        .into_iter()
        .filter(|subscription| subscription.kind == SubscriptionKind::Compensate)
        .filter(|subscription| activity.map_or(true, |target| subscription.activity_id == target))
        .collect();
    subscriptions.reverse();

    let mut planned = 0;
    for subscription in subscriptions {
        ctx.unit_of_work_mut().delete_subscription(&subscription.id);
        planned += compensate(ctx, &subscription)?;
    }
    Ok(planned)
}

fn compensate(ctx: &mut CommandContext, subscription: &EventSubscription) -> Result<usize> {
    let definition = ctx.definition_of(&subscription.execution_id)?;
    let copy = subscription
        .configuration
        .clone()
        .filter(|copy| ctx.unit_of_work().contains(copy));

    if let Some(handler) = definition.compensation_handler_for(&subscription.activity_id) {
        let host = copy.unwrap_or_else(|| subscription.execution_id.clone());
        ctx.execution_mut(&host)?.active = true;
        let child = ctx.unit_of_work_mut().create_child(&host)?;
        ctx.execution_mut(&child)?.current_element = Some(handler.id.clone());
        debug!(
            activity = %subscription.activity_id,
            handler = %handler.id,
            execution = %child,
            "compensation handler planned"
        );
        ctx.agenda_mut().plan_continue_in_compensation(&child);
        return Ok(1);
    }

    let Some(copy) = copy else {
        return Ok(0);
    };
    let planned = throw_compensation(ctx, &copy, None)?;
    // 处理器可能都挂在嵌套作用域的副本上
    let hosts_handlers = ctx
        .unit_of_work()
        .tree()
        .descendants_pre_order(&copy)
        .iter()
        .filter_map(|id| ctx.unit_of_work().find_by_id(id))
        .any(|execution| execution.active);
    if hosts_handlers {
        ctx.execution_mut(&copy)?.active = true;
    } else {
        ctx.unit_of_work_mut()
            .delete_subtree(&copy, Some(delete_reason::COMPENSATION_DONE))?;
    }
    Ok(planned)
}

/// 补偿处理器结束：删除处理器执行和已经没有子执行的补偿副本，
/// 然后在普通作用域内没有其他执行时结束该作用域
pub(crate) fn cleanup_compensation(ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
    let execution = ctx.execution(execution_id)?.clone();
    if let Some(handler) = execution.current_element() {
        ctx.history().record_activity_end(&execution, handler, None);
    }
    ctx.dispatch_for(EngineEventKind::ActivityCompleted, execution_id);
    ctx.unit_of_work_mut()
        .delete_subtree(execution_id, Some(delete_reason::COMPENSATION_DONE))?;

    let mut current = execution.parent_id.clone();
    while let Some(parent_id) = current {
        let Some(parent) = ctx.unit_of_work().find_by_id(&parent_id).cloned() else {
            return Ok(());
        };
        if parent.event_scope {
            if !all_descendants_ended(ctx, &parent_id) {
                return Ok(());
            }
            ctx.unit_of_work_mut()
                .delete_subtree(&parent_id, Some(delete_reason::COMPENSATION_DONE))?;
            current = parent.parent_id.clone();
            continue;
        }
        if scopes::remaining_children(ctx, &parent_id) > 0 {
            return Ok(());
        }
        debug!(scope = %parent_id, "compensation finished, completing scope");
        scopes::delete_idle_event_scope_children(ctx, &parent_id)?;
        return end_execution::scope_completed(ctx, &parent_id);
    }
    Ok(())
}

/// 副本下不再有活动执行，也不再有待重放的补偿订阅
fn all_descendants_ended(ctx: &CommandContext, execution_id: &str) -> bool {
    let uow = ctx.unit_of_work();
    let descendants = uow.tree().descendants_pre_order(execution_id);
    let active = descendants
        .iter()
        .filter_map(|id| uow.find_by_id(id))
        .any(|execution| execution.active);
    let pending = std::iter::once(execution_id.to_string())
        .chain(descendants.iter().cloned())
        .any(|id| {
            uow.subscriptions_for_execution(&id)
                .iter()
                .any(|subscription| subscription.kind == SubscriptionKind::Compensate)
        });
    !active && !pending
}
