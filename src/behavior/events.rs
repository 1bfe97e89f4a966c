use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::flow::constants::delete_reason;
use crate::flow::nodes::{EventTrigger, FlowNode, FlowNodeKind};
use crate::runtime::{compensation, end_execution, error_propagation, scopes, CommandContext};
use crate::state::{EventSubscription, SubscriptionKind};

use super::{apply_payload, leave, ActivityBehavior};

/// 为消息、信号和变量监听触发创建事件订阅；其余触发类型不需要订阅
pub(crate) fn subscribe_for_trigger(
    ctx: &mut CommandContext,
    execution_id: &str,
    activity_id: &str,
    trigger: &EventTrigger,
) -> Result<()> {
    let process_instance_id = ctx.execution(execution_id)?.process_instance_id.clone();
    let subscription = match trigger {
        EventTrigger::Message(name) => EventSubscription::new(
            SubscriptionKind::Message,
            Some(name.clone()),
            execution_id,
            process_instance_id,
            activity_id,
        ),
        EventTrigger::Signal(name) => EventSubscription::new(
            SubscriptionKind::Signal,
            Some(name.clone()),
            execution_id,
            process_instance_id,
            activity_id,
        ),
        EventTrigger::VariableListener { variable, change } => EventSubscription::new(
            SubscriptionKind::VariableListener,
            Some(variable.clone()),
            execution_id,
            process_instance_id,
            activity_id,
        )
        .with_configuration(change.as_str()),
        _ => return Ok(()),
    };
    debug!(
        execution = %execution_id,
        activity = %activity_id,
        kind = ?subscription.kind,
        "created event subscription"
    );
    ctx.unit_of_work_mut().add_subscription(subscription);
    Ok(())
}

fn current_activity(ctx: &CommandContext, execution_id: &str) -> Result<String> {
    ctx.execution(execution_id)?
        .current_element
        .clone()
        .ok_or_else(|| {
            EngineError::programmatic(format!("execution `{execution_id}` has no current element"))
        })
}

/// 中间捕获事件
pub struct IntermediateCatchBehavior {
    trigger: EventTrigger,
}

impl IntermediateCatchBehavior {
    pub fn new(trigger: EventTrigger) -> Self {
        Self { trigger }
    }
}

#[async_trait]
impl ActivityBehavior for IntermediateCatchBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        if let EventTrigger::Conditional(condition) = &self.trigger {
            if condition(&ctx.variables(execution_id)) {
                return leave(ctx, execution_id);
            }
            return Ok(());
        }
        let activity = current_activity(ctx, execution_id)?;
        subscribe_for_trigger(ctx, execution_id, &activity, &self.trigger)
    }

    fn is_triggerable(&self) -> bool {
        true
    }

    async fn trigger(
        &self,
        ctx: &mut CommandContext,
        execution_id: &str,
        _signal: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        for subscription in ctx.unit_of_work().subscriptions_for_execution(execution_id) {
            ctx.unit_of_work_mut().delete_subscription(&subscription.id);
        }
        apply_payload(ctx, execution_id, payload)?;
        leave(ctx, execution_id)
    }
}

/// 边界事件：执行时只登记订阅，触发时中断或并行地离开
pub struct BoundaryEventBehavior {
    trigger: EventTrigger,
}

impl BoundaryEventBehavior {
    pub fn new(trigger: EventTrigger) -> Self {
        Self { trigger }
    }
}

#[async_trait]
impl ActivityBehavior for BoundaryEventBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let activity = current_activity(ctx, execution_id)?;
        subscribe_for_trigger(ctx, execution_id, &activity, &self.trigger)
    }

    fn is_triggerable(&self) -> bool {
        true
    }

    async fn trigger(
        &self,
        ctx: &mut CommandContext,
        execution_id: &str,
        _signal: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        let node = ctx.node_of(execution_id)?;
        let attached = ctx.execution(execution_id)?.parent_id.clone().ok_or_else(|| {
            EngineError::programmatic(format!(
                "boundary execution `{execution_id}` has no attached execution"
            ))
        })?;
        fire_boundary(ctx, &attached, &node, payload)
    }
}

/// 触发附着在 `attached_id` 上的边界事件
pub(crate) fn fire_boundary(
    ctx: &mut CommandContext,
    attached_id: &str,
    boundary: &FlowNode,
    payload: &Value,
) -> Result<()> {
    let FlowNodeKind::BoundaryEvent { interrupting, .. } = &boundary.kind else {
        return Err(EngineError::programmatic(format!(
            "element `{}` is not a boundary event",
            boundary.id
        )));
    };
    let attached = ctx.execution(attached_id)?.clone();
    debug!(
        execution = %attached_id,
        boundary = %boundary.id,
        interrupting = *interrupting,
        "boundary event fired"
    );

    let (parent, concurrent) = if *interrupting {
        let parent = attached.parent_id.clone().ok_or_else(|| {
            EngineError::programmatic(format!(
                "boundary event `{}` attached to a process instance",
                boundary.id
            ))
        })?;
        scopes::cancel_subtree(ctx, attached_id, delete_reason::BOUNDARY_EVENT_INTERRUPTING)?;
        (parent, attached.concurrent)
    } else {
        let scope = ctx
            .unit_of_work()
            .tree()
            .parent_scope(attached_id)
            .ok_or_else(|| {
                EngineError::programmatic(format!("execution `{attached_id}` has no parent scope"))
            })?;
        (scope, true)
    };

    let execution_id = ctx.unit_of_work_mut().create_child(&parent)?;
    {
        let execution = ctx.execution_mut(&execution_id)?;
        execution.current_element = Some(boundary.id.clone());
        execution.concurrent = concurrent;
    }
    apply_payload(ctx, &execution_id, payload)?;
    ctx.agenda_mut().plan_take_outgoing(&execution_id, true);
    Ok(())
}

/// 错误结束事件：抛出业务错误
pub struct ErrorEndEventBehavior {
    error_code: String,
}

impl ErrorEndEventBehavior {
    pub fn new(error_code: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
        }
    }
}

#[async_trait]
impl ActivityBehavior for ErrorEndEventBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        error_propagation::propagate_error(ctx, execution_id, &self.error_code)
    }
}

/// 终止结束事件：结束所在作用域的全部执行
pub struct TerminateEndEventBehavior;

#[async_trait]
impl ActivityBehavior for TerminateEndEventBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let scope = ctx
            .unit_of_work()
            .tree()
            .parent_scope(execution_id)
            .ok_or_else(|| {
                EngineError::programmatic(format!("execution `{execution_id}` has no parent scope"))
            })?;
        debug!(execution = %execution_id, scope = %scope, "terminating scope");
        scopes::cancel_children(ctx, &scope, delete_reason::TERMINATED)?;
        end_execution::scope_completed(ctx, &scope)
    }
}

/// 补偿抛出（中间事件或结束事件），不等待补偿处理完成
pub struct CompensationThrowBehavior {
    activity: Option<String>,
}

impl CompensationThrowBehavior {
    pub fn new(activity: Option<String>) -> Self {
        Self { activity }
    }
}

#[async_trait]
impl ActivityBehavior for CompensationThrowBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let scope = ctx
            .unit_of_work()
            .tree()
            .parent_scope(execution_id)
            .ok_or_else(|| {
                EngineError::programmatic(format!("execution `{execution_id}` has no parent scope"))
            })?;
        let planned = compensation::throw_compensation(ctx, &scope, self.activity.as_deref())?;
        debug!(execution = %execution_id, handlers = planned, "compensation thrown");
        leave(ctx, execution_id)
    }
}

/// 信号抛出：广播给所有流程实例中的信号订阅
pub struct SignalThrowBehavior {
    signal: String,
}

impl SignalThrowBehavior {
    pub fn new(signal: impl Into<String>) -> Self {
        Self {
            signal: signal.into(),
        }
    }
}

#[async_trait]
impl ActivityBehavior for SignalThrowBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let store = Arc::clone(&ctx.services().store);
        let to_load: BTreeSet<String> = store
            .find_subscriptions_by_event(SubscriptionKind::Signal, &self.signal)
            .await?
            .into_iter()
            .map(|subscription| subscription.process_instance_id)
            .filter(|process_instance| !ctx.unit_of_work().is_loaded(process_instance))
            .collect();
        let to_load: Vec<String> = to_load.into_iter().collect();
        ctx.unit_of_work_mut()
            .load_instances(store.as_ref(), &to_load)
            .await?;

        let subscriptions = ctx
            .unit_of_work()
            .subscriptions_by_event(SubscriptionKind::Signal, &self.signal);
        debug!(
            signal = %self.signal,
            subscriptions = subscriptions.len(),
            "throwing signal"
        );
        for subscription in &subscriptions {
            scopes::fire_subscription(ctx, subscription, &Value::Null)?;
        }
        leave(ctx, execution_id)
    }
}
