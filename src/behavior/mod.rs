// 节点行为：给定停留在某节点的执行，执行该节点的语义

mod call_activity;
mod delegate;
mod events;
mod gateways;
mod listeners;
mod subprocess;
mod tasks;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::flow::nodes::{EndEventKind, FlowNodeKind, ThrowEventKind};
use crate::runtime::{multi_instance, CommandContext};

pub use call_activity::CallActivityBehavior;
pub use delegate::DelegateExecution;
pub use events::{
    BoundaryEventBehavior, CompensationThrowBehavior, ErrorEndEventBehavior,
    IntermediateCatchBehavior, SignalThrowBehavior, TerminateEndEventBehavior,
};
pub use gateways::ParallelGatewayBehavior;
pub use listeners::{listener_from_fn, ExecutionListener, ListenerEvent};
pub use subprocess::{AdhocSubProcessBehavior, SubProcessBehavior};
pub use tasks::{ServiceTaskBehavior, WaitStateBehavior};

pub(crate) use call_activity::map_outputs;
pub(crate) use events::{fire_boundary, subscribe_for_trigger};

/// 节点行为
///
/// `execute` 可以向议程追加后续操作，也可以返回业务错误
/// (`EngineError::BusinessFault`)，由引擎沿作用域向外寻找捕获者。
#[async_trait]
pub trait ActivityBehavior: Send + Sync {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()>;

    /// 是否为可触发的等待状态
    fn is_triggerable(&self) -> bool {
        false
    }

    async fn trigger(
        &self,
        ctx: &mut CommandContext,
        execution_id: &str,
        _signal: Option<&str>,
        _payload: &Value,
    ) -> Result<()> {
        let activity = ctx
            .execution(execution_id)?
            .current_element
            .clone()
            .unwrap_or_default();
        Err(EngineError::NotTriggerable { activity })
    }
}

/// 服务任务处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, execution: &mut DelegateExecution<'_>) -> Result<()>;
}

/// 同步闭包处理器
pub struct FnTaskHandler<F>(F);

#[async_trait]
impl<F> TaskHandler for FnTaskHandler<F>
where
    F: Fn(&mut DelegateExecution<'_>) -> Result<()> + Send + Sync,
{
    async fn execute(&self, execution: &mut DelegateExecution<'_>) -> Result<()> {
        (self.0)(execution)
    }
}

/// 从同步闭包创建任务处理器
pub fn handler_from_fn<F>(func: F) -> Arc<dyn TaskHandler>
where
    F: Fn(&mut DelegateExecution<'_>) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(FnTaskHandler(func))
}

/// 任务处理器注册表
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.write().insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// 离开当前节点
///
/// 多实例的单个实例交给多实例完成逻辑，其余情况按出线继续。
pub fn leave(ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
    if multi_instance::is_instance(ctx, execution_id) {
        return multi_instance::leave_instance(ctx, execution_id);
    }
    ctx.agenda_mut().plan_take_outgoing(execution_id, true);
    Ok(())
}

/// 把触发时携带的对象负载写入变量
pub fn apply_payload(ctx: &mut CommandContext, execution_id: &str, payload: &Value) -> Result<()> {
    if let Value::Object(values) = payload {
        for (name, value) in values {
            ctx.set_variable(execution_id, name, value.clone())?;
        }
    }
    Ok(())
}

/// 节点类型对应的内置行为，None 表示直通节点
pub fn default_behavior(kind: &FlowNodeKind) -> Option<Arc<dyn ActivityBehavior>> {
    match kind {
        FlowNodeKind::StartEvent { .. }
        | FlowNodeKind::Task
        | FlowNodeKind::ExclusiveGateway
        | FlowNodeKind::EventSubProcess
        | FlowNodeKind::Custom
        | FlowNodeKind::EndEvent(EndEventKind::None)
        | FlowNodeKind::IntermediateThrow(ThrowEventKind::None) => None,
        FlowNodeKind::EndEvent(EndEventKind::Error(code)) => {
            Some(Arc::new(ErrorEndEventBehavior::new(code.clone())))
        }
        FlowNodeKind::EndEvent(EndEventKind::Terminate) => Some(Arc::new(TerminateEndEventBehavior)),
        FlowNodeKind::EndEvent(EndEventKind::Compensate(activity))
        | FlowNodeKind::IntermediateThrow(ThrowEventKind::Compensate(activity)) => {
            Some(Arc::new(CompensationThrowBehavior::new(activity.clone())))
        }
        FlowNodeKind::IntermediateThrow(ThrowEventKind::Signal(signal)) => {
            Some(Arc::new(SignalThrowBehavior::new(signal.clone())))
        }
        FlowNodeKind::IntermediateCatch(trigger) => {
            Some(Arc::new(IntermediateCatchBehavior::new(trigger.clone())))
        }
        FlowNodeKind::BoundaryEvent { trigger, .. } => {
            Some(Arc::new(BoundaryEventBehavior::new(trigger.clone())))
        }
        FlowNodeKind::ServiceTask { handler } => {
            Some(Arc::new(ServiceTaskBehavior::new(handler.clone())))
        }
        FlowNodeKind::UserTask | FlowNodeKind::ReceiveTask => Some(Arc::new(WaitStateBehavior)),
        FlowNodeKind::ParallelGateway => Some(Arc::new(ParallelGatewayBehavior)),
        FlowNodeKind::SubProcess => Some(Arc::new(SubProcessBehavior)),
        FlowNodeKind::AdhocSubProcess(_) => Some(Arc::new(AdhocSubProcessBehavior)),
        FlowNodeKind::CallActivity(spec) => Some(Arc::new(CallActivityBehavior::new(spec.clone()))),
    }
}
