use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, instrument};

use crate::behavior::{HandlerRegistry, TaskHandler};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEventListener, EventDispatcher};
use crate::flow::nodes::FlowNodeKind;
use crate::flow::{ProcessDefinition, ProcessRegistry};
use crate::history::{HistorySink, NoopHistory};
use crate::jobs::{Job, JobKind, JobState};
use crate::state::{EntityStore, EventSubscription, Execution, ExecutionId, SubscriptionKind};

use super::context::CommandContext;
use super::debugger::ProcessDebugger;
use super::services::EngineServices;
use super::{end_execution, processor, scopes};

/// 流程引擎：命令层入口
///
/// 每个命令打开一个命令上下文，按需加载流程实例，向议程放入初始操作并清空议程，
/// 最后原子地提交变更集。任何错误都会丢弃上下文，存储保持不变。
#[derive(Clone)]
pub struct ProcessEngine {
    services: Arc<EngineServices>,
}

/// 流程引擎构建器
#[derive(Default)]
pub struct ProcessEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn EntityStore>>,
    history: Option<Arc<dyn HistorySink>>,
    debugger: Option<Arc<dyn ProcessDebugger>>,
    handlers: Vec<(String, Arc<dyn TaskHandler>)>,
    listeners: Vec<Arc<dyn EngineEventListener>>,
    definitions: Vec<ProcessDefinition>,
}

impl ProcessEngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn EntityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySink>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_debugger(mut self, debugger: Arc<dyn ProcessDebugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.push((name.into(), handler));
        self
    }

    pub fn with_event_listener(mut self, listener: Arc<dyn EngineEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_definition(mut self, definition: ProcessDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn build(self) -> Result<ProcessEngine> {
        let store = match self.store {
            Some(store) => store,
            None => default_store()?,
        };
        let registry = ProcessRegistry::new();
        for definition in self.definitions {
            registry.register(definition);
        }
        let handlers = HandlerRegistry::new();
        for (name, handler) in self.handlers {
            handlers.register(name, handler);
        }
        let events = EventDispatcher::new();
        for listener in self.listeners {
            events.add_listener(listener);
        }
        Ok(ProcessEngine {
            services: Arc::new(EngineServices {
                config: self.config,
                store,
                registry,
                handlers,
                events,
                history: self.history.unwrap_or_else(|| Arc::new(NoopHistory)),
                debugger: self.debugger,
            }),
        })
    }
}

#[cfg(feature = "memory-store")]
fn default_store() -> Result<Arc<dyn EntityStore>> {
    Ok(Arc::new(crate::state::MemoryStore::new()))
}

#[cfg(not(feature = "memory-store"))]
fn default_store() -> Result<Arc<dyn EntityStore>> {
    Err(EngineError::programmatic("no entity store configured"))
}

fn into_variables(variables: Value) -> Result<BTreeMap<String, Value>> {
    match variables {
        Value::Null => Ok(BTreeMap::new()),
        Value::Object(values) => Ok(values.into_iter().collect()),
        other => Err(EngineError::programmatic(format!(
            "variables must be a JSON object, got {other}"
        ))),
    }
}

/// 负载是否为非空对象（会写入变量）
fn carries_variables(payload: &Value) -> bool {
    payload.as_object().map_or(false, |values| !values.is_empty())
}

impl ProcessEngine {
    pub fn builder() -> ProcessEngineBuilder {
        ProcessEngineBuilder::new()
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    /// 部署流程定义，同 key 覆盖
    pub fn deploy(&self, definition: ProcessDefinition) -> Arc<ProcessDefinition> {
        debug!(process = %definition.key, "deploying process definition");
        self.services.registry.register(definition)
    }

    pub fn register_handler(&self, name: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.services.handlers.register(name, handler);
    }

    pub fn add_event_listener(&self, listener: Arc<dyn EngineEventListener>) {
        self.services.events.add_listener(listener);
    }

    // ---- command plumbing ----

    fn open(&self) -> CommandContext {
        CommandContext::new(Arc::clone(&self.services))
    }

    async fn load(&self, ctx: &mut CommandContext, process_instances: &[String]) -> Result<()> {
        ctx.unit_of_work_mut()
            .load_instances(self.services.store.as_ref(), process_instances)
            .await
    }

    /// 加载执行所属的流程实例
    async fn load_for_execution(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let execution = self
            .services
            .store
            .find_execution(execution_id)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;
        self.load(ctx, &[execution.process_instance_id]).await
    }

    async fn finish(&self, mut ctx: CommandContext) -> Result<()> {
        processor::run_agenda(&mut ctx).await?;
        let operations = ctx.operations_run;
        let changes = ctx.into_change_set();
        debug!(
            operations,
            inserted = changes.inserted_executions.len(),
            updated = changes.updated_executions.len(),
            deleted = changes.deleted_executions.len(),
            "committing command"
        );
        self.services.store.commit(changes).await
    }

    // ---- commands ----

    /// 启动流程实例，返回流程实例 id
    #[instrument(skip(self, variables))]
    pub async fn start_process_instance(&self, key: &str, variables: Value) -> Result<ExecutionId> {
        let definition = self
            .services
            .registry
            .get(key)
            .ok_or_else(|| EngineError::UnknownProcess(key.to_string()))?;
        let variables = into_variables(variables)?;
        let mut ctx = self.open();
        let process_instance = super::process_instance::start(&mut ctx, &definition, variables, None)?;
        self.finish(ctx).await?;
        Ok(process_instance)
    }

    /// 唤醒停留在等待状态的执行，对象负载写入变量
    #[instrument(skip(self, payload))]
    pub async fn trigger(&self, execution_id: &str, payload: Value) -> Result<()> {
        let mut ctx = self.open();
        self.load_for_execution(&mut ctx, execution_id).await?;
        let process_instance = ctx.execution(execution_id)?.process_instance_id.clone();
        let carries_variables = carries_variables(&payload);
        ctx.agenda_mut().plan_trigger(execution_id, None, payload);
        if carries_variables {
            ctx.agenda_mut()
                .plan_evaluate_conditional_events(&process_instance);
        }
        self.finish(ctx).await
    }

    /// 广播信号，返回被触发的订阅数
    #[instrument(skip(self, payload))]
    pub async fn signal_event_received(&self, signal: &str, payload: Value) -> Result<usize> {
        let subscriptions = self
            .services
            .store
            .find_subscriptions_by_event(SubscriptionKind::Signal, signal)
            .await?;
        let mut process_instances: Vec<String> = subscriptions
            .into_iter()
            .map(|subscription| subscription.process_instance_id)
            .collect();
        process_instances.sort();
        process_instances.dedup();

        let mut ctx = self.open();
        self.load(&mut ctx, &process_instances).await?;
        let subscriptions = ctx
            .unit_of_work()
            .subscriptions_by_event(SubscriptionKind::Signal, signal);
        for subscription in &subscriptions {
            scopes::fire_subscription(&mut ctx, subscription, &payload)?;
        }
        if carries_variables(&payload) {
            for process_instance in &process_instances {
                ctx.agenda_mut()
                    .plan_evaluate_conditional_events(process_instance);
            }
        }
        self.finish(ctx).await?;
        Ok(subscriptions.len())
    }

    /// 向执行（或其流程实例内）投递消息；找不到订阅时返回错误
    #[instrument(skip(self, payload))]
    pub async fn message_event_received(
        &self,
        message: &str,
        execution_id: &str,
        payload: Value,
    ) -> Result<()> {
        let mut ctx = self.open();
        self.load_for_execution(&mut ctx, execution_id).await?;
        let process_instance = ctx.execution(execution_id)?.process_instance_id.clone();
        let subscription = ctx
            .unit_of_work()
            .subscriptions_of_instance(&process_instance)
            .into_iter()
            .filter(|subscription| subscription.matches(SubscriptionKind::Message, message))
            .find(|subscription| {
                subscription.execution_id == execution_id || process_instance == execution_id
            })
            .ok_or_else(|| {
                EngineError::programmatic(format!(
                    "execution `{execution_id}` has no subscription for message `{message}`"
                ))
            })?;
        scopes::fire_subscription(&mut ctx, &subscription, &payload)?;
        if carries_variables(&payload) {
            ctx.agenda_mut()
                .plan_evaluate_conditional_events(&process_instance);
        }
        self.finish(ctx).await
    }

    /// 设置变量后评估流程实例内的条件事件
    pub async fn set_variables(&self, execution_id: &str, variables: Value) -> Result<()> {
        self.write_variables(execution_id, variables, false).await
    }

    pub async fn set_variables_local(&self, execution_id: &str, variables: Value) -> Result<()> {
        self.write_variables(execution_id, variables, true).await
    }

    async fn write_variables(&self, execution_id: &str, variables: Value, local: bool) -> Result<()> {
        let variables = into_variables(variables)?;
        let mut ctx = self.open();
        self.load_for_execution(&mut ctx, execution_id).await?;
        for (name, value) in variables {
            if local {
                ctx.set_variable_local(execution_id, &name, value)?;
            } else {
                ctx.set_variable(execution_id, &name, value)?;
            }
        }
        let process_instance = ctx.execution(execution_id)?.process_instance_id.clone();
        ctx.agenda_mut()
            .plan_evaluate_conditional_events(&process_instance);
        self.finish(ctx).await
    }

    pub async fn remove_variable(&self, execution_id: &str, name: &str) -> Result<bool> {
        let mut ctx = self.open();
        self.load_for_execution(&mut ctx, execution_id).await?;
        let removed = ctx.remove_variable(execution_id, name)?;
        let process_instance = ctx.execution(execution_id)?.process_instance_id.clone();
        ctx.agenda_mut()
            .plan_evaluate_conditional_events(&process_instance);
        self.finish(ctx).await?;
        Ok(removed)
    }

    pub async fn evaluate_conditional_events(&self, process_instance_id: &str) -> Result<()> {
        let mut ctx = self.open();
        self.load(&mut ctx, &[process_instance_id.to_string()]).await?;
        ctx.execution(process_instance_id)?;
        ctx.agenda_mut()
            .plan_evaluate_conditional_events(process_instance_id);
        self.finish(ctx).await
    }

    /// 在自由子流程内启动一个活动，返回新执行 id
    #[instrument(skip(self))]
    pub async fn execute_adhoc_activity(&self, scope_id: &str, activity_id: &str) -> Result<ExecutionId> {
        let mut ctx = self.open();
        self.load_for_execution(&mut ctx, scope_id).await?;
        let container = ctx.node_of(scope_id)?;
        if !matches!(container.kind, FlowNodeKind::AdhocSubProcess(_)) || !ctx.execution(scope_id)?.scope {
            return Err(EngineError::programmatic(format!(
                "execution `{scope_id}` is not an ad hoc sub-process scope"
            )));
        }
        let definition = ctx.definition_of(scope_id)?;
        let activity = definition.require_node(activity_id)?;
        if activity.parent.as_deref() != Some(container.id.as_str()) {
            return Err(EngineError::programmatic(format!(
                "activity `{activity_id}` is not part of ad hoc sub-process `{}`",
                container.id
            )));
        }
        let child = ctx.unit_of_work_mut().create_child(scope_id)?;
        ctx.execution_mut(&child)?.current_element = Some(activity.id.clone());
        ctx.agenda_mut().plan_continue(&child);
        self.finish(ctx).await?;
        Ok(child)
    }

    /// 手动完成没有活动内部执行的自由子流程
    pub async fn complete_adhoc_sub_process(&self, scope_id: &str) -> Result<()> {
        let mut ctx = self.open();
        self.load_for_execution(&mut ctx, scope_id).await?;
        let container = ctx.node_of(scope_id)?;
        if !matches!(container.kind, FlowNodeKind::AdhocSubProcess(_)) {
            return Err(EngineError::programmatic(format!(
                "execution `{scope_id}` is not an ad hoc sub-process scope"
            )));
        }
        if scopes::remaining_children(&ctx, scope_id) > 0 {
            return Err(EngineError::programmatic(format!(
                "ad hoc sub-process `{}` still has active executions",
                container.id
            )));
        }
        scopes::delete_idle_event_scope_children(&mut ctx, scope_id)?;
        end_execution::scope_completed(&mut ctx, scope_id)?;
        self.finish(ctx).await
    }

    /// 执行一个作业；作业所属执行已不存在时只删除作业
    #[instrument(skip(self))]
    pub async fn execute_job(&self, job_id: &str) -> Result<()> {
        let (mut ctx, job) = self.open_for_job(job_id).await?;
        if job.state == JobState::Suspended {
            return Err(EngineError::programmatic(format!("job `{job_id}` is suspended")));
        }
        ctx.unit_of_work_mut().delete_job(job_id);
        if !ctx.unit_of_work().contains(&job.execution_id) {
            debug!(job = %job_id, execution = %job.execution_id, "job execution gone, dropping job");
            return self.finish(ctx).await;
        }
        match job.kind {
            JobKind::AsyncContinuation => ctx
                .agenda_mut()
                .plan_continue_synchronous(&job.execution_id),
            JobKind::MultiInstanceMonitor => ctx
                .agenda_mut()
                .plan_monitor_multi_instance(&job.execution_id, true),
            JobKind::Breakpoint => {
                return Err(EngineError::programmatic(format!(
                    "breakpoint job `{job_id}` must be resumed explicitly"
                )))
            }
        }
        self.finish(ctx).await
    }

    /// 从断点继续：节点同步执行，不再检查断点
    #[instrument(skip(self))]
    pub async fn resume_breakpoint(&self, job_id: &str) -> Result<()> {
        let (mut ctx, job) = self.open_for_job(job_id).await?;
        if job.kind != JobKind::Breakpoint {
            return Err(EngineError::programmatic(format!(
                "job `{job_id}` is not a breakpoint"
            )));
        }
        ctx.unit_of_work_mut().delete_job(job_id);
        ctx.execution(&job.execution_id)?;
        ctx.agenda_mut().plan_continue_synchronous(&job.execution_id);
        self.finish(ctx).await
    }

    async fn open_for_job(&self, job_id: &str) -> Result<(CommandContext, Job)> {
        let stored = self
            .services
            .store
            .find_job(job_id)
            .await?
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        let mut ctx = self.open();
        self.load(&mut ctx, &[stored.process_instance_id]).await?;
        let job = ctx
            .unit_of_work()
            .job(job_id)
            .cloned()
            .ok_or_else(|| EngineError::JobNotFound(job_id.to_string()))?;
        Ok((ctx, job))
    }

    // ---- queries ----

    pub async fn execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        self.services.store.find_execution(execution_id).await
    }

    pub async fn executions(&self, process_instance_id: &str) -> Result<Vec<Execution>> {
        self.services
            .store
            .find_executions_by_process_instance(process_instance_id)
            .await
    }

    /// 当前活动执行所在的节点 id，按 id 排序
    pub async fn active_activity_ids(&self, process_instance_id: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .executions(process_instance_id)
            .await?
            .into_iter()
            .filter(|execution| {
                execution.active && !execution.is_process_instance() && !execution.multi_instance_root
            })
            .filter_map(|execution| execution.current_element)
            .collect();
        ids.sort();
        Ok(ids)
    }

    pub async fn subscriptions(&self, process_instance_id: &str) -> Result<Vec<EventSubscription>> {
        self.services
            .store
            .find_subscriptions_by_process_instance(process_instance_id)
            .await
    }

    pub async fn jobs(&self, process_instance_id: &str) -> Result<Vec<Job>> {
        self.services
            .store
            .find_jobs_by_process_instance(process_instance_id)
            .await
    }

    /// 从执行向上查找可见的变量
    pub async fn variable(&self, execution_id: &str, name: &str) -> Result<Option<Value>> {
        let mut ctx = self.open();
        self.load_for_execution(&mut ctx, execution_id).await?;
        Ok(ctx.variable(execution_id, name))
    }

    /// 流程实例已结束（根执行不再存在）
    pub async fn is_ended(&self, process_instance_id: &str) -> Result<bool> {
        Ok(self
            .services
            .store
            .find_execution(process_instance_id)
            .await?
            .is_none())
    }
}
