use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::behavior::{DelegateExecution, ExecutionListener, ListenerEvent};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EngineEventKind};
use crate::flow::{FlowNode, ProcessDefinition};
use crate::history::HistorySink;
use crate::state::{
    defining_execution, ChangeSet, Execution, UnitOfWork, VariableChangeType,
    VariableListenerSession, VariableView,
};

use super::agenda::Agenda;
use super::services::EngineServices;

/// 命令上下文：每个事务一个，显式传给每个操作和节点行为
pub struct CommandContext {
    pub(crate) services: Arc<EngineServices>,
    pub(crate) agenda: Agenda,
    pub(crate) uow: UnitOfWork,
    pub(crate) variable_session: VariableListenerSession,
    pub(crate) operations_run: usize,
}

impl CommandContext {
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self {
            services,
            agenda: Agenda::new(),
            uow: UnitOfWork::new(),
            variable_session: VariableListenerSession::new(),
            operations_run: 0,
        }
    }

    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    pub fn config(&self) -> &EngineConfig {
        &self.services.config
    }

    pub fn agenda(&self) -> &Agenda {
        &self.agenda
    }

    pub fn agenda_mut(&mut self) -> &mut Agenda {
        &mut self.agenda
    }

    pub fn unit_of_work(&self) -> &UnitOfWork {
        &self.uow
    }

    pub fn unit_of_work_mut(&mut self) -> &mut UnitOfWork {
        &mut self.uow
    }

    pub fn history(&self) -> Arc<dyn HistorySink> {
        Arc::clone(&self.services.history)
    }

    pub fn into_change_set(self) -> ChangeSet {
        self.uow.into_change_set()
    }

    // ---- executions and graph ----

    pub fn execution(&self, id: &str) -> Result<&Execution> {
        self.uow.execution(id)
    }

    pub fn execution_mut(&mut self, id: &str) -> Result<&mut Execution> {
        self.uow.execution_mut(id)
    }

    pub fn definition(&self, key: &str) -> Result<Arc<ProcessDefinition>> {
        self.services
            .registry
            .get(key)
            .ok_or_else(|| EngineError::UnknownProcess(key.to_string()))
    }

    pub fn definition_of(&self, execution_id: &str) -> Result<Arc<ProcessDefinition>> {
        let key = &self.execution(execution_id)?.process_definition_key;
        self.definition(key)
    }

    /// 执行当前所在的节点；位于顺序流上时返回错误
    pub fn node_of(&self, execution_id: &str) -> Result<Arc<FlowNode>> {
        let execution = self.execution(execution_id)?;
        let element = execution.current_element.as_deref().ok_or_else(|| {
            EngineError::programmatic(format!("execution `{execution_id}` has no current element"))
        })?;
        self.definition(&execution.process_definition_key)?
            .require_node(element)
    }

    // ---- variables ----

    pub fn variables(&self, execution_id: &str) -> VariableView {
        VariableView::collect(self.uow.tree(), execution_id)
    }

    pub fn variable(&self, execution_id: &str, name: &str) -> Option<Value> {
        self.variables(execution_id).get(name).cloned()
    }

    /// 写入已定义该变量的最近执行，未定义时写入流程实例根执行
    pub fn set_variable(&mut self, execution_id: &str, name: &str, value: Value) -> Result<()> {
        let target = match defining_execution(self.uow.tree(), execution_id, name) {
            Some(target) => target,
            None => self.execution(execution_id)?.process_instance_id.clone(),
        };
        self.set_variable_local(&target, name, value)
    }

    pub fn set_variable_local(&mut self, execution_id: &str, name: &str, value: Value) -> Result<()> {
        let execution = self.uow.execution_mut(execution_id)?;
        let change_type = match execution.variables.insert(name.to_string(), value) {
            Some(_) => VariableChangeType::Update,
            None => VariableChangeType::Create,
        };
        let process_instance_id = execution.process_instance_id.clone();
        trace!(execution = %execution_id, variable = %name, change = ?change_type, "variable set");
        self.variable_session
            .record(&process_instance_id, execution_id, name, change_type);
        Ok(())
    }

    /// 引擎内部记账变量，不产生变量变化记录
    pub(crate) fn set_variable_untracked(
        &mut self,
        execution_id: &str,
        name: &str,
        value: Value,
    ) -> Result<()> {
        self.uow
            .execution_mut(execution_id)?
            .variables
            .insert(name.to_string(), value);
        Ok(())
    }

    pub fn remove_variable(&mut self, execution_id: &str, name: &str) -> Result<bool> {
        let Some(target) = defining_execution(self.uow.tree(), execution_id, name) else {
            return Ok(false);
        };
        let execution = self.uow.execution_mut(&target)?;
        execution.variables.remove(name);
        let process_instance_id = execution.process_instance_id.clone();
        self.variable_session.record(
            &process_instance_id,
            &target,
            name,
            VariableChangeType::Delete,
        );
        Ok(true)
    }

    // ---- listeners and events ----

    pub fn dispatch(&self, event: EngineEvent) {
        self.services.events.dispatch(event);
    }

    pub(crate) fn dispatch_for(&self, kind: EngineEventKind, execution_id: &str) {
        if let Some(execution) = self.uow.find_by_id(execution_id) {
            self.dispatch(EngineEvent::for_execution(kind, execution));
        }
    }

    pub(crate) fn fire_listeners(
        &mut self,
        execution_id: &str,
        listeners: Vec<Arc<dyn ExecutionListener>>,
        event: ListenerEvent,
    ) -> Result<()> {
        for listener in listeners {
            let mut delegate = DelegateExecution::new(self, execution_id);
            listener.notify(&mut delegate, event)?;
        }
        Ok(())
    }
}
