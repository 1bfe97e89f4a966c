use std::collections::{BTreeSet, VecDeque};

use serde_json::Value;
use tracing::trace;

use crate::state::ExecutionId;

use super::types::Operation;

/// 事务内严格先进先出的操作队列
#[derive(Debug, Default)]
pub struct Agenda {
    operations: VecDeque<Operation>,
    involved: BTreeSet<ExecutionId>,
}

impl Agenda {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&mut self, operation: Operation) {
        trace!(
            operation = operation.name(),
            execution = %operation.execution(),
            "planned operation"
        );
        self.involved.insert(operation.execution().to_string());
        self.operations.push_back(operation);
    }

    pub fn next(&mut self) -> Option<Operation> {
        self.operations.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    /// 执行是否还有尚未处理的操作
    pub fn is_planned(&self, execution: &str) -> bool {
        self.operations
            .iter()
            .any(|operation| operation.execution() == execution)
    }

    /// 本事务涉及过的执行
    pub fn involved_executions(&self) -> &BTreeSet<ExecutionId> {
        &self.involved
    }

    pub fn plan_continue(&mut self, execution: &str) {
        self.plan(Operation::Continue {
            execution: execution.to_string(),
            force_synchronous: false,
            in_compensation: false,
        });
    }

    pub fn plan_continue_synchronous(&mut self, execution: &str) {
        self.plan(Operation::Continue {
            execution: execution.to_string(),
            force_synchronous: true,
            in_compensation: false,
        });
    }

    pub fn plan_continue_in_compensation(&mut self, execution: &str) {
        self.plan(Operation::Continue {
            execution: execution.to_string(),
            force_synchronous: true,
            in_compensation: true,
        });
    }

    pub fn plan_continue_multi_instance(&mut self, execution: &str, root: &str, loop_counter: usize) {
        self.plan(Operation::ContinueMultiInstance {
            execution: execution.to_string(),
            root: root.to_string(),
            loop_counter,
        });
    }

    pub fn plan_take_outgoing(&mut self, execution: &str, evaluate_conditions: bool) {
        self.plan(Operation::TakeOutgoing {
            execution: execution.to_string(),
            evaluate_conditions,
        });
    }

    pub fn plan_end_execution(&mut self, execution: &str) {
        self.plan(Operation::EndExecution {
            execution: execution.to_string(),
        });
    }

    pub fn plan_destroy_scope(&mut self, execution: &str) {
        self.plan(Operation::DestroyScope {
            execution: execution.to_string(),
        });
    }

    pub fn plan_trigger(&mut self, execution: &str, signal: Option<String>, payload: Value) {
        self.plan(Operation::Trigger {
            execution: execution.to_string(),
            signal,
            payload,
        });
    }

    pub fn plan_evaluate_conditional_events(&mut self, process_instance: &str) {
        self.plan(Operation::EvaluateConditionalEvents {
            process_instance: process_instance.to_string(),
        });
    }

    pub fn plan_evaluate_variable_listener_events(&mut self, process_instance: &str) {
        self.plan(Operation::EvaluateVariableListenerEvents {
            process_instance: process_instance.to_string(),
        });
    }

    pub fn plan_monitor_multi_instance(&mut self, root: &str, from_job: bool) {
        self.plan(Operation::MonitorMultiInstance {
            root: root.to_string(),
            from_job,
        });
    }
}
