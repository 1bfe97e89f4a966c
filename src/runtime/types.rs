use serde_json::Value;

use crate::state::ExecutionId;

/// 议程中的操作：执行树状态机的一步
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// 执行当前节点的行为，或经过当前顺序流进入目标节点
    Continue {
        execution: ExecutionId,
        /// 不再创建异步作业（作业恢复或补偿时）
        force_synchronous: bool,
        in_compensation: bool,
    },
    /// 多实例的单个实例开始
    ContinueMultiInstance {
        execution: ExecutionId,
        root: ExecutionId,
        loop_counter: usize,
    },
    TakeOutgoing {
        execution: ExecutionId,
        evaluate_conditions: bool,
    },
    EndExecution {
        execution: ExecutionId,
    },
    DestroyScope {
        execution: ExecutionId,
    },
    /// 恢复等待状态
    Trigger {
        execution: ExecutionId,
        signal: Option<String>,
        payload: Value,
    },
    EvaluateConditionalEvents {
        process_instance: ExecutionId,
    },
    EvaluateVariableListenerEvents {
        process_instance: ExecutionId,
    },
    /// 并行多实例完成检查
    MonitorMultiInstance {
        root: ExecutionId,
        from_job: bool,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Continue { .. } => "continue",
            Operation::ContinueMultiInstance { .. } => "continue-multi-instance",
            Operation::TakeOutgoing { .. } => "take-outgoing",
            Operation::EndExecution { .. } => "end-execution",
            Operation::DestroyScope { .. } => "destroy-scope",
            Operation::Trigger { .. } => "trigger",
            Operation::EvaluateConditionalEvents { .. } => "evaluate-conditional-events",
            Operation::EvaluateVariableListenerEvents { .. } => "evaluate-variable-listener-events",
            Operation::MonitorMultiInstance { .. } => "monitor-multi-instance",
        }
    }

    /// 操作关联的执行；事件评估类操作返回流程实例 id
    pub fn execution(&self) -> &str {
        match self {
            Operation::Continue { execution, .. }
            | Operation::ContinueMultiInstance { execution, .. }
            | Operation::TakeOutgoing { execution, .. }
            | Operation::EndExecution { execution }
            | Operation::DestroyScope { execution }
            | Operation::Trigger { execution, .. } => execution,
            Operation::EvaluateConditionalEvents { process_instance }
            | Operation::EvaluateVariableListenerEvents { process_instance } => process_instance,
            Operation::MonitorMultiInstance { root, .. } => root,
        }
    }
}
