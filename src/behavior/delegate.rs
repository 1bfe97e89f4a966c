use serde_json::Value;

use crate::error::Result;
use crate::runtime::CommandContext;
use crate::state::{ExecutionId, VariableView};

/// 交给任务处理器和监听器的执行句柄
pub struct DelegateExecution<'a> {
    ctx: &'a mut CommandContext,
    execution_id: ExecutionId,
    process_instance_id: ExecutionId,
    activity_id: Option<String>,
}

impl<'a> DelegateExecution<'a> {
    pub fn new(ctx: &'a mut CommandContext, execution_id: impl Into<ExecutionId>) -> Self {
        let execution_id = execution_id.into();
        let (process_instance_id, activity_id) = ctx
            .unit_of_work()
            .find_by_id(&execution_id)
            .map(|execution| {
                (
                    execution.process_instance_id.clone(),
                    execution.current_element.clone(),
                )
            })
            .unwrap_or_default();
        Self {
            ctx,
            execution_id,
            process_instance_id,
            activity_id,
        }
    }

    pub fn id(&self) -> &str {
        &self.execution_id
    }

    pub fn process_instance_id(&self) -> &str {
        &self.process_instance_id
    }

    /// 当前节点或顺序流 id
    pub fn current_activity_id(&self) -> Option<&str> {
        self.activity_id.as_deref()
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.ctx.variable(&self.execution_id, name)
    }

    pub fn variables(&self) -> VariableView {
        self.ctx.variables(&self.execution_id)
    }

    /// 写入已定义该变量的最近执行，未定义时写入流程实例
    pub fn set_variable(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.ctx.set_variable(&self.execution_id, name, value.into())
    }

    pub fn set_variable_local(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.ctx
            .set_variable_local(&self.execution_id, name, value.into())
    }

    pub fn remove_variable(&mut self, name: &str) -> Result<bool> {
        self.ctx.remove_variable(&self.execution_id, name)
    }

    /// 访问底层命令上下文
    pub fn context(&mut self) -> &mut CommandContext {
        self.ctx
    }
}
