use async_trait::async_trait;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::runtime::{scopes, CommandContext};

use super::ActivityBehavior;

/// 内嵌子流程：在作用域执行下从子流程的开始事件出发
pub struct SubProcessBehavior;

#[async_trait]
impl ActivityBehavior for SubProcessBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let node = ctx.node_of(execution_id)?;
        let definition = ctx.definition_of(execution_id)?;
        let initial = definition.initial_of(Some(&node.id)).ok_or_else(|| {
            EngineError::InvalidDefinition(format!(
                "sub-process `{}` has no none start event",
                node.id
            ))
        })?;

        scopes::enter_scope(ctx, execution_id, Some(&node.id))?;

        let child = ctx.unit_of_work_mut().create_child(execution_id)?;
        ctx.execution_mut(&child)?.current_element = Some(initial.id.clone());
        debug!(sub_process = %node.id, scope = %execution_id, "entered sub-process");
        ctx.agenda_mut().plan_continue(&child);
        Ok(())
    }
}

/// 自由子流程：进入后等待逐个启动内部活动
pub struct AdhocSubProcessBehavior;

#[async_trait]
impl ActivityBehavior for AdhocSubProcessBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let node = ctx.node_of(execution_id)?;
        scopes::enter_scope(ctx, execution_id, Some(&node.id))?;
        debug!(sub_process = %node.id, scope = %execution_id, "entered ad hoc sub-process");
        Ok(())
    }
}
