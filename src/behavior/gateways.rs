use async_trait::async_trait;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::runtime::CommandContext;

use super::ActivityBehavior;

/// 并行网关：单入线时分叉，多入线时等待全部到达后合并
pub struct ParallelGatewayBehavior;

#[async_trait]
impl ActivityBehavior for ParallelGatewayBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let node = ctx.node_of(execution_id)?;
        let definition = ctx.definition_of(execution_id)?;
        let incoming = definition.incoming(&node.id).len();

        ctx.execution_mut(execution_id)?.active = false;

        let parent = ctx.execution(execution_id)?.parent_id.clone().ok_or_else(|| {
            EngineError::programmatic(format!(
                "gateway execution `{execution_id}` has no parent"
            ))
        })?;
        // 并发到达同一网关的两个事务在父执行上发生版本冲突
        ctx.unit_of_work_mut().force_update(&parent);
        let joined: Vec<String> = ctx
            .unit_of_work()
            .find_children_by_parent(&parent)
            .into_iter()
            .filter(|child| {
                ctx.unit_of_work()
                    .find_by_id(child)
                    .map(|execution| !execution.active && execution.is_at(&node.id))
                    .unwrap_or(false)
            })
            .collect();

        if joined.len() < incoming.max(1) {
            debug!(
                gateway = %node.id,
                arrived = joined.len(),
                expected = incoming,
                "parallel gateway waiting"
            );
            return Ok(());
        }

        for other in joined.iter().filter(|other| other.as_str() != execution_id) {
            let execution = ctx.execution(other)?.clone();
            ctx.history().record_activity_end(&execution, &node.id, None);
            ctx.unit_of_work_mut().delete_execution(other, None)?;
        }

        let execution = ctx.execution_mut(execution_id)?;
        execution.active = true;
        execution.concurrent = false;
        let execution = execution.clone();
        ctx.history().record_activity_end(&execution, &node.id, None);
        debug!(gateway = %node.id, joined = joined.len(), "parallel gateway activated");
        ctx.agenda_mut().plan_take_outgoing(execution_id, false);
        Ok(())
    }
}
