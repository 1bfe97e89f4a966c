use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::history::ActivityGuard;

use super::context::CommandContext;
use super::error_propagation;

/// 唤醒等待中的执行
pub(crate) async fn execute(
    ctx: &mut CommandContext,
    execution_id: &str,
    signal: Option<&str>,
    payload: &Value,
) -> Result<()> {
    let node = ctx.node_of(execution_id)?;
    let behavior = match node.behavior.clone() {
        Some(behavior) if behavior.is_triggerable() => behavior,
        _ => {
            return Err(EngineError::NotTriggerable {
                activity: node.id.clone(),
            })
        }
    };
    debug!(execution = %execution_id, activity = %node.id, "triggering execution");

    let result = if node.is_boundary_event() {
        let execution = ctx.execution(execution_id)?.clone();
        let _guard = ActivityGuard::start(ctx.history(), execution, &node.id);
        behavior.trigger(ctx, execution_id, signal, payload).await
    } else {
        behavior.trigger(ctx, execution_id, signal, payload).await
    };

    match result {
        Err(EngineError::BusinessFault { code, .. }) => {
            error_propagation::propagate_error(ctx, execution_id, &code)
        }
        other => other,
    }
}
