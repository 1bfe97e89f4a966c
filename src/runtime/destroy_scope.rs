use tracing::debug;

use crate::error::{EngineError, Result};
use crate::flow::constants::delete_reason;

use super::context::CommandContext;

/// 销毁执行所在的作用域及其全部子执行
pub(crate) fn execute(ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
    let scope = ctx
        .unit_of_work()
        .tree()
        .scope_of(execution_id)
        .ok_or_else(|| {
            EngineError::programmatic(format!("execution `{execution_id}` has no scope"))
        })?;
    let execution = ctx.execution(&scope)?.clone();
    if execution.is_process_instance() {
        return Err(EngineError::programmatic(format!(
            "refusing to destroy process instance `{scope}` as a scope"
        )));
    }
    if execution.active {
        if let Some(activity) = execution.current_element() {
            ctx.history()
                .record_activity_end(&execution, activity, Some(delete_reason::SCOPE_DESTROYED));
        }
    }
    debug!(scope = %scope, "destroying scope");
    ctx.unit_of_work_mut()
        .delete_subtree(&scope, Some(delete_reason::SCOPE_DESTROYED))
}
