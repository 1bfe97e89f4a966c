use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::flow::nodes::CallActivitySpec;
use crate::runtime::{process_instance, CommandContext};

use super::ActivityBehavior;

/// 调用活动：启动被调用流程的新实例，等待其结束
pub struct CallActivityBehavior {
    spec: CallActivitySpec,
}

impl CallActivityBehavior {
    pub fn new(spec: CallActivitySpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl ActivityBehavior for CallActivityBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let called = ctx.definition(&self.spec.called_element)?;
        let view = ctx.variables(execution_id);
        let variables: BTreeMap<_, _> = self
            .spec
            .inputs
            .iter()
            .filter_map(|(source, target)| {
                view.get(source).map(|value| (target.clone(), value.clone()))
            })
            .collect();

        let sub_instance =
            process_instance::start(ctx, &called, variables, Some(execution_id))?;
        debug!(
            execution = %execution_id,
            called = %called.key,
            sub_instance = %sub_instance,
            "started called process instance"
        );
        Ok(())
    }
}

/// 被调用实例结束时把输出变量写回调用方执行
pub(crate) fn map_outputs(
    ctx: &mut CommandContext,
    spec: &CallActivitySpec,
    sub_instance_id: &str,
    super_execution_id: &str,
) -> Result<()> {
    let view = ctx.variables(sub_instance_id);
    for (source, target) in &spec.outputs {
        if let Some(value) = view.get(source) {
            ctx.set_variable(super_execution_id, target, value.clone())?;
        }
    }
    Ok(())
}
