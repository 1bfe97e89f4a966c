use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::runtime::CommandContext;

use super::{apply_payload, leave, ActivityBehavior, DelegateExecution};

/// 服务任务：调用注册的处理器后离开
pub struct ServiceTaskBehavior {
    handler: String,
}

impl ServiceTaskBehavior {
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
        }
    }
}

#[async_trait]
impl ActivityBehavior for ServiceTaskBehavior {
    async fn execute(&self, ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        let handler = ctx
            .services()
            .handlers
            .get(&self.handler)
            .ok_or_else(|| EngineError::HandlerNotRegistered(self.handler.clone()))?;
        debug!(execution = %execution_id, handler = %self.handler, "invoking task handler");
        {
            let mut delegate = DelegateExecution::new(ctx, execution_id);
            handler.execute(&mut delegate).await?;
        }
        leave(ctx, execution_id)
    }
}

/// 用户任务与接收任务：等待外部触发
pub struct WaitStateBehavior;

#[async_trait]
impl ActivityBehavior for WaitStateBehavior {
    async fn execute(&self, _ctx: &mut CommandContext, execution_id: &str) -> Result<()> {
        debug!(execution = %execution_id, "execution waiting for trigger");
        Ok(())
    }

    fn is_triggerable(&self) -> bool {
        true
    }

    async fn trigger(
        &self,
        ctx: &mut CommandContext,
        execution_id: &str,
        _signal: Option<&str>,
        payload: &Value,
    ) -> Result<()> {
        apply_payload(ctx, execution_id, payload)?;
        leave(ctx, execution_id)
    }
}
