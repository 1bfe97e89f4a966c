use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::delegate::DelegateExecution;

/// 执行监听器触发时机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListenerEvent {
    Start,
    End,
    /// 经过顺序流
    Take,
}

/// 执行监听器
///
/// 与引擎事件监听器不同，执行监听器属于事务的一部分：返回错误会中止整个命令。
pub trait ExecutionListener: Send + Sync {
    fn notify(&self, execution: &mut DelegateExecution<'_>, event: ListenerEvent) -> Result<()>;
}

impl<F> ExecutionListener for F
where
    F: Fn(&mut DelegateExecution<'_>, ListenerEvent) -> Result<()> + Send + Sync,
{
    fn notify(&self, execution: &mut DelegateExecution<'_>, event: ListenerEvent) -> Result<()> {
        (self)(execution, event)
    }
}

/// 从闭包创建执行监听器
pub fn listener_from_fn<F>(func: F) -> Arc<dyn ExecutionListener>
where
    F: Fn(&mut DelegateExecution<'_>, ListenerEvent) -> Result<()> + Send + Sync + 'static,
{
    Arc::new(func)
}
