use crate::state::Execution;

/// 调试器：在进入节点前判断是否命中断点
///
/// 命中时不执行节点，而是创建挂起的断点作业，
/// 之后通过 `ProcessEngine::resume_breakpoint` 继续。
pub trait ProcessDebugger: Send + Sync {
    fn is_breakpoint(&self, execution: &Execution) -> bool;
}

/// 按节点 id 设置断点
#[derive(Debug, Clone, Default)]
pub struct ActivityBreakpoints {
    activities: Vec<String>,
}

impl ActivityBreakpoints {
    pub fn new<I, S>(activities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            activities: activities.into_iter().map(Into::into).collect(),
        }
    }
}

impl ProcessDebugger for ActivityBreakpoints {
    fn is_breakpoint(&self, execution: &Execution) -> bool {
        execution
            .current_element()
            .map(|element| self.activities.iter().any(|activity| activity == element))
            .unwrap_or(false)
    }
}
