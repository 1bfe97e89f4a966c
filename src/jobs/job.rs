use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{new_id, next_sequence, ExecutionId};

pub type JobId = String;

/// 作业类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobKind {
    /// 异步继续：在新事务中重新进入节点
    AsyncContinuation,
    /// 并行多实例完成检查
    MultiInstanceMonitor,
    /// 调试断点，挂起直到手动恢复
    Breakpoint,
}

/// 作业状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Executable,
    Suspended,
    DeadLetter,
}

/// 持久化作业
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub state: JobState,
    pub execution_id: ExecutionId,
    pub process_instance_id: ExecutionId,
    pub activity_id: Option<String>,
    pub exclusive: bool,
    pub retries: u32,
    pub due_at: DateTime<Utc>,
    pub lock_owner: Option<String>,
    pub last_error: Option<String>,
    pub sequence: u64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        kind: JobKind,
        execution_id: impl Into<ExecutionId>,
        process_instance_id: impl Into<ExecutionId>,
        retries: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            kind,
            state: JobState::Executable,
            execution_id: execution_id.into(),
            process_instance_id: process_instance_id.into(),
            activity_id: None,
            exclusive: true,
            retries,
            due_at: now,
            lock_owner: None,
            last_error: None,
            sequence: next_sequence(),
            version: 0,
            created_at: now,
        }
    }

    pub fn with_activity(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }

    pub fn with_exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn with_due_at(mut self, due_at: DateTime<Utc>) -> Self {
        self.due_at = due_at;
        self
    }

    pub fn with_state(mut self, state: JobState) -> Self {
        self.state = state;
        self
    }

    /// 可被作业执行器获取
    pub fn is_acquirable(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Executable && self.lock_owner.is_none() && self.due_at <= now
    }
}
