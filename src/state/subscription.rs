use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::execution::{new_id, next_sequence, ExecutionId};

pub type SubscriptionId = String;

/// 事件订阅类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriptionKind {
    Signal,
    Message,
    VariableListener,
    Compensate,
}

/// 事件订阅
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubscription {
    pub id: SubscriptionId,
    pub kind: SubscriptionKind,
    /// 信号名、消息名或变量名；补偿订阅为空
    pub event_name: Option<String>,
    pub execution_id: ExecutionId,
    pub process_instance_id: ExecutionId,
    pub activity_id: String,
    /// 变量监听的变化类型过滤，或补偿副本的执行 id
    pub configuration: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sequence: u64,
}

impl EventSubscription {
    pub fn new(
        kind: SubscriptionKind,
        event_name: Option<String>,
        execution_id: impl Into<ExecutionId>,
        process_instance_id: impl Into<ExecutionId>,
        activity_id: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            kind,
            event_name,
            execution_id: execution_id.into(),
            process_instance_id: process_instance_id.into(),
            activity_id: activity_id.into(),
            configuration: None,
            created_at: Utc::now(),
            sequence: next_sequence(),
        }
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = Some(configuration.into());
        self
    }

    pub fn matches(&self, kind: SubscriptionKind, event_name: &str) -> bool {
        self.kind == kind && self.event_name.as_deref() == Some(event_name)
    }
}
