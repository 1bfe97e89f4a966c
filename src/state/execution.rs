use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

pub type ExecutionId = String;

static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// 全局递增序号，用于子执行排序和事件订阅的创建顺序
pub(crate) fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

pub(crate) fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 执行（流程令牌）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub process_instance_id: ExecutionId,
    pub process_definition_key: String,
    pub parent_id: Option<ExecutionId>,
    /// 当前所在的节点或顺序流
    pub current_element: Option<String>,
    pub active: bool,
    pub scope: bool,
    pub concurrent: bool,
    pub multi_instance_root: bool,
    pub event_scope: bool,
    pub ended: bool,
    pub deleted: bool,
    pub super_execution_id: Option<ExecutionId>,
    pub sub_process_instance_id: Option<ExecutionId>,
    pub variables: BTreeMap<String, Value>,
    pub delete_reason: Option<String>,
    pub sequence: u64,
    pub version: u64,
    pub started_at: DateTime<Utc>,
}

impl Execution {
    /// 创建流程实例根执行，id 即流程实例 id
    pub fn new_process_instance(process_definition_key: impl Into<String>) -> Self {
        let id = new_id();
        Self {
            process_instance_id: id.clone(),
            id,
            process_definition_key: process_definition_key.into(),
            parent_id: None,
            current_element: None,
            active: true,
            scope: true,
            concurrent: false,
            multi_instance_root: false,
            event_scope: false,
            ended: false,
            deleted: false,
            super_execution_id: None,
            sub_process_instance_id: None,
            variables: BTreeMap::new(),
            delete_reason: None,
            sequence: next_sequence(),
            version: 0,
            started_at: Utc::now(),
        }
    }

    pub fn new_child(parent: &Execution) -> Self {
        Self {
            id: new_id(),
            process_instance_id: parent.process_instance_id.clone(),
            process_definition_key: parent.process_definition_key.clone(),
            parent_id: Some(parent.id.clone()),
            current_element: None,
            active: true,
            scope: false,
            concurrent: false,
            multi_instance_root: false,
            event_scope: false,
            ended: false,
            deleted: false,
            super_execution_id: None,
            sub_process_instance_id: None,
            variables: BTreeMap::new(),
            delete_reason: None,
            sequence: next_sequence(),
            version: 0,
            started_at: Utc::now(),
        }
    }

    pub fn is_process_instance(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn current_element(&self) -> Option<&str> {
        self.current_element.as_deref()
    }

    pub fn is_at(&self, element: &str) -> bool {
        self.current_element.as_deref() == Some(element)
    }
}
