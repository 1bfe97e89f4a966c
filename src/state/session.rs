use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::execution::{next_sequence, ExecutionId};

/// 变量变化类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableChangeType {
    Create,
    Update,
    Delete,
}

/// 变量监听的变化类型过滤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableChangeFilter {
    Create,
    Update,
    Delete,
    All,
    UpdateCreate,
}

impl VariableChangeFilter {
    pub fn matches(&self, change: VariableChangeType) -> bool {
        match self {
            VariableChangeFilter::All => true,
            VariableChangeFilter::UpdateCreate => matches!(
                change,
                VariableChangeType::Create | VariableChangeType::Update
            ),
            VariableChangeFilter::Create => change == VariableChangeType::Create,
            VariableChangeFilter::Update => change == VariableChangeType::Update,
            VariableChangeFilter::Delete => change == VariableChangeType::Delete,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VariableChangeFilter::Create => "create",
            VariableChangeFilter::Update => "update",
            VariableChangeFilter::Delete => "delete",
            VariableChangeFilter::All => "all",
            VariableChangeFilter::UpdateCreate => "update-create",
        }
    }

    /// 无法识别时按 All 处理
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("create") => VariableChangeFilter::Create,
            Some("update") => VariableChangeFilter::Update,
            Some("delete") => VariableChangeFilter::Delete,
            Some("update-create") => VariableChangeFilter::UpdateCreate,
            _ => VariableChangeFilter::All,
        }
    }
}

/// 一次变量变化记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableChange {
    pub id: u64,
    pub process_instance_id: ExecutionId,
    pub execution_id: ExecutionId,
    pub variable: String,
    pub change_type: VariableChangeType,
}

/// 事务内累积的变量变化，等待变量监听事件匹配
#[derive(Debug, Default)]
pub struct VariableListenerSession {
    pending: BTreeMap<ExecutionId, Vec<VariableChange>>,
    dirty: BTreeSet<ExecutionId>,
}

impl VariableListenerSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        process_instance_id: &str,
        execution_id: &str,
        variable: &str,
        change_type: VariableChangeType,
    ) {
        self.pending
            .entry(process_instance_id.to_string())
            .or_default()
            .push(VariableChange {
                id: next_sequence(),
                process_instance_id: process_instance_id.to_string(),
                execution_id: execution_id.to_string(),
                variable: variable.to_string(),
                change_type,
            });
        self.dirty.insert(process_instance_id.to_string());
    }

    pub fn pending_for(&self, process_instance_id: &str) -> Vec<VariableChange> {
        self.pending
            .get(process_instance_id)
            .cloned()
            .unwrap_or_default()
    }

    /// 移除已被消费的变化记录
    pub fn consume(&mut self, process_instance_id: &str, ids: &BTreeSet<u64>) {
        if let Some(changes) = self.pending.get_mut(process_instance_id) {
            changes.retain(|change| !ids.contains(&change.id));
            if changes.is_empty() {
                self.pending.remove(process_instance_id);
            }
        }
    }

    /// 自上次取出后有新变化的流程实例
    pub fn take_dirty(&mut self) -> BTreeSet<ExecutionId> {
        std::mem::take(&mut self.dirty)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
