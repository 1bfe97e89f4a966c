// 历史记录：尽力而为，不属于正确性约束

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::state::Execution;

/// 历史记录接收端
pub trait HistorySink: Send + Sync {
    fn record_process_start(&self, _instance: &Execution) {}

    fn record_process_end(&self, _instance: &Execution, _reason: Option<&str>) {}

    fn record_activity_start(&self, _execution: &Execution, _activity_id: &str) {}

    fn record_activity_end(&self, _execution: &Execution, _activity_id: &str, _reason: Option<&str>) {}
}

/// 不记录任何内容
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHistory;

impl HistorySink for NoopHistory {}

/// 活动实例历史
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRecord {
    pub execution_id: String,
    pub process_instance_id: String,
    pub activity_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub delete_reason: Option<String>,
}

/// 流程实例历史
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessRecord {
    pub process_instance_id: String,
    pub process_definition_key: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<String>,
}

/// 内存历史
#[derive(Debug, Default)]
pub struct MemoryHistory {
    activities: Mutex<Vec<ActivityRecord>>,
    processes: Mutex<Vec<ProcessRecord>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activities(&self) -> Vec<ActivityRecord> {
        self.activities.lock().clone()
    }

    pub fn activities_of(&self, process_instance_id: &str) -> Vec<ActivityRecord> {
        self.activities
            .lock()
            .iter()
            .filter(|record| record.process_instance_id == process_instance_id)
            .cloned()
            .collect()
    }

    /// 按开始顺序的活动 id
    pub fn started_activity_ids(&self, process_instance_id: &str) -> Vec<String> {
        self.activities_of(process_instance_id)
            .into_iter()
            .map(|record| record.activity_id)
            .collect()
    }

    /// 已正常结束（无删除原因）的活动 id
    pub fn completed_activity_ids(&self, process_instance_id: &str) -> Vec<String> {
        self.activities_of(process_instance_id)
            .into_iter()
            .filter(|record| record.ended_at.is_some() && record.delete_reason.is_none())
            .map(|record| record.activity_id)
            .collect()
    }

    pub fn process(&self, process_instance_id: &str) -> Option<ProcessRecord> {
        self.processes
            .lock()
            .iter()
            .find(|record| record.process_instance_id == process_instance_id)
            .cloned()
    }
}

impl HistorySink for MemoryHistory {
    fn record_process_start(&self, instance: &Execution) {
        self.processes.lock().push(ProcessRecord {
            process_instance_id: instance.process_instance_id.clone(),
            process_definition_key: instance.process_definition_key.clone(),
            started_at: Utc::now(),
            ended_at: None,
            end_reason: None,
        });
    }

    fn record_process_end(&self, instance: &Execution, reason: Option<&str>) {
        let mut processes = self.processes.lock();
        if let Some(record) = processes.iter_mut().find(|record| {
            record.process_instance_id == instance.process_instance_id && record.ended_at.is_none()
        }) {
            record.ended_at = Some(Utc::now());
            record.end_reason = reason.map(str::to_string);
        }
    }

    fn record_activity_start(&self, execution: &Execution, activity_id: &str) {
        self.activities.lock().push(ActivityRecord {
            execution_id: execution.id.clone(),
            process_instance_id: execution.process_instance_id.clone(),
            activity_id: activity_id.to_string(),
            started_at: Utc::now(),
            ended_at: None,
            delete_reason: None,
        });
    }

    fn record_activity_end(&self, execution: &Execution, activity_id: &str, reason: Option<&str>) {
        let mut activities = self.activities.lock();
        let open = |record: &ActivityRecord| {
            record.ended_at.is_none() && record.activity_id == activity_id
        };
        // 执行被替换（例如离开子流程时的继续执行）时按流程实例和活动匹配
        let position = activities
            .iter()
            .position(|record| open(record) && record.execution_id == execution.id)
            .or_else(|| {
                activities.iter().position(|record| {
                    open(record) && record.process_instance_id == execution.process_instance_id
                })
            });
        if let Some(index) = position {
            let record = &mut activities[index];
            record.ended_at = Some(Utc::now());
            record.delete_reason = reason.map(str::to_string);
        }
    }
}

/// 活动历史守卫：创建时记录开始，释放时记录结束
pub struct ActivityGuard {
    history: Arc<dyn HistorySink>,
    execution: Execution,
    activity_id: String,
}

impl ActivityGuard {
    pub fn start(history: Arc<dyn HistorySink>, execution: Execution, activity_id: &str) -> Self {
        history.record_activity_start(&execution, activity_id);
        Self {
            history,
            execution,
            activity_id: activity_id.to_string(),
        }
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.history
            .record_activity_end(&self.execution, &self.activity_id, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_records_end_on_drop() {
        let history = Arc::new(MemoryHistory::new());
        let execution = Execution::new_process_instance("p");
        {
            let _guard = ActivityGuard::start(history.clone(), execution.clone(), "boundary");
            assert_eq!(history.activities()[0].ended_at, None);
        }
        assert!(history.activities()[0].ended_at.is_some());
        assert_eq!(history.completed_activity_ids(&execution.id), vec!["boundary"]);
    }
}
