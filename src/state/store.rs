use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::jobs::Job;

use super::execution::Execution;
use super::subscription::{EventSubscription, SubscriptionKind};

/// 一个事务需要原子提交的全部变更
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub inserted_executions: Vec<Execution>,
    pub updated_executions: Vec<Execution>,
    /// (id, 加载时的版本)
    pub deleted_executions: Vec<(String, u64)>,
    pub inserted_subscriptions: Vec<EventSubscription>,
    pub updated_subscriptions: Vec<EventSubscription>,
    pub deleted_subscriptions: Vec<String>,
    pub inserted_jobs: Vec<Job>,
    pub updated_jobs: Vec<Job>,
    pub deleted_jobs: Vec<(String, u64)>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted_executions.is_empty()
            && self.updated_executions.is_empty()
            && self.deleted_executions.is_empty()
            && self.inserted_subscriptions.is_empty()
            && self.updated_subscriptions.is_empty()
            && self.deleted_subscriptions.is_empty()
            && self.inserted_jobs.is_empty()
            && self.updated_jobs.is_empty()
            && self.deleted_jobs.is_empty()
    }
}

/// 持久化实体存储
///
/// `commit` 对每个更新或删除的执行与作业做乐观版本检查，
/// 任一冲突时整个变更集都不生效并返回 `EngineError::OptimisticLock`。
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_execution(&self, id: &str) -> Result<Option<Execution>>;
    async fn find_executions_by_process_instance(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<Execution>>;
    async fn find_subscriptions_by_process_instance(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<EventSubscription>>;
    async fn find_subscriptions_by_event(
        &self,
        kind: SubscriptionKind,
        event_name: &str,
    ) -> Result<Vec<EventSubscription>>;
    async fn find_jobs_by_process_instance(&self, process_instance_id: &str) -> Result<Vec<Job>>;
    async fn find_job(&self, id: &str) -> Result<Option<Job>>;
    /// 锁定并返回到期的可执行作业
    async fn acquire_jobs(&self, now: DateTime<Utc>, limit: usize, owner: &str) -> Result<Vec<Job>>;
    /// 释放锁，不消耗重试次数
    async fn release_job(&self, id: &str) -> Result<()>;
    /// 记录失败并扣减重试次数，归零后转入死信
    async fn fail_job(&self, id: &str, error: &str) -> Result<Option<Job>>;
    async fn commit(&self, changes: ChangeSet) -> Result<()>;
}

#[cfg(feature = "memory-store")]
pub use memory::MemoryStore;

#[cfg(feature = "memory-store")]
mod memory {
    use super::*;
    use crate::error::EngineError;
    use crate::jobs::JobState;
    use parking_lot::RwLock;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryState {
        executions: HashMap<String, Execution>,
        subscriptions: HashMap<String, EventSubscription>,
        jobs: HashMap<String, Job>,
    }

    /// 内存存储实现
    #[derive(Default)]
    pub struct MemoryStore {
        inner: RwLock<MemoryState>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn execution_count(&self) -> usize {
            self.inner.read().executions.len()
        }

        pub fn job_count(&self) -> usize {
            self.inner.read().jobs.len()
        }
    }

    fn conflict(entity: &'static str, id: &str) -> EngineError {
        EngineError::OptimisticLock {
            entity,
            id: id.to_string(),
        }
    }

    impl MemoryState {
        fn verify(&self, changes: &ChangeSet) -> Result<()> {
            for execution in &changes.inserted_executions {
                if self.executions.contains_key(&execution.id) {
                    return Err(conflict("execution", &execution.id));
                }
            }
            for execution in &changes.updated_executions {
                match self.executions.get(&execution.id) {
                    Some(stored) if stored.version == execution.version => {}
                    _ => return Err(conflict("execution", &execution.id)),
                }
            }
            for (id, version) in &changes.deleted_executions {
                match self.executions.get(id) {
                    Some(stored) if stored.version == *version => {}
                    _ => return Err(conflict("execution", id)),
                }
            }
            for job in &changes.updated_jobs {
                match self.jobs.get(&job.id) {
                    Some(stored) if stored.version == job.version => {}
                    _ => return Err(conflict("job", &job.id)),
                }
            }
            for (id, version) in &changes.deleted_jobs {
                match self.jobs.get(id) {
                    Some(stored) if stored.version == *version => {}
                    _ => return Err(conflict("job", id)),
                }
            }
            Ok(())
        }

        fn apply(&mut self, changes: ChangeSet) {
            for mut execution in changes.updated_executions {
                execution.version += 1;
                self.executions.insert(execution.id.clone(), execution);
            }
            for execution in changes.inserted_executions {
                self.executions.insert(execution.id.clone(), execution);
            }
            for (id, _) in changes.deleted_executions {
                self.executions.remove(&id);
            }
            for subscription in changes
                .inserted_subscriptions
                .into_iter()
                .chain(changes.updated_subscriptions)
            {
                self.subscriptions
                    .insert(subscription.id.clone(), subscription);
            }
            for id in changes.deleted_subscriptions {
                self.subscriptions.remove(&id);
            }
            for mut job in changes.updated_jobs {
                job.version += 1;
                self.jobs.insert(job.id.clone(), job);
            }
            for job in changes.inserted_jobs {
                self.jobs.insert(job.id.clone(), job);
            }
            for (id, _) in changes.deleted_jobs {
                self.jobs.remove(&id);
            }
        }
    }

    #[async_trait]
    impl EntityStore for MemoryStore {
        async fn find_execution(&self, id: &str) -> Result<Option<Execution>> {
            Ok(self.inner.read().executions.get(id).cloned())
        }

        async fn find_executions_by_process_instance(
            &self,
            process_instance_id: &str,
        ) -> Result<Vec<Execution>> {
            let mut executions: Vec<Execution> = self
                .inner
                .read()
                .executions
                .values()
                .filter(|execution| execution.process_instance_id == process_instance_id)
                .cloned()
                .collect();
            executions.sort_by_key(|execution| execution.sequence);
            Ok(executions)
        }

        async fn find_subscriptions_by_process_instance(
            &self,
            process_instance_id: &str,
        ) -> Result<Vec<EventSubscription>> {
            let mut subscriptions: Vec<EventSubscription> = self
                .inner
                .read()
                .subscriptions
                .values()
                .filter(|subscription| subscription.process_instance_id == process_instance_id)
                .cloned()
                .collect();
            subscriptions.sort_by_key(|subscription| subscription.sequence);
            Ok(subscriptions)
        }

        async fn find_subscriptions_by_event(
            &self,
            kind: SubscriptionKind,
            event_name: &str,
        ) -> Result<Vec<EventSubscription>> {
            let mut subscriptions: Vec<EventSubscription> = self
                .inner
                .read()
                .subscriptions
                .values()
                .filter(|subscription| subscription.matches(kind, event_name))
                .cloned()
                .collect();
            subscriptions.sort_by_key(|subscription| subscription.sequence);
            Ok(subscriptions)
        }

        async fn find_jobs_by_process_instance(
            &self,
            process_instance_id: &str,
        ) -> Result<Vec<Job>> {
            let mut jobs: Vec<Job> = self
                .inner
                .read()
                .jobs
                .values()
                .filter(|job| job.process_instance_id == process_instance_id)
                .cloned()
                .collect();
            jobs.sort_by_key(|job| job.sequence);
            Ok(jobs)
        }

        async fn find_job(&self, id: &str) -> Result<Option<Job>> {
            Ok(self.inner.read().jobs.get(id).cloned())
        }

        async fn acquire_jobs(
            &self,
            now: DateTime<Utc>,
            limit: usize,
            owner: &str,
        ) -> Result<Vec<Job>> {
            let mut state = self.inner.write();
            let mut due: Vec<(DateTime<Utc>, u64, String)> = state
                .jobs
                .values()
                .filter(|job| job.is_acquirable(now))
                .map(|job| (job.due_at, job.sequence, job.id.clone()))
                .collect();
            due.sort();
            let mut acquired = Vec::new();
            for (_, _, id) in due.into_iter().take(limit) {
                if let Some(job) = state.jobs.get_mut(&id) {
                    job.lock_owner = Some(owner.to_string());
                    job.version += 1;
                    acquired.push(job.clone());
                }
            }
            Ok(acquired)
        }

        async fn release_job(&self, id: &str) -> Result<()> {
            let mut state = self.inner.write();
            if let Some(job) = state.jobs.get_mut(id) {
                job.lock_owner = None;
                job.version += 1;
            }
            Ok(())
        }

        async fn fail_job(&self, id: &str, error: &str) -> Result<Option<Job>> {
            let mut state = self.inner.write();
            let Some(job) = state.jobs.get_mut(id) else {
                return Ok(None);
            };
            job.lock_owner = None;
            job.last_error = Some(error.to_string());
            job.retries = job.retries.saturating_sub(1);
            if job.retries == 0 {
                job.state = JobState::DeadLetter;
            }
            job.version += 1;
            Ok(Some(job.clone()))
        }

        async fn commit(&self, changes: ChangeSet) -> Result<()> {
            if changes.is_empty() {
                return Ok(());
            }
            let mut state = self.inner.write();
            state.verify(&changes)?;
            state.apply(changes);
            Ok(())
        }
    }
}

#[cfg(all(test, feature = "memory-store"))]
mod tests {
    use super::*;
    use crate::error::EngineError;

    #[tokio::test]
    async fn stale_update_is_rejected() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let root = Execution::new_process_instance("p");
        store
            .commit(ChangeSet {
                inserted_executions: vec![root.clone()],
                ..ChangeSet::default()
            })
            .await?;

        let mut first = root.clone();
        first.active = false;
        store
            .commit(ChangeSet {
                updated_executions: vec![first],
                ..ChangeSet::default()
            })
            .await?;

        let mut stale = root.clone();
        stale.scope = false;
        let result = store
            .commit(ChangeSet {
                updated_executions: vec![stale],
                ..ChangeSet::default()
            })
            .await;
        assert!(matches!(result, Err(EngineError::OptimisticLock { .. })));

        let stored = store.find_execution(&root.id).await?.expect("stored");
        assert_eq!(stored.version, 1);
        assert!(stored.scope);
        Ok(())
    }

    #[tokio::test]
    async fn failed_jobs_move_to_dead_letter() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        let job = Job::new(crate::jobs::JobKind::AsyncContinuation, "e", "p", 2);
        store
            .commit(ChangeSet {
                inserted_jobs: vec![job.clone()],
                ..ChangeSet::default()
            })
            .await?;

        let acquired = store.acquire_jobs(Utc::now(), 10, "worker").await?;
        assert_eq!(acquired.len(), 1);
        assert!(store.acquire_jobs(Utc::now(), 10, "worker").await?.is_empty());

        let failed = store.fail_job(&job.id, "boom").await?.expect("job");
        assert_eq!(failed.retries, 1);
        assert_eq!(failed.state, crate::jobs::JobState::Executable);

        store.acquire_jobs(Utc::now(), 10, "worker").await?;
        let failed = store.fail_job(&job.id, "boom").await?.expect("job");
        assert_eq!(failed.state, crate::jobs::JobState::DeadLetter);
        assert!(store.acquire_jobs(Utc::now(), 10, "worker").await?.is_empty());
        Ok(())
    }
}
