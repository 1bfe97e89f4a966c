use std::collections::{BTreeMap, BTreeSet};

use tracing::trace;

use crate::error::Result;
use crate::jobs::{Job, JobState};

use super::execution::{Execution, ExecutionId};
use super::store::{ChangeSet, EntityStore};
use super::subscription::{EventSubscription, SubscriptionKind};
use super::tree::ExecutionTree;

/// 事务内的实体缓存
///
/// 按流程实例整体加载执行、事件订阅和作业；通过父子调用关联的流程实例一并加载。
/// 提交时与加载快照做差异比较得到 `ChangeSet`。
#[derive(Debug, Default)]
pub struct UnitOfWork {
    tree: ExecutionTree,
    subscriptions: BTreeMap<String, EventSubscription>,
    jobs: BTreeMap<String, Job>,
    original_executions: BTreeMap<String, Execution>,
    original_subscriptions: BTreeMap<String, EventSubscription>,
    original_jobs: BTreeMap<String, Job>,
    forced: BTreeSet<String>,
    loaded_instances: BTreeSet<String>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加载流程实例及其关联的父/子流程实例
    pub async fn load_instances(
        &mut self,
        store: &dyn EntityStore,
        process_instance_ids: &[String],
    ) -> Result<()> {
        let mut worklist: Vec<String> = process_instance_ids.to_vec();
        while let Some(process_instance_id) = worklist.pop() {
            if !self.loaded_instances.insert(process_instance_id.clone()) {
                continue;
            }
            let executions = store
                .find_executions_by_process_instance(&process_instance_id)
                .await?;
            for execution in executions {
                if let Some(super_id) = &execution.super_execution_id {
                    if let Some(super_execution) = store.find_execution(super_id).await? {
                        worklist.push(super_execution.process_instance_id);
                    }
                }
                if let Some(sub_instance) = &execution.sub_process_instance_id {
                    worklist.push(sub_instance.clone());
                }
                if !self.tree.contains(&execution.id) {
                    self.original_executions
                        .insert(execution.id.clone(), execution.clone());
                    self.tree.insert(execution);
                }
            }
            for subscription in store
                .find_subscriptions_by_process_instance(&process_instance_id)
                .await?
            {
                self.original_subscriptions
                    .entry(subscription.id.clone())
                    .or_insert_with(|| subscription.clone());
                self.subscriptions
                    .entry(subscription.id.clone())
                    .or_insert(subscription);
            }
            for job in store
                .find_jobs_by_process_instance(&process_instance_id)
                .await?
            {
                self.original_jobs
                    .entry(job.id.clone())
                    .or_insert_with(|| job.clone());
                self.jobs.entry(job.id.clone()).or_insert(job);
            }
            trace!(process_instance = %process_instance_id, "loaded process instance");
        }
        Ok(())
    }

    pub fn is_loaded(&self, process_instance_id: &str) -> bool {
        self.loaded_instances.contains(process_instance_id)
    }

    pub fn tree(&self) -> &ExecutionTree {
        &self.tree
    }

    // ---- executions ----

    pub fn create_process_instance(&mut self, process_definition_key: &str) -> ExecutionId {
        let root = Execution::new_process_instance(process_definition_key);
        let id = root.id.clone();
        self.loaded_instances.insert(id.clone());
        self.tree.insert(root);
        id
    }

    pub fn create_child(&mut self, parent_id: &str) -> Result<ExecutionId> {
        let parent = self.execution(parent_id)?;
        let child = Execution::new_child(parent);
        let id = child.id.clone();
        self.tree.insert(child);
        Ok(id)
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Execution> {
        self.tree.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tree.contains(id)
    }

    pub fn execution(&self, id: &str) -> Result<&Execution> {
        self.tree.require(id)
    }

    pub fn execution_mut(&mut self, id: &str) -> Result<&mut Execution> {
        self.tree.require_mut(id)
    }

    pub fn find_children_by_parent(&self, parent_id: &str) -> Vec<ExecutionId> {
        self.tree.children(parent_id)
    }

    pub fn executions_of_instance(&self, process_instance_id: &str) -> Vec<ExecutionId> {
        self.tree.executions_of_instance(process_instance_id)
    }

    /// 删除单个执行及其拥有的事件订阅、作业和被调用的子流程实例
    pub fn delete_execution(&mut self, id: &str, reason: Option<&str>) -> Result<()> {
        let Some(mut execution) = self.tree.remove(id) else {
            return Ok(());
        };
        execution.ended = true;
        execution.deleted = true;
        execution.delete_reason = reason.map(str::to_string);
        self.subscriptions
            .retain(|_, subscription| subscription.execution_id != id);
        self.jobs.retain(|_, job| job.execution_id != id);
        if let Some(sub_instance) = execution.sub_process_instance_id.take() {
            if self.tree.contains(&sub_instance) {
                self.delete_subtree(&sub_instance, reason)?;
            }
        }
        if let Some(super_id) = &execution.super_execution_id {
            if let Some(super_execution) = self.tree.get_mut(super_id) {
                if super_execution.sub_process_instance_id.as_deref() == Some(id) {
                    super_execution.sub_process_instance_id = None;
                }
            }
        }
        trace!(execution = %id, reason = ?reason, "deleted execution");
        Ok(())
    }

    /// 叶子优先删除全部后代，再删除自身
    pub fn delete_subtree(&mut self, id: &str, reason: Option<&str>) -> Result<()> {
        for descendant in self.tree.descendants_post_order(id) {
            self.delete_execution(&descendant, reason)?;
        }
        self.delete_execution(id, reason)
    }

    pub fn delete_descendants(&mut self, id: &str, reason: Option<&str>) -> Result<()> {
        for descendant in self.tree.descendants_post_order(id) {
            self.delete_execution(&descendant, reason)?;
        }
        Ok(())
    }

    /// 即使未修改也在提交时做版本检查，用作父作用域上的乐观锁
    pub fn force_update(&mut self, id: &str) {
        self.forced.insert(id.to_string());
    }

    // ---- event subscriptions ----

    pub fn add_subscription(&mut self, subscription: EventSubscription) {
        self.subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    pub fn delete_subscription(&mut self, id: &str) {
        self.subscriptions.remove(id);
    }

    pub fn subscription(&self, id: &str) -> Option<&EventSubscription> {
        self.subscriptions.get(id)
    }

    pub fn subscription_mut(&mut self, id: &str) -> Option<&mut EventSubscription> {
        self.subscriptions.get_mut(id)
    }

    pub fn subscriptions_for_execution(&self, execution_id: &str) -> Vec<EventSubscription> {
        self.sorted_subscriptions(|subscription| subscription.execution_id == execution_id)
    }

    pub fn subscriptions_of_instance(&self, process_instance_id: &str) -> Vec<EventSubscription> {
        self.sorted_subscriptions(|subscription| {
            subscription.process_instance_id == process_instance_id
        })
    }

    pub fn subscriptions_by_event(
        &self,
        kind: SubscriptionKind,
        event_name: &str,
    ) -> Vec<EventSubscription> {
        self.sorted_subscriptions(|subscription| subscription.matches(kind, event_name))
    }

    fn sorted_subscriptions(
        &self,
        predicate: impl Fn(&EventSubscription) -> bool,
    ) -> Vec<EventSubscription> {
        let mut result: Vec<EventSubscription> = self
            .subscriptions
            .values()
            .filter(|subscription| predicate(subscription))
            .cloned()
            .collect();
        result.sort_by_key(|subscription| subscription.sequence);
        result
    }

    // ---- jobs ----

    pub fn add_job(&mut self, job: Job) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn delete_job(&mut self, id: &str) {
        self.jobs.remove(id);
    }

    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn jobs_for_execution(&self, execution_id: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .values()
            .filter(|job| job.execution_id == execution_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.sequence);
        jobs
    }

    pub fn has_dead_letter_job(&self, execution_id: &str) -> bool {
        self.jobs
            .values()
            .any(|job| job.execution_id == execution_id && job.state == JobState::DeadLetter)
    }

    // ---- commit ----

    pub fn into_change_set(self) -> ChangeSet {
        let mut changes = ChangeSet::default();

        for execution in self.tree.iter() {
            match self.original_executions.get(&execution.id) {
                None => changes.inserted_executions.push(execution.clone()),
                Some(original) => {
                    if original != execution || self.forced.contains(&execution.id) {
                        changes.updated_executions.push(execution.clone());
                    }
                }
            }
        }
        for (id, original) in &self.original_executions {
            if !self.tree.contains(id) {
                changes.deleted_executions.push((id.clone(), original.version));
            }
        }

        for (id, subscription) in &self.subscriptions {
            match self.original_subscriptions.get(id) {
                None => changes.inserted_subscriptions.push(subscription.clone()),
                Some(original) if original != subscription => {
                    changes.updated_subscriptions.push(subscription.clone())
                }
                Some(_) => {}
            }
        }
        for id in self.original_subscriptions.keys() {
            if !self.subscriptions.contains_key(id) {
                changes.deleted_subscriptions.push(id.clone());
            }
        }

        for (id, job) in &self.jobs {
            match self.original_jobs.get(id) {
                None => changes.inserted_jobs.push(job.clone()),
                Some(original) if original != job => changes.updated_jobs.push(job.clone()),
                Some(_) => {}
            }
        }
        for (id, original) in &self.original_jobs {
            if !self.jobs.contains_key(id) {
                changes.deleted_jobs.push((id.clone(), original.version));
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobKind;

    #[test]
    fn delete_cascades_to_owned_entities() -> anyhow::Result<()> {
        let mut uow = UnitOfWork::new();
        let root = uow.create_process_instance("p");
        let child = uow.create_child(&root)?;
        uow.add_subscription(EventSubscription::new(
            SubscriptionKind::Message,
            Some("ping".into()),
            child.clone(),
            root.clone(),
            "catch",
        ));
        uow.add_job(Job::new(JobKind::AsyncContinuation, child.clone(), root.clone(), 3));

        uow.delete_subtree(&root, Some("test"))?;
        assert!(uow.find_by_id(&child).is_none());
        assert!(uow.subscriptions_of_instance(&root).is_empty());
        assert!(uow.jobs_for_execution(&child).is_empty());
        Ok(())
    }

    #[test]
    fn change_set_contains_only_new_entities_for_fresh_instance() -> anyhow::Result<()> {
        let mut uow = UnitOfWork::new();
        let root = uow.create_process_instance("p");
        uow.create_child(&root)?;
        uow.force_update(&root);
        let changes = uow.into_change_set();
        assert_eq!(changes.inserted_executions.len(), 2);
        assert!(changes.updated_executions.is_empty());
        assert!(changes.deleted_executions.is_empty());
        Ok(())
    }
}
