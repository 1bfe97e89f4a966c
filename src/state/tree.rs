use std::collections::BTreeMap;

use crate::error::{EngineError, Result};

use super::execution::{Execution, ExecutionId};

/// 执行树：按 id 存放的执行集合，子节点通过 parent_id 查找
#[derive(Debug, Clone, Default)]
pub struct ExecutionTree {
    executions: BTreeMap<ExecutionId, Execution>,
}

impl ExecutionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Execution> {
        self.executions.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Execution> {
        self.executions.get_mut(id)
    }

    pub fn require(&self, id: &str) -> Result<&Execution> {
        self.executions
            .get(id)
            .ok_or_else(|| EngineError::ExecutionNotFound(id.to_string()))
    }

    pub fn require_mut(&mut self, id: &str) -> Result<&mut Execution> {
        self.executions
            .get_mut(id)
            .ok_or_else(|| EngineError::ExecutionNotFound(id.to_string()))
    }

    /// 执行所属的流程实例根执行
    pub fn process_instance(&self, id: &str) -> Option<&Execution> {
        self.get(id)
            .and_then(|execution| self.get(&execution.process_instance_id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.executions.contains_key(id)
    }

    pub fn insert(&mut self, execution: Execution) {
        self.executions.insert(execution.id.clone(), execution);
    }

    pub fn remove(&mut self, id: &str) -> Option<Execution> {
        self.executions.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Execution> {
        self.executions.values()
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// 直接子执行 id，按创建顺序
    pub fn children(&self, parent: &str) -> Vec<ExecutionId> {
        let mut children: Vec<&Execution> = self
            .executions
            .values()
            .filter(|execution| execution.parent_id.as_deref() == Some(parent) && !execution.deleted)
            .collect();
        children.sort_by_key(|execution| execution.sequence);
        children.into_iter().map(|execution| execution.id.clone()).collect()
    }

    /// 从父到根的祖先 id（不含自身）
    pub fn ancestors(&self, id: &str) -> Vec<ExecutionId> {
        let mut result = Vec::new();
        let mut current = self.get(id).and_then(|execution| execution.parent_id.clone());
        while let Some(parent_id) = current {
            current = self.get(&parent_id).and_then(|execution| execution.parent_id.clone());
            result.push(parent_id);
        }
        result
    }

    /// 最近的作用域祖先（不含自身）
    pub fn parent_scope(&self, id: &str) -> Option<ExecutionId> {
        self.ancestors(id)
            .into_iter()
            .find(|ancestor| self.get(ancestor).map(|e| e.scope).unwrap_or(false))
    }

    /// 自身为作用域时返回自身，否则返回最近的作用域祖先
    pub fn scope_of(&self, id: &str) -> Option<ExecutionId> {
        match self.get(id) {
            Some(execution) if execution.scope => Some(execution.id.clone()),
            Some(_) => self.parent_scope(id),
            None => None,
        }
    }

    /// 后序遍历（叶子优先）的所有后代 id，不含自身；基于遍历开始时的快照
    pub fn descendants_post_order(&self, id: &str) -> Vec<ExecutionId> {
        let mut result = Vec::new();
        let mut stack: Vec<(ExecutionId, bool)> =
            self.children(id).into_iter().rev().map(|child| (child, false)).collect();
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                result.push(current);
                continue;
            }
            stack.push((current.clone(), true));
            for child in self.children(&current).into_iter().rev() {
                stack.push((child, false));
            }
        }
        result
    }

    /// 先序遍历的所有后代 id，不含自身
    pub fn descendants_pre_order(&self, id: &str) -> Vec<ExecutionId> {
        let mut result = Vec::new();
        let mut stack: Vec<ExecutionId> = self.children(id).into_iter().rev().collect();
        while let Some(current) = stack.pop() {
            for child in self.children(&current).into_iter().rev() {
                stack.push(child);
            }
            result.push(current);
        }
        result
    }

    /// 某个流程实例的全部执行，按创建顺序
    pub fn executions_of_instance(&self, process_instance_id: &str) -> Vec<ExecutionId> {
        let mut executions: Vec<&Execution> = self
            .executions
            .values()
            .filter(|execution| execution.process_instance_id == process_instance_id)
            .collect();
        executions.sort_by_key(|execution| execution.sequence);
        executions.into_iter().map(|execution| execution.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> (ExecutionTree, Vec<ExecutionId>) {
        let mut tree = ExecutionTree::new();
        let root = Execution::new_process_instance("p");
        let mut sub = Execution::new_child(&root);
        sub.scope = true;
        let a = Execution::new_child(&sub);
        let b = Execution::new_child(&sub);
        let c = Execution::new_child(&root);
        let ids = vec![
            root.id.clone(),
            sub.id.clone(),
            a.id.clone(),
            b.id.clone(),
            c.id.clone(),
        ];
        for execution in [root, sub, a, b, c] {
            tree.insert(execution);
        }
        (tree, ids)
    }

    #[test]
    fn post_order_visits_leaves_first() {
        let (tree, ids) = sample_tree();
        let order = tree.descendants_post_order(&ids[0]);
        assert_eq!(
            order,
            vec![ids[2].clone(), ids[3].clone(), ids[1].clone(), ids[4].clone()]
        );
    }

    #[test]
    fn pre_order_visits_parents_first() {
        let (tree, ids) = sample_tree();
        let order = tree.descendants_pre_order(&ids[0]);
        assert_eq!(
            order,
            vec![ids[1].clone(), ids[2].clone(), ids[3].clone(), ids[4].clone()]
        );
    }

    #[test]
    fn resolves_scopes() {
        let (tree, ids) = sample_tree();
        assert_eq!(tree.parent_scope(&ids[2]), Some(ids[1].clone()));
        assert_eq!(tree.scope_of(&ids[1]), Some(ids[1].clone()));
        assert_eq!(tree.scope_of(&ids[4]), Some(ids[0].clone()));
        assert_eq!(tree.ancestors(&ids[3]), vec![ids[1].clone(), ids[0].clone()]);
        assert_eq!(tree.process_instance(&ids[3]).map(|e| e.id.clone()), Some(ids[0].clone()));
        assert!(tree.require("missing").is_err());
    }
}
