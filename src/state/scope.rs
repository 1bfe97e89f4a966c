use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use super::tree::ExecutionTree;

/// 变量视图：从根到当前执行逐层覆盖，离当前执行最近的定义优先
#[derive(Clone, Default)]
pub struct VariableView {
    values: BTreeMap<String, Value>,
}

impl VariableView {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    /// 收集某个执行可见的全部变量
    pub fn collect(tree: &ExecutionTree, execution_id: &str) -> Self {
        let mut chain = tree.ancestors(execution_id);
        chain.reverse();
        chain.push(execution_id.to_string());
        let mut values = BTreeMap::new();
        for id in chain {
            if let Some(execution) = tree.get(&id) {
                for (name, value) in &execution.variables {
                    values.insert(name.clone(), value.clone());
                }
            }
        }
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_map(self) -> BTreeMap<String, Value> {
        self.values
    }
}

impl fmt::Debug for VariableView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableView")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// 查找定义了某变量的最近执行（含自身）
pub(crate) fn defining_execution(
    tree: &ExecutionTree,
    execution_id: &str,
    name: &str,
) -> Option<String> {
    let mut chain = vec![execution_id.to_string()];
    chain.extend(tree.ancestors(execution_id));
    chain.into_iter().find(|id| {
        tree.get(id)
            .map(|execution| execution.variables.contains_key(name))
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Execution;
    use serde_json::json;

    #[test]
    fn nearest_definition_wins() {
        let mut tree = ExecutionTree::new();
        let mut root = Execution::new_process_instance("p");
        root.variables.insert("amount".into(), json!(10));
        root.variables.insert("owner".into(), json!("root"));
        let mut child = Execution::new_child(&root);
        child.variables.insert("amount".into(), json!(20));
        let child_id = child.id.clone();
        let root_id = root.id.clone();
        tree.insert(root);
        tree.insert(child);

        let view = VariableView::collect(&tree, &child_id);
        assert_eq!(view.get_i64("amount"), Some(20));
        assert_eq!(view.get_str("owner"), Some("root"));
        assert_eq!(defining_execution(&tree, &child_id, "owner"), Some(root_id));
        assert_eq!(defining_execution(&tree, &child_id, "missing"), None);
    }
}
