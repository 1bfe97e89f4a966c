use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::flow::types::ProcessDefinition;

/// 流程定义注册表
#[derive(Default)]
pub struct ProcessRegistry {
    processes: RwLock<HashMap<String, Arc<ProcessDefinition>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同 key 重新部署会覆盖旧定义
    pub fn register(&self, definition: ProcessDefinition) -> Arc<ProcessDefinition> {
        let definition = Arc::new(definition);
        self.processes
            .write()
            .insert(definition.key.clone(), Arc::clone(&definition));
        definition
    }

    pub fn get(&self, key: &str) -> Option<Arc<ProcessDefinition>> {
        self.processes.read().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.processes.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}
