use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

use super::env::EnvConfig;

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 单个命令内最多执行的操作数，防止失控循环
    pub max_operations_per_command: usize,
    pub default_job_retries: u32,
    pub job_executor_concurrency: usize,
    pub job_acquire_batch: usize,
    pub multi_instance_monitor_interval_ms: u64,
    pub job_lock_owner: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_operations_per_command: 100_000,
            default_job_retries: 3,
            job_executor_concurrency: 8,
            job_acquire_batch: 32,
            multi_instance_monitor_interval_ms: 500,
            job_lock_owner: None,
        }
    }
}

impl EngineConfig {
    /// 从环境变量加载，未设置的字段使用默认值
    ///
    /// - PROCESSFLOW_MAX_OPERATIONS
    /// - PROCESSFLOW_JOB_RETRIES
    /// - PROCESSFLOW_JOB_CONCURRENCY
    /// - PROCESSFLOW_JOB_BATCH
    /// - PROCESSFLOW_MI_MONITOR_INTERVAL_MS
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(value) = EnvConfig::get_env_parsed("PROCESSFLOW_MAX_OPERATIONS")? {
            config.max_operations_per_command = value;
        }
        if let Some(value) = EnvConfig::get_env_parsed("PROCESSFLOW_JOB_RETRIES")? {
            config.default_job_retries = value;
        }
        if let Some(value) = EnvConfig::get_env_parsed("PROCESSFLOW_JOB_CONCURRENCY")? {
            config.job_executor_concurrency = value;
        }
        if let Some(value) = EnvConfig::get_env_parsed("PROCESSFLOW_JOB_BATCH")? {
            config.job_acquire_batch = value;
        }
        if let Some(value) = EnvConfig::get_env_parsed("PROCESSFLOW_MI_MONITOR_INTERVAL_MS")? {
            config.multi_instance_monitor_interval_ms = value;
        }
        config.job_lock_owner = EnvConfig::get_env_optional("PROCESSFLOW_JOB_LOCK_OWNER");
        Ok(config)
    }

    pub fn with_max_operations(mut self, limit: usize) -> Self {
        self.max_operations_per_command = limit.max(1);
        self
    }

    pub fn with_job_retries(mut self, retries: u32) -> Self {
        self.default_job_retries = retries;
        self
    }

    pub fn with_job_concurrency(mut self, limit: usize) -> Self {
        self.job_executor_concurrency = limit.max(1);
        self
    }

    pub fn with_job_acquire_batch(mut self, batch: usize) -> Self {
        self.job_acquire_batch = batch.max(1);
        self
    }

    pub fn with_multi_instance_monitor_interval(mut self, interval: Duration) -> Self {
        self.multi_instance_monitor_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_job_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.job_lock_owner = Some(owner.into());
        self
    }

    pub fn multi_instance_monitor_interval(&self) -> Duration {
        Duration::from_millis(self.multi_instance_monitor_interval_ms)
    }

    pub fn lock_owner(&self) -> String {
        self.job_lock_owner
            .clone()
            .unwrap_or_else(|| "processflow-job-executor".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_setters_clamp_limits() {
        let config = EngineConfig::default()
            .with_job_concurrency(0)
            .with_max_operations(0)
            .with_job_retries(5);
        assert_eq!(config.job_executor_concurrency, 1);
        assert_eq!(config.max_operations_per_command, 1);
        assert_eq!(config.default_job_retries, 5);
    }

    #[test]
    fn deserializes_partial_config() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"default_job_retries": 1}"#).unwrap();
        assert_eq!(config.default_job_retries, 1);
        assert_eq!(config.job_executor_concurrency, 8);
    }

    #[test]
    fn from_env_overrides_defaults() {
        std::env::set_var("PROCESSFLOW_JOB_BATCH", "4");
        let config = EngineConfig::from_env().unwrap();
        std::env::remove_var("PROCESSFLOW_JOB_BATCH");
        assert_eq!(config.job_acquire_batch, 4);
    }
}
