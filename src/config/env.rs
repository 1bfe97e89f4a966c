use crate::error::{EngineError, Result};
use anyhow::anyhow;
use std::env;
use std::str::FromStr;

/// 环境变量配置管理
pub struct EnvConfig;

impl EnvConfig {
    /// 获取可选的环境变量
    pub fn get_env_optional(key: &str) -> Option<String> {
        env::var(key).ok()
    }

    /// 解析环境变量，未设置时返回 None
    pub fn get_env_parsed<T>(key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(key) {
            Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|err| {
                EngineError::Other(anyhow!(
                    "environment variable '{}' has invalid value '{}': {}",
                    key,
                    raw,
                    err
                ))
            }),
            Err(_) => Ok(None),
        }
    }

    /// 检查是否启用调试模式
    pub fn is_debug_mode() -> bool {
        env::var("PROCESSFLOW_DEBUG").is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_parsed() {
        env::set_var("PROCESSFLOW_TEST_PARSED", "42");
        let value: Option<u32> = EnvConfig::get_env_parsed("PROCESSFLOW_TEST_PARSED").unwrap();
        assert_eq!(value, Some(42));

        env::set_var("PROCESSFLOW_TEST_PARSED", "not-a-number");
        assert!(EnvConfig::get_env_parsed::<u32>("PROCESSFLOW_TEST_PARSED").is_err());
        env::remove_var("PROCESSFLOW_TEST_PARSED");

        let missing: Option<u32> = EnvConfig::get_env_parsed("PROCESSFLOW_TEST_PARSED").unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_get_env_missing() {
        env::remove_var("PROCESSFLOW_TEST_MISSING");
        assert!(EnvConfig::get_env_optional("PROCESSFLOW_TEST_MISSING").is_none());
    }
}
