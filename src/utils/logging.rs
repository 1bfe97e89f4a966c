use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::EnvConfig;
use crate::error::{EngineError, Result};

const DEFAULT_FILTER: &str = "processflow=info,warn";
const DEBUG_FILTER: &str = "processflow::runtime=trace,processflow=debug,info";

/// 日志配置
///
/// 过滤器优先级：`RUST_LOG` > `PROCESSFLOW_LOG` > 调试开关对应的默认值。
/// `PROCESSFLOW_DEBUG` 打开时输出目标、文件行号和线程 id，便于跟踪议程中的操作顺序。
///
/// ```no_run
/// use processflow::utils::LoggingConfig;
///
/// LoggingConfig::from_env().init().expect("logging");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub filter: String,
    pub verbose: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            verbose: false,
        }
    }
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let verbose = EnvConfig::is_debug_mode();
        let filter = EnvConfig::get_env_optional("RUST_LOG")
            .or_else(|| EnvConfig::get_env_optional("PROCESSFLOW_LOG"))
            .unwrap_or_else(|| {
                if verbose {
                    DEBUG_FILTER.to_string()
                } else {
                    DEFAULT_FILTER.to_string()
                }
            });
        Self { filter, verbose }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }

    /// 安装全局订阅者；已经安装过时返回错误
    pub fn init(&self) -> Result<()> {
        let env_filter = EnvFilter::try_new(&self.filter).map_err(|err| {
            EngineError::Other(anyhow::anyhow!("invalid log filter `{}`: {err}", self.filter))
        })?;
        let fmt_layer = fmt::layer()
            .with_target(self.verbose)
            .with_file(self.verbose)
            .with_line_number(self.verbose)
            .with_thread_ids(self.verbose);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|err| EngineError::Other(anyhow::anyhow!("logging already initialized: {err}")))?;
        tracing::debug!(filter = %self.filter, "processflow logging initialized");
        Ok(())
    }

    /// 测试用：输出交给测试捕获，可重复调用
    pub fn init_for_tests() {
        let _ = tracing_subscriber::registry()
            .with(EnvFilter::new("processflow=debug"))
            .with(fmt::layer().with_test_writer())
            .try_init();
    }
}

/// 按错误分类记录引擎错误：冲突记为 debug，其余记为 warn
#[macro_export]
macro_rules! log_engine_error {
    ($err:expr, $($fields:tt)+) => {{
        let err: &$crate::error::EngineError = &$err;
        match err.kind() {
            $crate::error::ErrorKind::Conflict => {
                tracing::debug!(error = %err, kind = ?err.kind(), $($fields)+)
            }
            _ => tracing::warn!(error = %err, kind = ?err.kind(), $($fields)+),
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn filter_follows_environment() {
        env::remove_var("RUST_LOG");
        env::remove_var("PROCESSFLOW_LOG");
        env::remove_var("PROCESSFLOW_DEBUG");
        assert_eq!(LoggingConfig::from_env(), LoggingConfig::default());

        env::set_var("PROCESSFLOW_DEBUG", "1");
        let debug = LoggingConfig::from_env();
        assert!(debug.verbose);
        assert_eq!(debug.filter, DEBUG_FILTER);

        env::set_var("PROCESSFLOW_LOG", "processflow::jobs=trace");
        assert_eq!(LoggingConfig::from_env().filter, "processflow::jobs=trace");
        env::remove_var("PROCESSFLOW_LOG");
        env::remove_var("PROCESSFLOW_DEBUG");
    }

    #[test]
    fn rejects_malformed_filter() {
        let config = LoggingConfig::default().with_filter("processflow=notalevel");
        assert!(config.init().is_err());
    }
}
