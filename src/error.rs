use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 图配置或编程错误，不重试
    Fatal,
    /// 业务错误，沿作用域向外传播
    BusinessFault,
    /// 乐观锁冲突，可重试
    Conflict,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("process definition `{0}` not deployed")]
    UnknownProcess(String),
    #[error("unknown element `{element}` in process `{process}`")]
    UnknownElement { process: String, element: String },
    #[error("execution `{0}` not found")]
    ExecutionNotFound(String),
    #[error("job `{0}` not found")]
    JobNotFound(String),
    #[error("no outgoing sequence flow of element `{activity}` could be selected for continuing the process")]
    NoOutgoingFlow { activity: String },
    #[error("element `{activity}` does not support triggering")]
    NotTriggerable { activity: String },
    #[error("task handler `{0}` not registered")]
    HandlerNotRegistered(String),
    #[error("invalid process definition: {0}")]
    InvalidDefinition(String),
    #[error("business fault `{code}`")]
    BusinessFault {
        code: String,
        message: Option<String>,
    },
    #[error("no catching boundary or event sub-process for business fault `{code}`")]
    UnhandledBusinessFault { code: String },
    #[error("{entity} `{id}` was updated by another transaction")]
    OptimisticLock { entity: &'static str, id: String },
    #[error("multi-instance activity `{activity}` finished with {failed} failed instance(s)")]
    MultiInstanceFailed { activity: String, failed: usize },
    #[error("maximum operations per command {0} exceeded")]
    OperationLimitExceeded(usize),
    #[error("{0}")]
    Programmatic(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn business_fault(code: impl Into<String>) -> Self {
        EngineError::BusinessFault {
            code: code.into(),
            message: None,
        }
    }

    pub fn business_fault_with_message(code: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::BusinessFault {
            code: code.into(),
            message: Some(message.into()),
        }
    }

    pub fn programmatic(message: impl Into<String>) -> Self {
        EngineError::Programmatic(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::BusinessFault { .. } => ErrorKind::BusinessFault,
            EngineError::OptimisticLock { .. } => ErrorKind::Conflict,
            _ => ErrorKind::Fatal,
        }
    }

    /// 只有乐观锁冲突可以整体重试
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn is_business_fault(&self) -> bool {
        self.kind() == ErrorKind::BusinessFault
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(
            EngineError::business_fault("E1").kind(),
            ErrorKind::BusinessFault
        );
        assert!(EngineError::OptimisticLock {
            entity: "execution",
            id: "x".into()
        }
        .is_retryable());
        assert!(!EngineError::NoOutgoingFlow {
            activity: "gw".into()
        }
        .is_retryable());
        assert_eq!(
            EngineError::Other(anyhow::anyhow!("boom")).kind(),
            ErrorKind::Fatal
        );
    }
}
