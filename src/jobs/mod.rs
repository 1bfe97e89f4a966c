// 作业：异步继续、多实例监控和调试断点

mod executor;
mod job;
mod service;

pub use executor::{JobExecutor, JobExecutorHandle, JobRunSummary};
pub use job::{Job, JobId, JobKind, JobState};
pub use service::JobService;
