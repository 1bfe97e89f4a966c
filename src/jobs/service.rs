use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use crate::error::Result;
use crate::runtime::CommandContext;

use super::job::{Job, JobId, JobKind, JobState};

/// 事务内的作业创建与调度
///
/// 作业随命令的变更集一起提交，命令失败时不会留下作业。
pub struct JobService;

impl JobService {
    /// 为停留在异步节点上的执行创建异步继续作业
    pub fn create_async_job(
        ctx: &CommandContext,
        execution_id: &str,
        exclusive: bool,
    ) -> Result<Job> {
        let execution = ctx.execution(execution_id)?;
        let mut job = Job::new(
            JobKind::AsyncContinuation,
            execution_id,
            execution.process_instance_id.clone(),
            ctx.config().default_job_retries,
        )
        .with_exclusive(exclusive);
        if let Some(activity) = execution.current_element() {
            job = job.with_activity(activity);
        }
        Ok(job)
    }

    pub fn schedule_async_job(ctx: &mut CommandContext, job: Job) {
        trace!(job = %job.id, execution = %job.execution_id, "scheduled async job");
        ctx.unit_of_work_mut().add_job(job);
    }

    /// 断点作业创建即挂起，只能通过恢复断点执行
    pub fn create_breakpoint_job(ctx: &mut CommandContext, execution_id: &str) -> Result<JobId> {
        let execution = ctx.execution(execution_id)?;
        let mut job = Job::new(
            JobKind::Breakpoint,
            execution_id,
            execution.process_instance_id.clone(),
            0,
        )
        .with_state(JobState::Suspended);
        if let Some(activity) = execution.current_element() {
            job = job.with_activity(activity);
        }
        let id = job.id.clone();
        ctx.unit_of_work_mut().add_job(job);
        Ok(id)
    }

    /// 为多实例根执行调度完成检查；已有待执行的监控作业时不重复创建
    pub fn schedule_monitor_job(
        ctx: &mut CommandContext,
        root: &str,
        due_at: DateTime<Utc>,
    ) -> Result<Option<JobId>> {
        let pending = ctx
            .unit_of_work()
            .jobs_for_execution(root)
            .into_iter()
            .any(|job| job.kind == JobKind::MultiInstanceMonitor);
        if pending {
            return Ok(None);
        }
        let execution = ctx.execution(root)?;
        let mut job = Job::new(
            JobKind::MultiInstanceMonitor,
            root,
            execution.process_instance_id.clone(),
            ctx.config().default_job_retries,
        )
        .with_due_at(due_at);
        if let Some(activity) = execution.current_element() {
            job = job.with_activity(activity);
        }
        let id = job.id.clone();
        debug!(root = %root, job = %id, due_at = %due_at, "scheduled multi-instance monitor job");
        ctx.unit_of_work_mut().add_job(job);
        Ok(Some(id))
    }
}
