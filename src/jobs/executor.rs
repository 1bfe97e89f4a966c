use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::events::{EngineEvent, EngineEventKind};
use crate::runtime::ProcessEngine;

use super::job::{Job, JobState};

/// 一轮作业执行的结果统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobRunSummary {
    pub acquired: usize,
    pub executed: usize,
    /// 乐观锁冲突后释放，不消耗重试次数
    pub released: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl JobRunSummary {
    fn record(&mut self, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Executed => self.executed += 1,
            JobOutcome::Released => self.released += 1,
            JobOutcome::Failed => self.failed += 1,
            JobOutcome::DeadLettered => self.dead_lettered += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Executed,
    Released,
    Failed,
    DeadLettered,
}

/// 作业执行器
///
/// 获取到期作业后，同一流程实例的独占作业按顺序执行，其余作业并发执行，
/// 并发度由 `EngineConfig::job_executor_concurrency` 限制。
#[derive(Clone)]
pub struct JobExecutor {
    engine: ProcessEngine,
}

impl JobExecutor {
    pub fn new(engine: ProcessEngine) -> Self {
        Self { engine }
    }

    pub async fn run_due_jobs(&self) -> Result<JobRunSummary> {
        self.run_due_jobs_at(Utc::now()).await
    }

    pub async fn run_due_jobs_at(&self, now: DateTime<Utc>) -> Result<JobRunSummary> {
        let services = self.engine.services();
        let config = &services.config;
        let jobs = services
            .store
            .acquire_jobs(now, config.job_acquire_batch, &config.lock_owner())
            .await?;
        let mut summary = JobRunSummary {
            acquired: jobs.len(),
            ..JobRunSummary::default()
        };
        if jobs.is_empty() {
            return Ok(summary);
        }

        let outcomes: Vec<Vec<JobOutcome>> = stream::iter(group_jobs(jobs))
            .map(|group| async move {
                let mut outcomes = Vec::with_capacity(group.len());
                for job in group {
                    outcomes.push(self.run_job(job).await);
                }
                outcomes
            })
            .buffer_unordered(config.job_executor_concurrency.max(1))
            .collect()
            .await;
        for outcome in outcomes.into_iter().flatten() {
            summary.record(outcome);
        }
        debug!(
            acquired = summary.acquired,
            executed = summary.executed,
            released = summary.released,
            failed = summary.failed,
            dead_lettered = summary.dead_lettered,
            "job round finished"
        );
        Ok(summary)
    }

    /// 反复执行到期作业，直到一轮没有获取到作业或达到轮数上限
    pub async fn run_until_idle(&self, max_rounds: usize) -> Result<JobRunSummary> {
        let mut total = JobRunSummary::default();
        for _ in 0..max_rounds {
            let round = self.run_due_jobs().await?;
            if round.acquired == 0 {
                break;
            }
            total.acquired += round.acquired;
            total.executed += round.executed;
            total.released += round.released;
            total.failed += round.failed;
            total.dead_lettered += round.dead_lettered;
        }
        Ok(total)
    }

    async fn run_job(&self, job: Job) -> JobOutcome {
        let store = &self.engine.services().store;
        let error = match self.engine.execute_job(&job.id).await {
            Ok(()) => return JobOutcome::Executed,
            Err(err) => err,
        };

        if error.is_retryable() {
            debug!(job = %job.id, error = %error, "job conflicted, releasing");
            if let Err(err) = store.release_job(&job.id).await {
                warn!(job = %job.id, error = %err, "failed to release job");
            }
            return JobOutcome::Released;
        }

        crate::log_engine_error!(error, job = %job.id, job_kind = ?job.kind, execution = %job.execution_id, "job failed");
        let failed = match store.fail_job(&job.id, &error.to_string()).await {
            Ok(failed) => failed,
            Err(err) => {
                warn!(job = %job.id, error = %err, "failed to record job failure");
                None
            }
        };
        let dead_lettered = failed
            .as_ref()
            .map(|failed| failed.state == JobState::DeadLetter)
            .unwrap_or(false);
        let kind = if dead_lettered {
            EngineEventKind::JobDeadLettered
        } else {
            EngineEventKind::JobFailed
        };
        let mut event = EngineEvent::new(kind).with_payload(json!({
            "job": job.id,
            "error": error.to_string(),
            "retries": failed.as_ref().map(|failed| failed.retries),
        }));
        event.process_instance_id = Some(job.process_instance_id.clone());
        event.execution_id = Some(job.execution_id.clone());
        event.element_id = job.activity_id.clone();
        self.engine.services().events.dispatch(event);

        if dead_lettered {
            JobOutcome::DeadLettered
        } else {
            JobOutcome::Failed
        }
    }

    /// 在后台按固定间隔轮询到期作业
    pub fn spawn(self, poll_interval: Duration) -> JobExecutorHandle {
        let (shutdown, mut stopped) = watch::channel(false);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.run_due_jobs().await {
                            crate::log_engine_error!(err, "job executor round failed");
                        }
                    }
                    _ = stopped.changed() => break,
                }
            }
            debug!("job executor stopped");
        });
        JobExecutorHandle { shutdown, task }
    }
}

/// 后台作业执行器句柄
pub struct JobExecutorHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JobExecutorHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "job executor task ended abnormally");
        }
    }
}

/// 同一流程实例的独占作业放进同一组顺序执行，非独占作业各自成组
fn group_jobs(jobs: Vec<Job>) -> Vec<Vec<Job>> {
    let mut exclusive: BTreeMap<String, Vec<Job>> = BTreeMap::new();
    let mut groups = Vec::new();
    for job in jobs {
        if job.exclusive {
            exclusive
                .entry(job.process_instance_id.clone())
                .or_default()
                .push(job);
        } else {
            groups.push(vec![job]);
        }
    }
    groups.extend(exclusive.into_values());
    groups
}
