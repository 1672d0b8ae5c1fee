//! Job execution: one job at a time per worker, many workers per pool.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use vigil_engine::PlanExecutor;
use vigil_resolve::{resolve, SecretRegistry};
use vigil_types::{Job, JobStatus, Result, RunResult, RunStatus, VigilError};

use crate::repository::{JobQueue, PlanRepository, RunRepository};
use crate::retry::{execute_with_retry, BackoffPolicy};

/// Turns a pending job into a recorded run.
pub struct JobRunner {
    plans: Arc<dyn PlanRepository>,
    runs: Arc<dyn RunRepository>,
    queue: Arc<dyn JobQueue>,
    secrets: Arc<SecretRegistry>,
    executor: PlanExecutor,
    max_retries: usize,
    backoff: BackoffPolicy,
}

impl JobRunner {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        runs: Arc<dyn RunRepository>,
        queue: Arc<dyn JobQueue>,
        secrets: Arc<SecretRegistry>,
        executor: PlanExecutor,
    ) -> Self {
        Self {
            plans,
            runs,
            queue,
            secrets,
            executor,
            max_retries: 3,
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn with_retries(mut self, max_retries: usize, backoff: BackoffPolicy) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    pub fn executor(&self) -> &PlanExecutor {
        &self.executor
    }

    /// Run `job` to a final status and record it.
    ///
    /// Secrets are resolved at execution time, once per attempt. A job cut
    /// short by `cancel` goes back to `pending` with its attempt count as it
    /// was before this call. Storage errors along the way fail the job with
    /// their message; only a failure to record that final state is returned.
    pub async fn process(&self, mut job: Job, cancel: watch::Receiver<bool>) -> Result<Job> {
        let attempts_before = job.attempt;
        job.mark_running();
        match self.attempt(&mut job, attempts_before, cancel).await {
            Ok(Step::Requeued) => Ok(job),
            Ok(Step::Finished(status, error)) => self.finish(job, status, error).await,
            Err(e) => {
                tracing::error!(job = %job.id, plan = %job.plan_id, error = %e, "Job bookkeeping failed");
                self.finish(job, JobStatus::Failed, Some(e.to_string())).await
            }
        }
    }

    async fn attempt(
        &self,
        job: &mut Job,
        attempts_before: u32,
        cancel: watch::Receiver<bool>,
    ) -> Result<Step> {
        self.queue.update(job.clone()).await?;
        tracing::info!(job = %job.id, plan = %job.plan_id, env = %job.environment, "Job started");

        let Some(stored) = self.plans.get_plan(&job.plan_id).await? else {
            let err = VigilError::NotFound {
                kind: "plan".into(),
                id: job.plan_id.clone(),
            };
            return Ok(Step::Finished(JobStatus::Failed, Some(err.to_string())));
        };
        let Some(environment) = self
            .plans
            .get_environment(&stored.plan.project, &job.environment)
            .await?
        else {
            let err = VigilError::NotFound {
                kind: "environment".into(),
                id: format!("{}/{}", stored.plan.project, job.environment),
            };
            return Ok(Step::Finished(JobStatus::Failed, Some(err.to_string())));
        };

        let plan = &stored.plan;
        let plan_id = stored.id.as_str();
        let env = &environment;
        let secrets: &SecretRegistry = &self.secrets;
        let executor = &self.executor;
        let run_cancel = cancel.clone();
        let outcome = execute_with_retry(
            move |_| {
                let cancel = run_cancel.clone();
                async move {
                    let resolved = resolve(plan, env, secrets).await?;
                    executor.run_until_cancelled(plan_id, &resolved, cancel).await
                }
            },
            self.max_retries,
            &self.backoff,
            &job.id,
            &cancel,
        )
        .await;

        if outcome.cancelled {
            job.status = JobStatus::Pending;
            job.attempt = attempts_before;
            job.started_at = None;
            self.queue.enqueue(job.clone()).await?;
            tracing::info!(job = %job.id, "Job returned to queue on shutdown");
            return Ok(Step::Requeued);
        }

        job.attempt = attempts_before + outcome.attempts as u32;
        match outcome.result {
            Ok(run) => {
                let (status, error) = job_verdict(&run);
                self.runs
                    .append_run(run)
                    .await
                    .map_err(|e| VigilError::Other(format!("run not recorded: {e}")))?;
                Ok(Step::Finished(status, error))
            }
            Err(e) => Ok(Step::Finished(JobStatus::Failed, Some(e.to_string()))),
        }
    }

    async fn finish(&self, mut job: Job, status: JobStatus, error: Option<String>) -> Result<Job> {
        job.mark_finished(status, error);
        self.queue.update(job.clone()).await?;
        match &job.last_error {
            None => tracing::info!(job = %job.id, plan = %job.plan_id, status = ?job.status, attempt = job.attempt, "Job finished"),
            Some(err) => tracing::warn!(job = %job.id, plan = %job.plan_id, status = ?job.status, attempt = job.attempt, error = %err, "Job finished"),
        }
        Ok(job)
    }
}

/// Where [`JobRunner::attempt`] left a job.
enum Step {
    Finished(JobStatus, Option<String>),
    Requeued,
}

/// Job status and error text for a finished run.
fn job_verdict(run: &RunResult) -> (JobStatus, Option<String>) {
    match run.status {
        RunStatus::Passed => (JobStatus::Succeeded, None),
        RunStatus::Failed => {
            let failed: usize = run.node_results.iter().map(|n| n.failed_assertions()).sum();
            (
                JobStatus::Failed,
                Some(format!("{failed} assertion(s) failed")),
            )
        }
        RunStatus::Error => {
            let reason = run
                .note
                .clone()
                .or_else(|| run.network_failure().map(|f| f.to_string()))
                .unwrap_or_else(|| "run ended in error".to_string());
            (JobStatus::Failed, Some(reason))
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

/// A fixed number of tokio tasks draining one shared queue.
pub struct WorkerPool {
    runner: Arc<JobRunner>,
    queue: Arc<dyn JobQueue>,
    workers: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(runner: Arc<JobRunner>, queue: Arc<dyn JobQueue>, workers: usize) -> Self {
        Self {
            runner,
            queue,
            workers: workers.max(1),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Start the workers. Each exits once `shutdown` reads `true`.
    pub fn spawn(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker| {
                let runner = self.runner.clone();
                let queue = self.queue.clone();
                let poll = self.poll_interval;
                let shutdown = shutdown.clone();
                tokio::spawn(work(worker, runner, queue, poll, shutdown))
            })
            .collect()
    }
}

async fn work(
    worker: usize,
    runner: Arc<JobRunner>,
    queue: Arc<dyn JobQueue>,
    poll: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker, "Worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match queue.dequeue().await {
            Ok(Some(job)) => {
                let id = job.id.clone();
                if let Err(e) = runner.process(job, shutdown.clone()).await {
                    tracing::error!(worker, job = %id, error = %e, "Job could not be recorded");
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                tracing::warn!(worker, error = %e, "Dequeue failed");
                tokio::time::sleep(poll).await;
            }
        }
    }
    tracing::debug!(worker, "Worker stopped");
}
