//! Scheduling and job execution for stored monitor plans.
//!
//! A [`Coordinator`] ticks on a fixed interval and enqueues a [`vigil_types::Job`]
//! for every plan whose frequency window has opened. A [`WorkerPool`] drains
//! the queue, resolving and running each plan through a [`JobRunner`]. The
//! [`PlanService`] facade exposes the same pieces in request/response form.

pub mod coordinator;
pub mod repository;
pub mod retry;
pub mod schedule;
pub mod service;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use coordinator::{Coordinator, DEFAULT_TICK};
pub use repository::{
    InMemoryJobQueue, InMemoryPlanRepository, InMemoryRunRepository, JobQueue, PlanRepository,
    RunRepository, StoredPlan,
};
pub use retry::{execute_with_retry, BackoffPolicy, RetryOutcome};
pub use schedule::{next_due, window_start, ScheduleBook};
pub use service::{ApiError, ApiResponse, ApiResult, PlanService};
pub use worker::{JobRunner, WorkerPool};

/// Knobs for the coordinator and worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    pub tick: Duration,
    pub workers: usize,
    pub max_retries: usize,
    pub backoff: BackoffPolicy,
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            workers: 4,
            max_retries: 3,
            backoff: BackoffPolicy::default(),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// A running coordinator plus worker pool.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Start ticking and working. `runner` should already carry the retry
    /// settings from `config`.
    pub fn start(
        config: &SchedulerConfig,
        coordinator: Arc<Coordinator>,
        runner: Arc<JobRunner>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let pool = WorkerPool::new(runner, queue, config.workers)
            .with_poll_interval(config.poll_interval);
        let mut tasks = pool.spawn(rx.clone());
        tasks.push(tokio::spawn(async move { coordinator.run(rx).await }));
        tracing::info!(workers = config.workers, "Scheduler started");
        Self { shutdown, tasks }
    }

    /// Signal shutdown and wait for every task. Jobs cut short go back to
    /// the queue.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Scheduler task panicked");
            }
        }
        tracing::info!("Scheduler stopped");
    }
}
