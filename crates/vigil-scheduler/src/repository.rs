//! Storage contracts for plans, environments, runs and jobs, with in-memory
//! implementations.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_plan::{Plan, PlanIdentity};
use vigil_resolve::Environment;
use vigil_types::{Job, JobStatus, Result, RunResult, VigilError};

/// A plan as the service stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPlan {
    pub id: String,
    pub plan: Plan,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredPlan {
    pub fn new(plan: Plan) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plan,
            created_at: now,
            updated_at: now,
        }
    }
}

fn not_found(kind: &str, id: &str) -> VigilError {
    VigilError::NotFound {
        kind: kind.to_string(),
        id: id.to_string(),
    }
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// PlanRepository
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PlanRepository: Send + Sync {
    async fn insert_plan(&self, plan: StoredPlan) -> Result<()>;
    async fn get_plan(&self, id: &str) -> Result<Option<StoredPlan>>;
    async fn find_plan(&self, identity: &PlanIdentity) -> Result<Option<StoredPlan>>;
    async fn list_plans(&self) -> Result<Vec<StoredPlan>>;
    /// Replace an existing plan. Fails with `NotFound` for an unknown id.
    async fn update_plan(&self, plan: StoredPlan) -> Result<()>;
    async fn put_environment(&self, project: &str, environment: Environment) -> Result<()>;
    async fn get_environment(&self, project: &str, name: &str) -> Result<Option<Environment>>;
}

#[derive(Debug, Default)]
pub struct InMemoryPlanRepository {
    plans: Mutex<BTreeMap<String, StoredPlan>>,
    environments: Mutex<BTreeMap<(String, String), Environment>>,
}

impl InMemoryPlanRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanRepository for InMemoryPlanRepository {
    async fn insert_plan(&self, plan: StoredPlan) -> Result<()> {
        guard(&self.plans).insert(plan.id.clone(), plan);
        Ok(())
    }

    async fn get_plan(&self, id: &str) -> Result<Option<StoredPlan>> {
        Ok(guard(&self.plans).get(id).cloned())
    }

    async fn find_plan(&self, identity: &PlanIdentity) -> Result<Option<StoredPlan>> {
        Ok(guard(&self.plans)
            .values()
            .find(|p| &p.plan.identity() == identity)
            .cloned())
    }

    async fn list_plans(&self) -> Result<Vec<StoredPlan>> {
        Ok(guard(&self.plans).values().cloned().collect())
    }

    async fn update_plan(&self, plan: StoredPlan) -> Result<()> {
        let mut plans = guard(&self.plans);
        let slot = plans
            .get_mut(&plan.id)
            .ok_or_else(|| not_found("plan", &plan.id))?;
        *slot = plan;
        Ok(())
    }

    async fn put_environment(&self, project: &str, environment: Environment) -> Result<()> {
        guard(&self.environments).insert((project.to_string(), environment.name.clone()), environment);
        Ok(())
    }

    async fn get_environment(&self, project: &str, name: &str) -> Result<Option<Environment>> {
        Ok(guard(&self.environments)
            .get(&(project.to_string(), name.to_string()))
            .cloned())
    }
}

// ---------------------------------------------------------------------------
// RunRepository
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RunRepository: Send + Sync {
    async fn append_run(&self, run: RunResult) -> Result<()>;
    /// Runs of one plan, oldest first.
    async fn list_runs(&self, plan_id: &str) -> Result<Vec<RunResult>>;
}

#[derive(Debug, Default)]
pub struct InMemoryRunRepository {
    runs: Mutex<HashMap<String, Vec<RunResult>>>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn append_run(&self, run: RunResult) -> Result<()> {
        guard(&self.runs)
            .entry(run.plan_id.clone())
            .or_default()
            .push(run);
        Ok(())
    }

    async fn list_runs(&self, plan_id: &str) -> Result<Vec<RunResult>> {
        Ok(guard(&self.runs).get(plan_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// JobQueue
// ---------------------------------------------------------------------------

/// FIFO of pending jobs plus the record of every job ever enqueued.
/// All mutations are keyed by job id.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job, or put a known job back in line.
    async fn enqueue(&self, job: Job) -> Result<()>;
    /// Take the oldest job still `pending`, if any.
    async fn dequeue(&self) -> Result<Option<Job>>;
    /// Store a job's new state. Fails with `NotFound` for an unknown id.
    async fn update(&self, job: Job) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Job>>;
    async fn list(&self) -> Result<Vec<Job>>;
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: HashMap<String, Job>,
    pending: VecDeque<String>,
}

#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    state: Mutex<QueueState>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending_len(&self) -> usize {
        guard(&self.state).pending.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: Job) -> Result<()> {
        let mut state = guard(&self.state);
        if !state.pending.contains(&job.id) {
            state.pending.push_back(job.id.clone());
        }
        state.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<Job>> {
        let mut state = guard(&self.state);
        while let Some(id) = state.pending.pop_front() {
            match state.jobs.get(&id) {
                Some(job) if job.status == JobStatus::Pending => return Ok(Some(job.clone())),
                _ => {}
            }
        }
        Ok(None)
    }

    async fn update(&self, job: Job) -> Result<()> {
        let mut state = guard(&self.state);
        let slot = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| not_found("job", &job.id))?;
        *slot = job;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Job>> {
        Ok(guard(&self.state).jobs.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = guard(&self.state).jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }
}
