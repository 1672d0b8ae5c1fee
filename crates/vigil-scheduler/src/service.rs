//! Request-shaped facade over the repositories: every call answers with an
//! HTTP status and a body, or an [`ApiError`].

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use vigil_plan::{validate_or_raise, PlanDefinition};
use vigil_types::{Job, RunResult, VigilError};

use crate::repository::{JobQueue, PlanRepository, RunRepository, StoredPlan};
use crate::worker::JobRunner;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub body: T,
}

impl<T> ApiResponse<T> {
    fn ok(body: T) -> Self {
        Self { status: 200, body }
    }

    fn created(body: T) -> Self {
        Self { status: 201, body }
    }

    fn accepted(body: T) -> Self {
        Self { status: 202, body }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub status: u16,
    pub error: String,
}

impl From<VigilError> for ApiError {
    fn from(e: VigilError) -> Self {
        let status = e.http_status().unwrap_or(500);
        if status >= 500 {
            tracing::error!(error = %e, "Service call failed");
        }
        Self {
            status,
            error: e.to_string(),
        }
    }
}

pub type ApiResult<T> = std::result::Result<ApiResponse<T>, ApiError>;

/// Parse, migrate and validate a definition sent to the service.
fn parse_definition(definition: Value) -> Result<vigil_plan::Plan, VigilError> {
    let def = PlanDefinition::from_raw("request", "default", definition)?;
    validate_or_raise(&def.plan)?;
    Ok(def.plan)
}

fn not_found(kind: &str, id: &str) -> ApiError {
    VigilError::NotFound {
        kind: kind.to_string(),
        id: id.to_string(),
    }
    .into()
}

pub struct PlanService {
    plans: Arc<dyn PlanRepository>,
    runs: Arc<dyn RunRepository>,
    queue: Arc<dyn JobQueue>,
    runner: Arc<JobRunner>,
}

impl PlanService {
    pub fn new(
        plans: Arc<dyn PlanRepository>,
        runs: Arc<dyn RunRepository>,
        queue: Arc<dyn JobQueue>,
        runner: Arc<JobRunner>,
    ) -> Self {
        Self {
            plans,
            runs,
            queue,
            runner,
        }
    }

    /// Store a new plan under a fresh id. An identity already in use is a
    /// conflict.
    pub async fn create_plan(&self, definition: Value) -> ApiResult<StoredPlan> {
        let plan = parse_definition(definition)?;
        if let Some(existing) = self.plans.find_plan(&plan.identity()).await? {
            return Err(VigilError::SyncConflict {
                plan: plan.name.clone(),
                message: format!("{} already exists as {}", plan.identity(), existing.id),
            }
            .into());
        }
        let stored = StoredPlan::new(plan);
        self.plans.insert_plan(stored.clone()).await?;
        tracing::info!(plan = %stored.plan.name, plan_id = %stored.id, "Plan created");
        Ok(ApiResponse::created(stored))
    }

    /// Replace the definition of `plan_id`, keeping its id and creation time.
    pub async fn update_plan(&self, plan_id: &str, definition: Value) -> ApiResult<StoredPlan> {
        let plan = parse_definition(definition)?;
        let Some(mut stored) = self.plans.get_plan(plan_id).await? else {
            return Err(not_found("plan", plan_id));
        };
        if let Some(other) = self.plans.find_plan(&plan.identity()).await? {
            if other.id != plan_id {
                return Err(VigilError::SyncConflict {
                    plan: plan.name.clone(),
                    message: format!("{} already exists as {}", plan.identity(), other.id),
                }
                .into());
            }
        }
        stored.plan = plan;
        stored.updated_at = Utc::now();
        self.plans.update_plan(stored.clone()).await?;
        tracing::info!(plan = %stored.plan.name, plan_id = %stored.id, "Plan updated");
        Ok(ApiResponse::ok(stored))
    }

    pub async fn get_plan(&self, plan_id: &str) -> ApiResult<StoredPlan> {
        match self.plans.get_plan(plan_id).await? {
            Some(stored) => Ok(ApiResponse::ok(stored)),
            None => Err(not_found("plan", plan_id)),
        }
    }

    pub async fn list_plans(&self) -> ApiResult<Vec<StoredPlan>> {
        Ok(ApiResponse::ok(self.plans.list_plans().await?))
    }

    pub async fn list_runs(&self, plan_id: &str) -> ApiResult<Vec<RunResult>> {
        if self.plans.get_plan(plan_id).await?.is_none() {
            return Err(not_found("plan", plan_id));
        }
        Ok(ApiResponse::ok(self.runs.list_runs(plan_id).await?))
    }

    /// Queue an immediate run of `plan_id`, in its own environment unless
    /// `environment` names another.
    pub async fn enqueue_job(&self, plan_id: &str, environment: Option<&str>) -> ApiResult<Job> {
        let Some(stored) = self.plans.get_plan(plan_id).await? else {
            return Err(not_found("plan", plan_id));
        };
        let env = environment.unwrap_or(stored.plan.environment.as_str());
        let job = Job::pending(&stored.id, env, Utc::now());
        self.queue.enqueue(job.clone()).await?;
        tracing::info!(plan_id = %stored.id, job = %job.id, env = %env, "Job enqueued on request");
        Ok(ApiResponse::accepted(job))
    }

    pub async fn get_job(&self, job_id: &str) -> ApiResult<Job> {
        match self.queue.get(job_id).await? {
            Some(job) => Ok(ApiResponse::ok(job)),
            None => Err(not_found("job", job_id)),
        }
    }

    /// Run a queued job now, in the caller's task, and return its final state.
    pub async fn execute_job(&self, job_id: &str) -> ApiResult<Job> {
        let Some(job) = self.queue.get(job_id).await? else {
            return Err(not_found("job", job_id));
        };
        if job.status.is_finished() {
            return Ok(ApiResponse::ok(job));
        }
        // Nobody else will cancel a request-driven run.
        let (_tx, rx) = watch::channel(false);
        let job = self.runner.process(job, rx).await?;
        Ok(ApiResponse::ok(job))
    }
}
