//! Sequential plan execution.
//!
//! Nodes run one at a time in edge order from `START`. A node passes when all
//! of its assertions hold. A failed request marks the node `error` and stops
//! the run; results collected so far are kept.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use url::Url;

use vigil_http::{AdapterError, HttpAdapter, HttpRequest, HttpResponse};
use vigil_plan::{AssertionPath, PlanGraph};
use vigil_resolve::{ResolvedNode, ResolvedPlan, ResolvedPredicate};
use vigil_types::{
    AssertionResult, NetworkFailure, NodeResult, Result, RunResult, RunStatus, VigilError,
};

use crate::assertion::{evaluate, Evaluation};
use crate::events::{EventEmitter, RunEvent};
use crate::extract::ResponseView;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Runs resolved plans against one HTTP adapter and reports progress as events.
#[derive(Clone)]
pub struct PlanExecutor {
    adapter: Arc<dyn HttpAdapter>,
    events: EventEmitter,
}

/// A node ready to run: its request URL and parsed assertion paths.
struct Step<'p> {
    node: &'p ResolvedNode,
    url: Url,
    paths: Vec<AssertionPath>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Append `path` to `base`, keeping any path prefix the base URL carries.
pub fn join_url(base: &str, path: &str) -> std::result::Result<Url, url::ParseError> {
    let mut url = Url::parse(base)?;
    let path = path.trim();
    if path.is_empty() {
        return Ok(url);
    }
    if !url.path().ends_with('/') {
        let with_slash = format!("{}/", url.path());
        url.set_path(&with_slash);
    }
    url.join(path.trim_start_matches('/'))
}

fn prepare(plan: &ResolvedPlan) -> Result<Vec<Step<'_>>> {
    let graph = PlanGraph::new(plan.nodes.iter().map(|n| n.id.clone()), &plan.edges);
    graph
        .execution_order()?
        .into_iter()
        .map(|id| {
            let node = plan.node(&id).ok_or_else(|| {
                VigilError::schema(format!("plan '{}'", plan.name), format!("no node '{id}'"))
            })?;
            let url = join_url(&node.base_url, &node.path).map_err(|e| {
                VigilError::schema(
                    format!("node '{}' target '{}'", node.id, node.target_ref),
                    format!("invalid URL: {e}"),
                )
            })?;
            let paths = node
                .assertions
                .iter()
                .map(|a| AssertionPath::parse(a.format, &a.path))
                .collect::<Result<Vec<_>>>()?;
            Ok(Step { node, url, paths })
        })
        .collect()
}

fn check_assertions(step: &Step<'_>, response: &HttpResponse) -> Vec<AssertionResult> {
    let view = ResponseView::new(response);
    step.node
        .assertions
        .iter()
        .zip(&step.paths)
        .map(|(assertion, path)| {
            let expected = match &assertion.predicate {
                ResolvedPredicate::Binary(_, operand) => Some(operand.clone()),
                ResolvedPredicate::Unary(_) => None,
            };
            let (actual, evaluation) = match view.extract(path) {
                Ok(actual) => {
                    let evaluation = evaluate(&assertion.predicate, actual.as_ref());
                    (actual, evaluation)
                }
                Err(e) => (
                    None,
                    Evaluation {
                        passed: false,
                        message: Some(e.to_string()),
                    },
                ),
            };
            AssertionResult {
                path: assertion.path.clone(),
                predicate: assertion.predicate.op_name().to_string(),
                passed: evaluation.passed,
                actual,
                expected,
                message: evaluation.message,
            }
        })
        .collect()
}

fn is_cancelled(cancel: Option<&watch::Receiver<bool>>) -> bool {
    cancel.is_some_and(|rx| *rx.borrow())
}

// ---------------------------------------------------------------------------
// PlanExecutor
// ---------------------------------------------------------------------------

impl PlanExecutor {
    pub fn new(adapter: Arc<dyn HttpAdapter>) -> Self {
        Self {
            adapter,
            events: EventEmitter::default(),
        }
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    /// Run `plan` to completion.
    pub async fn run(&self, plan_id: &str, plan: &ResolvedPlan) -> Result<RunResult> {
        self.drive(plan_id, plan, None).await
    }

    /// Run `plan`, stopping before the next node once `cancel` reads `true`.
    pub async fn run_until_cancelled(
        &self,
        plan_id: &str,
        plan: &ResolvedPlan,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunResult> {
        self.drive(plan_id, plan, Some(&cancel)).await
    }

    async fn drive(
        &self,
        plan_id: &str,
        plan: &ResolvedPlan,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<RunResult> {
        let steps = prepare(plan)?;

        let started_at = Utc::now();
        let run_clock = Instant::now();
        self.events.emit(RunEvent::RunStarted {
            plan: plan.name.clone(),
            environment: plan.environment.clone(),
            node_count: steps.len(),
        });
        tracing::info!(
            plan = %plan.name,
            env = %plan.environment,
            nodes = steps.len(),
            adapter = self.adapter.name(),
            "Run started"
        );

        let mut node_results: Vec<NodeResult> = Vec::with_capacity(steps.len());
        let mut note = None;
        let mut cancelled = false;

        for step in &steps {
            let node = step.node;
            if is_cancelled(cancel) {
                tracing::warn!(plan = %plan.name, node = %node.id, "Run cancelled");
                note = Some(format!("cancelled before node '{}'", node.id));
                cancelled = true;
                break;
            }

            self.events.emit(RunEvent::NodeStarted {
                node_id: node.id.clone(),
                method: node.method.to_string(),
                target: node.target_ref.clone(),
            });

            let request = HttpRequest {
                method: node.method,
                url: step.url.to_string(),
                headers: node.headers.clone(),
                body: node.body.clone(),
                timeout: plan.timeout,
            };
            let clock = Instant::now();
            let outcome = self.adapter.request(&request).await;
            let duration_ms = clock.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(response) => {
                    let assertions = check_assertions(step, &response);
                    let status = if assertions.iter().all(|a| a.passed) {
                        RunStatus::Passed
                    } else {
                        RunStatus::Failed
                    };
                    NodeResult {
                        node_id: node.id.clone(),
                        status,
                        http_status: Some(response.status),
                        duration_ms,
                        assertions,
                        error: None,
                    }
                }
                Err(AdapterError::Network(failure)) => {
                    tracing::warn!(plan = %plan.name, node = %node.id, error = %failure, "Request failed");
                    note = Some(format!("halted at node '{}': {failure}", node.id));
                    let http_status = match failure {
                        NetworkFailure::HttpStatusError { status } => Some(status),
                        _ => None,
                    };
                    NodeResult {
                        node_id: node.id.clone(),
                        status: RunStatus::Error,
                        http_status,
                        duration_ms,
                        assertions: Vec::new(),
                        error: Some(failure),
                    }
                }
                Err(e @ AdapterError::NoStubMatched { .. }) => return Err(e.for_node(&node.id)),
            };

            tracing::info!(
                plan = %plan.name,
                node = %node.id,
                status = ?result.status,
                duration_ms,
                failed_assertions = result.failed_assertions(),
                "Node completed"
            );
            self.events.emit(RunEvent::NodeCompleted {
                node_id: node.id.clone(),
                status: result.status,
                http_status: result.http_status,
                duration_ms,
            });

            let halted = result.status == RunStatus::Error;
            node_results.push(result);
            if halted {
                break;
            }
        }

        let status = if cancelled {
            RunStatus::Error
        } else {
            RunResult::aggregate(&node_results)
        };
        let duration_ms = run_clock.elapsed().as_millis() as u64;
        self.events.emit(RunEvent::RunCompleted {
            plan: plan.name.clone(),
            status,
            duration_ms,
        });
        tracing::info!(plan = %plan.name, status = ?status, duration_ms, "Run completed");

        Ok(RunResult {
            plan_id: plan_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            status,
            node_results,
            cancelled,
            note,
        })
    }
}

/// Run `plan` once against `adapter` without observers or cancellation.
pub async fn execute(
    plan_id: &str,
    plan: &ResolvedPlan,
    adapter: Arc<dyn HttpAdapter>,
) -> Result<RunResult> {
    PlanExecutor::new(adapter).run(plan_id, plan).await
}
