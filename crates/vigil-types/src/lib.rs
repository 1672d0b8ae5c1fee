//! Shared types, errors, and run/job records for the Vigil monitor engine.
//!
//! This crate provides the foundational types used across all other Vigil crates:
//! - `VigilError`: unified error taxonomy
//! - `RunResult` / `NodeResult` / `AssertionResult`: the verdict of one run
//! - `Job`: one scheduled or queued invocation of a run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// NetworkFailure
// ---------------------------------------------------------------------------

/// Classified failure of a single HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NetworkFailure {
    #[error("connection refused: {message}")]
    ConnectionRefused { message: String },

    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP status {status}")]
    HttpStatusError { status: u16 },

    /// The request could not be built: malformed URL, header name or value.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl NetworkFailure {
    /// Transport-level failures and server-side statuses may clear up on their own.
    pub fn is_transient(&self) -> bool {
        match self {
            NetworkFailure::ConnectionRefused { .. } | NetworkFailure::Timeout { .. } => true,
            NetworkFailure::HttpStatusError { status } => *status >= 500 || *status == 429,
            NetworkFailure::InvalidRequest { .. } => false,
        }
    }
}

// ---------------------------------------------------------------------------
// VigilError
// ---------------------------------------------------------------------------

/// Unified error type for all Vigil subsystems.
#[derive(Debug, thiserror::Error)]
pub enum VigilError {
    // === Schema & Migration ===
    #[error("Schema error in {context}: {message}")]
    SchemaError { context: String, message: String },

    // === Resolution ===
    #[error("Missing variable '{path}' referenced by {location}")]
    MissingVariable { path: String, location: String },

    #[error("Node '{node}' references unknown target '{target}'")]
    UnknownTarget { node: String, target: String },

    #[error("Secret '{reference}' not found")]
    SecretNotFound { reference: String },

    #[error("Secret provider '{provider}' unavailable for '{reference}': {message}")]
    ProviderUnavailable {
        provider: String,
        reference: String,
        message: String,
    },

    // === Execution ===
    #[error("Request for node '{node}' failed: {failure}")]
    NetworkError { node: String, failure: NetworkFailure },

    #[error("No stub matched {method} {url}")]
    NoStubMatched { method: String, url: String },

    // === Sync & Storage ===
    #[error("Sync of plan '{plan}' failed: {message}")]
    SyncConflict { plan: String, message: String },

    #[error("State lock {path} is held by {holder}; delete it if no sync is running")]
    StateLocked { path: String, holder: String },

    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl VigilError {
    /// Shorthand for a [`VigilError::SchemaError`].
    pub fn schema(context: impl Into<String>, message: impl Into<String>) -> Self {
        VigilError::SchemaError {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            VigilError::NetworkError { failure, .. } => failure.is_transient(),
            VigilError::ProviderUnavailable { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            VigilError::SchemaError { .. }
                | VigilError::MissingVariable { .. }
                | VigilError::UnknownTarget { .. }
                | VigilError::SecretNotFound { .. }
                | VigilError::NoStubMatched { .. }
        )
    }

    /// Maps the error to an HTTP status code for the service facade.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            VigilError::SchemaError { .. }
            | VigilError::MissingVariable { .. }
            | VigilError::UnknownTarget { .. }
            | VigilError::Json(_) => Some(400),
            VigilError::NotFound { .. } => Some(404),
            VigilError::SyncConflict { .. } | VigilError::StateLocked { .. } => Some(409),
            VigilError::ProviderUnavailable { .. } => Some(503),
            VigilError::NetworkError {
                failure: NetworkFailure::Timeout { .. },
                ..
            } => Some(504),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, VigilError>`.
pub type Result<T> = std::result::Result<T, VigilError>;

// ---------------------------------------------------------------------------
// Run results
// ---------------------------------------------------------------------------

/// Verdict of a whole run. Also used per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    Error,
}

/// Outcome of evaluating one assertion against a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub path: String,
    pub predicate: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Record of one executed node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    pub node_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    pub assertions: Vec<AssertionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<NetworkFailure>,
}

impl NodeResult {
    /// Number of assertions on this node that did not hold.
    pub fn failed_assertions(&self) -> usize {
        self.assertions.iter().filter(|a| !a.passed).count()
    }
}

/// The verdict of one execution of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub plan_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub node_results: Vec<NodeResult>,
    /// Stopped between nodes by a cancellation request.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    /// Why the run stopped early, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl RunResult {
    /// Aggregate node verdicts: `error` wins over `failed`, which wins over `passed`.
    pub fn aggregate(node_results: &[NodeResult]) -> RunStatus {
        if node_results.iter().any(|n| n.status == RunStatus::Error) {
            RunStatus::Error
        } else if node_results.iter().any(|n| n.status == RunStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        }
    }

    /// The network failure that stopped this run, if any.
    pub fn network_failure(&self) -> Option<&NetworkFailure> {
        self.node_results.iter().find_map(|n| n.error.as_ref())
    }

    /// An `error` run caused by a failure that may clear up on its own.
    pub fn is_transient_error(&self) -> bool {
        self.status == RunStatus::Error
            && !self.cancelled
            && self.network_failure().is_some_and(NetworkFailure::is_transient)
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

/// One scheduled or queued invocation of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub plan_id: String,
    pub environment: String,
    pub status: JobStatus,
    pub enqueued_at: DateTime<Utc>,
    /// Start of the frequency window this job was enqueued for.
    pub scheduled_for: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Job {
    /// Create a pending job for `plan_id` in `environment`.
    pub fn pending(
        plan_id: impl Into<String>,
        environment: impl Into<String>,
        scheduled_for: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            plan_id: plan_id.into(),
            environment: environment.into(),
            status: JobStatus::Pending,
            enqueued_at: Utc::now(),
            scheduled_for,
            started_at: None,
            finished_at: None,
            attempt: 0,
            last_error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.attempt += 1;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_finished(&mut self, status: JobStatus, error: Option<String>) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.last_error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_schema() {
        let err = VigilError::schema("plan 'checkout' v7", "unsupported future version");
        assert_eq!(
            err.to_string(),
            "Schema error in plan 'checkout' v7: unsupported future version"
        );
    }

    #[test]
    fn error_display_missing_variable() {
        let err = VigilError::MissingVariable {
            path: "api.user".into(),
            location: "node 'login' header 'X-User'".into(),
        };
        assert_eq!(
            err.to_string(),
            "Missing variable 'api.user' referenced by node 'login' header 'X-User'"
        );
    }

    #[test]
    fn error_display_network() {
        let err = VigilError::NetworkError {
            node: "health".into(),
            failure: NetworkFailure::Timeout { timeout_ms: 5000 },
        };
        assert_eq!(
            err.to_string(),
            "Request for node 'health' failed: timed out after 5000ms"
        );
    }

    #[test]
    fn error_display_no_stub() {
        let err = VigilError::NoStubMatched {
            method: "GET".into(),
            url: "http://x/y".into(),
        };
        assert_eq!(err.to_string(), "No stub matched GET http://x/y");
    }

    // --- is_retryable ---

    #[test]
    fn retryable_connection_refused() {
        let err = VigilError::NetworkError {
            node: "a".into(),
            failure: NetworkFailure::ConnectionRefused {
                message: "refused".into(),
            },
        };
        assert!(err.is_retryable());
        assert!(!err.is_terminal());
    }

    #[test]
    fn retryable_server_status_but_not_client_status() {
        let server = VigilError::NetworkError {
            node: "a".into(),
            failure: NetworkFailure::HttpStatusError { status: 503 },
        };
        let client = VigilError::NetworkError {
            node: "a".into(),
            failure: NetworkFailure::HttpStatusError { status: 404 },
        };
        assert!(server.is_retryable());
        assert!(!client.is_retryable());
    }

    #[test]
    fn invalid_request_is_not_retryable() {
        let err = VigilError::NetworkError {
            node: "a".into(),
            failure: NetworkFailure::InvalidRequest {
                message: "relative URL without a base".into(),
            },
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn retryable_provider_unavailable() {
        let err = VigilError::ProviderUnavailable {
            provider: "vault".into(),
            reference: "vault:kv/app#token".into(),
            message: "timed out".into(),
        };
        assert!(err.is_retryable());
    }

    #[test]
    fn terminal_resolution_errors() {
        assert!(VigilError::SecretNotFound {
            reference: "env:NOPE".into()
        }
        .is_terminal());
        assert!(VigilError::MissingVariable {
            path: "x".into(),
            location: "node 'a' path".into()
        }
        .is_terminal());
        assert!(VigilError::schema("plan", "bad").is_terminal());
    }

    // --- http_status ---

    #[test]
    fn http_status_mapping() {
        assert_eq!(VigilError::schema("p", "m").http_status(), Some(400));
        assert_eq!(
            VigilError::NotFound {
                kind: "plan".into(),
                id: "x".into()
            }
            .http_status(),
            Some(404)
        );
        assert_eq!(VigilError::Other("boom".into()).http_status(), None);
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VigilError = io_err.into();
        assert!(matches!(err, VigilError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    // --- RunResult ---

    fn node(id: &str, status: RunStatus) -> NodeResult {
        NodeResult {
            node_id: id.into(),
            status,
            http_status: Some(200),
            duration_ms: 1,
            assertions: vec![],
            error: None,
        }
    }

    #[test]
    fn aggregate_prefers_error_then_failed() {
        assert_eq!(RunResult::aggregate(&[]), RunStatus::Passed);
        assert_eq!(
            RunResult::aggregate(&[node("a", RunStatus::Passed), node("b", RunStatus::Failed)]),
            RunStatus::Failed
        );
        assert_eq!(
            RunResult::aggregate(&[node("a", RunStatus::Failed), node("b", RunStatus::Error)]),
            RunStatus::Error
        );
    }

    #[test]
    fn transient_error_needs_transient_failure() {
        let mut failed = node("a", RunStatus::Error);
        failed.error = Some(NetworkFailure::HttpStatusError { status: 502 });
        let mut run = RunResult {
            plan_id: "p".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            status: RunStatus::Error,
            node_results: vec![failed],
            cancelled: false,
            note: None,
        };
        assert!(run.is_transient_error());

        run.node_results[0].error = Some(NetworkFailure::HttpStatusError { status: 404 });
        assert!(!run.is_transient_error());

        run.node_results.clear();
        run.cancelled = true;
        assert!(!run.is_transient_error());
    }

    #[test]
    fn run_status_serializes_to_snake_case() {
        assert_eq!(serde_json::to_string(&RunStatus::Passed).unwrap(), "\"passed\"");
        assert_eq!(serde_json::to_string(&RunStatus::Error).unwrap(), "\"error\"");
        assert_eq!(serde_json::to_string(&JobStatus::Succeeded).unwrap(), "\"succeeded\"");
    }

    #[test]
    fn network_failure_serializes_with_kind_tag() {
        let json = serde_json::to_value(NetworkFailure::HttpStatusError { status: 502 }).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "http_status_error", "status": 502}));
    }

    // --- Job ---

    #[test]
    fn job_lifecycle_transitions() {
        let mut job = Job::pending("plan-1", "prod", Utc::now());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt, 0);

        job.mark_running();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.attempt, 1);
        assert!(job.started_at.is_some());

        job.mark_finished(JobStatus::Failed, Some("assertion mismatch".into()));
        assert!(job.status.is_finished());
        assert_eq!(job.last_error.as_deref(), Some("assertion mismatch"));
    }
}
