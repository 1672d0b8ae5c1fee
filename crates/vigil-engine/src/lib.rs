//! Plan execution and assertion evaluation.
//!
//! [`PlanExecutor`] walks a [`vigil_resolve::ResolvedPlan`] node by node
//! through an [`vigil_http::HttpAdapter`], extracts values from each response
//! and evaluates the node's predicates. The verdict is a
//! [`vigil_types::RunResult`].

pub mod assertion;
pub mod events;
pub mod executor;
pub mod extract;

pub use assertion::{evaluate, loosely_equal, to_number, Evaluation};
pub use events::{EventEmitter, RunEvent};
pub use executor::{execute, join_url, PlanExecutor};
pub use extract::{ExtractError, ResponseView};
