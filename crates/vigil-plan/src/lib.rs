//! Monitor plan schema, migration chain, templates, and validation.
//!
//! This crate owns everything about a plan before it is resolved: the typed
//! model for the current schema version, the version-to-version upgrade
//! chain, templated-string parsing, assertion path syntax, the adjacency
//! graph, the built-in lint rules, and discovery of plan files on disk.

pub mod graph;
pub mod loader;
pub mod migrate;
pub mod model;
pub mod path;
pub mod template;
pub mod validation;

pub use graph::PlanGraph;
pub use loader::{
    discover_plans, exports, load_plan_file, load_project, PlanDefinition, DEFAULT_EXPORT,
    PLAN_FILE_GLOB,
};
pub use migrate::{detect_version, migrate_to_latest};
pub use model::{
    Assertion, BinaryOp, Edge, Frequency, FrequencyUnit, HttpMethod, Node, Operand, Plan,
    PlanIdentity, Predicate, ResponseFormat, UnaryOp, CURRENT_VERSION, DEFAULT_TIMEOUT_MS, END,
    START,
};
pub use path::{AssertionPath, JsonPath, JsonSegment, XmlPath, XmlStep};
pub use template::{Segment, SecretRef, Template, VariableRef};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
