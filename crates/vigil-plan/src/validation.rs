//! Plan validation: lint rules and diagnostics.
//!
//! Rules check the structural shape of the graph (unique ids, known
//! endpoints, a single chain from `START` to `END`, no cycles) and the
//! semantic content of nodes (assertion paths, regex operands, frequency).
//! Call [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail
//! on any `Error`-severity issue.

use std::collections::HashSet;
use std::fmt;

use regex::Regex;

use vigil_types::{Result, VigilError};

use crate::graph::PlanGraph;
use crate::model::{BinaryOp, Operand, Plan, Predicate, END, START};
use crate::path::AssertionPath;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub edge: Option<(String, String)>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("ERROR"),
            Severity::Warning => f.write_str("WARN"),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.rule, self.message)
    }
}

impl Diagnostic {
    fn error(rule: &str, message: String) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Error,
            message,
            node_id: None,
            edge: None,
            fix: None,
        }
    }

    fn warning(rule: &str, message: String) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, message)
        }
    }

    fn at_node(mut self, id: &str) -> Self {
        self.node_id = Some(id.to_string());
        self
    }

    fn at_edge(mut self, from: &str, to: &str) -> Self {
        self.edge = Some((from.to_string(), to.to_string()));
        self
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, plan: &Plan, graph: &PlanGraph) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Structural rules
// ---------------------------------------------------------------------------

struct UniqueIdsRule;
impl LintRule for UniqueIdsRule {
    fn name(&self) -> &str { "unique_ids" }
    fn apply(&self, plan: &Plan, _graph: &PlanGraph) -> Vec<Diagnostic> {
        let mut seen = HashSet::new();
        let mut diags = Vec::new();
        for node in &plan.nodes {
            if node.id == START || node.id == END {
                diags.push(
                    Diagnostic::error(self.name(), format!("Node id '{}' is reserved", node.id))
                        .at_node(&node.id)
                        .with_fix("Rename the node; START and END are sentinels"),
                );
            } else if node.id.trim().is_empty() {
                diags.push(
                    Diagnostic::error(self.name(), "Node id is empty".into())
                        .with_fix("Give every node a non-empty id"),
                );
            } else if !seen.insert(node.id.as_str()) {
                diags.push(
                    Diagnostic::error(self.name(), format!("Duplicate node id '{}'", node.id))
                        .at_node(&node.id)
                        .with_fix("Node ids must be unique within a plan"),
                );
            }
        }
        diags
    }
}

struct EdgeEndpointsRule;
impl LintRule for EdgeEndpointsRule {
    fn name(&self) -> &str { "edge_endpoints_exist" }
    fn apply(&self, _plan: &Plan, graph: &PlanGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for e in graph.all_edges() {
            for endpoint in [&e.from, &e.to] {
                if !graph.contains(endpoint) {
                    diags.push(
                        Diagnostic::error(
                            self.name(),
                            format!("Edge {} -> {} references unknown node '{endpoint}'", e.from, e.to),
                        )
                        .at_edge(&e.from, &e.to)
                        .with_fix(format!("Add node '{endpoint}' or fix the edge")),
                    );
                }
            }
            if e.to == START || e.from == END {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!("Edge {} -> {} points the wrong way through a sentinel", e.from, e.to),
                    )
                    .at_edge(&e.from, &e.to)
                    .with_fix("START only has outgoing edges and END only incoming ones"),
                );
            }
        }
        diags
    }
}

struct StartSuccessorRule;
impl LintRule for StartSuccessorRule {
    fn name(&self) -> &str { "start_successor" }
    fn apply(&self, _plan: &Plan, graph: &PlanGraph) -> Vec<Diagnostic> {
        match graph.outgoing_edges(START).len() {
            1 => vec![],
            0 => vec![Diagnostic::error(self.name(), "Plan has no edge leaving START".into())
                .with_fix("Add an edge from START to the first node")],
            n => vec![Diagnostic::error(
                self.name(),
                format!("START has {n} successors; expected exactly one"),
            )
            .with_fix("Chain the nodes so START leads to a single first node")],
        }
    }
}

struct EndPredecessorRule;
impl LintRule for EndPredecessorRule {
    fn name(&self) -> &str { "end_predecessor" }
    fn apply(&self, _plan: &Plan, graph: &PlanGraph) -> Vec<Diagnostic> {
        match graph.incoming_count(END) {
            1 => vec![],
            0 => vec![Diagnostic::error(self.name(), "No edge reaches END".into())
                .with_fix("Add an edge from the last node to END")],
            n => vec![Diagnostic::error(
                self.name(),
                format!("{n} edges reach END; exactly one path may reach END"),
            )
            .with_fix("Remove extra edges into END")],
        }
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str { "reachability" }
    fn apply(&self, _plan: &Plan, graph: &PlanGraph) -> Vec<Diagnostic> {
        let visited = graph.reachable_from_start();
        graph
            .node_ids()
            .iter()
            .filter(|id| !visited.contains(*id))
            .map(|id| {
                Diagnostic::error(self.name(), format!("Node '{id}' is not reachable from START"))
                    .at_node(id)
                    .with_fix(format!("Add an edge leading to '{id}' or remove it"))
            })
            .collect()
    }
}

struct AcyclicRule;
impl LintRule for AcyclicRule {
    fn name(&self) -> &str { "acyclic" }
    fn apply(&self, _plan: &Plan, graph: &PlanGraph) -> Vec<Diagnostic> {
        match graph.find_cycle() {
            None => vec![],
            Some(cycle) => {
                let first = cycle.first().cloned().unwrap_or_default();
                vec![Diagnostic::error(
                    self.name(),
                    format!("Cycle detected: {}", cycle.join(" -> ")),
                )
                .at_node(&first)
                .with_fix("Plans are chains; remove the edge that loops back")]
            }
        }
    }
}

struct LinearChainRule;
impl LintRule for LinearChainRule {
    fn name(&self) -> &str { "linear_chain" }
    fn apply(&self, _plan: &Plan, graph: &PlanGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for id in graph.node_ids() {
            let out = graph.outgoing_edges(id).len();
            let inc = graph.incoming_count(id);
            if out == 0 {
                diags.push(
                    Diagnostic::error(self.name(), format!("Node '{id}' does not lead to END"))
                        .at_node(id)
                        .with_fix(format!("Add an edge from '{id}' to the next node or END")),
                );
            } else if out > 1 {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!("Node '{id}' branches to {out} successors"),
                    )
                    .at_node(id)
                    .with_fix("Branching is not supported; keep a single outgoing edge"),
                );
            }
            if inc > 1 {
                diags.push(
                    Diagnostic::error(
                        self.name(),
                        format!("Node '{id}' is entered by {inc} edges"),
                    )
                    .at_node(id)
                    .with_fix("Keep a single incoming edge per node"),
                );
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Content rules
// ---------------------------------------------------------------------------

struct TargetRefRule;
impl LintRule for TargetRefRule {
    fn name(&self) -> &str { "target_ref" }
    fn apply(&self, plan: &Plan, _graph: &PlanGraph) -> Vec<Diagnostic> {
        plan.nodes
            .iter()
            .filter(|n| n.target_ref.trim().is_empty())
            .map(|n| {
                Diagnostic::error(self.name(), format!("Node '{}' has an empty targetRef", n.id))
                    .at_node(&n.id)
                    .with_fix("Name an entry in the environment's targets")
            })
            .collect()
    }
}

struct AssertionPathRule;
impl LintRule for AssertionPathRule {
    fn name(&self) -> &str { "assertion_path" }
    fn apply(&self, plan: &Plan, _graph: &PlanGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for node in &plan.nodes {
            for a in &node.assertions {
                if let Err(err) = AssertionPath::parse(a.format(), a.path()) {
                    diags.push(
                        Diagnostic::error(
                            self.name(),
                            format!("Node '{}' assertion path '{}': {err}", node.id, a.path()),
                        )
                        .at_node(&node.id),
                    );
                }
            }
        }
        diags
    }
}

struct MatchesPatternRule;
impl LintRule for MatchesPatternRule {
    fn name(&self) -> &str { "matches_pattern" }
    fn apply(&self, plan: &Plan, _graph: &PlanGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for node in &plan.nodes {
            for a in &node.assertions {
                let Predicate::Binary(BinaryOp::Matches, operand) = a.predicate() else {
                    continue;
                };
                match operand {
                    // Templated patterns are only known after resolution.
                    Operand::Text(t) if !t.is_literal() => {}
                    Operand::Text(t) => {
                        let pattern = t.to_string();
                        if let Err(err) = Regex::new(&pattern) {
                            diags.push(
                                Diagnostic::error(
                                    self.name(),
                                    format!("Node '{}' has invalid pattern '{pattern}': {err}", node.id),
                                )
                                .at_node(&node.id),
                            );
                        }
                    }
                    Operand::Value(v) => diags.push(
                        Diagnostic::error(
                            self.name(),
                            format!("Node '{}' uses 'matches' with non-string operand {v}", node.id),
                        )
                        .at_node(&node.id)
                        .with_fix("Give 'matches' a regular expression string"),
                    ),
                }
            }
        }
        diags
    }
}

struct FrequencyRule;
impl LintRule for FrequencyRule {
    fn name(&self) -> &str { "frequency" }
    fn apply(&self, plan: &Plan, _graph: &PlanGraph) -> Vec<Diagnostic> {
        if plan.frequency.every >= 1 {
            return vec![];
        }
        vec![Diagnostic::error(self.name(), "Frequency 'every' must be at least 1".into())
            .with_fix("Set frequency.every to a positive integer")]
    }
}

struct TimeoutRule;
impl LintRule for TimeoutRule {
    fn name(&self) -> &str { "timeout" }
    fn apply(&self, plan: &Plan, _graph: &PlanGraph) -> Vec<Diagnostic> {
        match plan.timeout_ms {
            Some(0) => vec![Diagnostic::warning(
                self.name(),
                "timeoutMs is 0; every request will time out immediately".into(),
            )
            .with_fix("Remove timeoutMs to use the default or set a positive value")],
            _ => vec![],
        }
    }
}

struct HasAssertionsRule;
impl LintRule for HasAssertionsRule {
    fn name(&self) -> &str { "has_assertions" }
    fn apply(&self, plan: &Plan, _graph: &PlanGraph) -> Vec<Diagnostic> {
        plan.nodes
            .iter()
            .filter(|n| n.assertions.is_empty())
            .map(|n| {
                Diagnostic::warning(self.name(), format!("Node '{}' has no assertions", n.id))
                    .at_node(&n.id)
                    .with_fix("Add at least a `status` assertion")
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn builtin_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(UniqueIdsRule),
        Box::new(EdgeEndpointsRule),
        Box::new(StartSuccessorRule),
        Box::new(EndPredecessorRule),
        Box::new(ReachabilityRule),
        Box::new(AcyclicRule),
        Box::new(LinearChainRule),
        Box::new(TargetRefRule),
        Box::new(AssertionPathRule),
        Box::new(MatchesPatternRule),
        Box::new(FrequencyRule),
        Box::new(TimeoutRule),
        Box::new(HasAssertionsRule),
    ]
}

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(plan: &Plan) -> Vec<Diagnostic> {
    let graph = PlanGraph::build(plan);
    let mut diagnostics = Vec::new();
    for rule in &builtin_rules() {
        diagnostics.extend(rule.apply(plan, &graph));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(plan: &Plan) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(plan);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(VigilError::schema(
            format!("plan '{}'", plan.name),
            errors.join("; "),
        ));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
