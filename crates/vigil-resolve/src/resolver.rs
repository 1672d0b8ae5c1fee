//! Binding a plan to an environment.
//!
//! Resolution is all-or-nothing. Targets and variables are checked before any
//! secret is fetched, every distinct secret is fetched once, and only then is
//! the [`ResolvedPlan`] built. Its string fields are plain `String`s, so a
//! resolved plan cannot carry a placeholder.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_plan::{
    Assertion, BinaryOp, Edge, HttpMethod, Node, Operand, Plan, Predicate, ResponseFormat,
    SecretRef, Segment, Template, UnaryOp,
};
use vigil_types::{Result, VigilError};

use crate::provider::SecretRegistry;

/// Variables and base URLs configured for one environment of a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            variables: Value::Object(Default::default()),
            targets: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, name: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.targets.insert(name.into(), base_url.into());
        self
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = variables;
        self
    }

    /// Look up a dot-path such as `account.ids.0` in the variable map.
    pub fn variable(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.variables, |current, key| match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }
}

// ---------------------------------------------------------------------------
// Resolved plan
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedPredicate {
    Unary(UnaryOp),
    Binary(BinaryOp, Value),
}

impl ResolvedPredicate {
    pub fn op_name(&self) -> &'static str {
        match self {
            ResolvedPredicate::Unary(op) => op.as_str(),
            ResolvedPredicate::Binary(op, _) => op.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAssertion {
    pub format: ResponseFormat,
    pub path: String,
    pub predicate: ResolvedPredicate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNode {
    pub id: String,
    pub method: HttpMethod,
    pub target_ref: String,
    pub base_url: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub response_format: ResponseFormat,
    pub assertions: Vec<ResolvedAssertion>,
}

/// A plan bound to one environment with every placeholder substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlan {
    pub name: String,
    pub project: String,
    pub environment: String,
    pub timeout: Duration,
    pub nodes: Vec<ResolvedNode>,
    pub edges: Vec<Edge>,
}

impl ResolvedPlan {
    pub fn node(&self, id: &str) -> Option<&ResolvedNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// A template and where it sits in the plan, for error context.
struct Site<'p> {
    location: String,
    template: &'p Template,
}

fn node_sites(node: &Node) -> Vec<Site<'_>> {
    let mut sites = vec![Site {
        location: format!("node '{}' path", node.id),
        template: &node.path,
    }];
    for (name, value) in &node.headers {
        sites.push(Site {
            location: format!("node '{}' header '{name}'", node.id),
            template: value,
        });
    }
    if let Some(body) = &node.body {
        sites.push(Site {
            location: format!("node '{}' body", node.id),
            template: body,
        });
    }
    for (i, a) in node.assertions.iter().enumerate() {
        if let Some(Operand::Text(t)) = a.predicate().operand() {
            sites.push(Site {
                location: format!("node '{}' assertion {i} operand", node.id),
                template: t,
            });
        }
    }
    sites
}

fn variable_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render(
    template: &Template,
    env: &Environment,
    secrets: &HashMap<SecretRef, String>,
    location: &str,
) -> Result<String> {
    let mut out = String::new();
    for seg in template.segments() {
        match seg {
            Segment::Literal(text) => out.push_str(text),
            Segment::Variable(v) => {
                let value = env.variable(&v.path).ok_or_else(|| VigilError::MissingVariable {
                    path: v.path.clone(),
                    location: location.to_string(),
                })?;
                out.push_str(&variable_text(value));
            }
            Segment::Secret(s) => {
                let value = secrets.get(s).ok_or_else(|| VigilError::SecretNotFound {
                    reference: s.to_string(),
                })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}

fn resolve_assertion(
    assertion: &Assertion,
    env: &Environment,
    secrets: &HashMap<SecretRef, String>,
    location: &str,
) -> Result<ResolvedAssertion> {
    let predicate = match assertion.predicate() {
        Predicate::Unary(op) => ResolvedPredicate::Unary(*op),
        Predicate::Binary(op, Operand::Value(v)) => {
            ResolvedPredicate::Binary(*op, v.clone())
        }
        Predicate::Binary(op, Operand::Text(t)) => {
            ResolvedPredicate::Binary(*op, Value::String(render(t, env, secrets, location)?))
        }
    };
    Ok(ResolvedAssertion {
        format: assertion.format(),
        path: assertion.path().to_string(),
        predicate,
    })
}

/// Bind `plan` to `env`, substituting every variable and secret.
pub async fn resolve(
    plan: &Plan,
    env: &Environment,
    registry: &SecretRegistry,
) -> Result<ResolvedPlan> {
    // Pass 1: targets and variables. No side effects yet.
    let mut wanted: BTreeSet<SecretRef> = BTreeSet::new();
    for node in &plan.nodes {
        if !env.targets.contains_key(&node.target_ref) {
            return Err(VigilError::UnknownTarget {
                node: node.id.clone(),
                target: node.target_ref.clone(),
            });
        }
        for site in node_sites(node) {
            for v in site.template.variables() {
                if env.variable(&v.path).is_none() {
                    return Err(VigilError::MissingVariable {
                        path: v.path.clone(),
                        location: site.location,
                    });
                }
            }
            wanted.extend(site.template.secrets().cloned());
        }
    }

    // Pass 2: each distinct secret once.
    tracing::debug!(plan = %plan.name, env = %env.name, secrets = wanted.len(), "resolving secrets");
    let mut secrets = HashMap::with_capacity(wanted.len());
    for secret in wanted {
        let value = registry.fetch(&secret).await?;
        secrets.insert(secret, value);
    }

    // Pass 3: build the resolved plan.
    let mut nodes = Vec::with_capacity(plan.nodes.len());
    for node in &plan.nodes {
        let base_url = env.targets.get(&node.target_ref).cloned().ok_or_else(|| {
            VigilError::UnknownTarget {
                node: node.id.clone(),
                target: node.target_ref.clone(),
            }
        })?;
        let path = render(&node.path, env, &secrets, &format!("node '{}' path", node.id))?;
        let mut headers = BTreeMap::new();
        for (name, value) in &node.headers {
            let location = format!("node '{}' header '{name}'", node.id);
            headers.insert(name.clone(), render(value, env, &secrets, &location)?);
        }
        let body = match &node.body {
            Some(b) => Some(render(b, env, &secrets, &format!("node '{}' body", node.id))?),
            None => None,
        };
        let assertions = node
            .assertions
            .iter()
            .enumerate()
            .map(|(i, a)| {
                resolve_assertion(a, env, &secrets, &format!("node '{}' assertion {i} operand", node.id))
            })
            .collect::<Result<Vec<_>>>()?;

        nodes.push(ResolvedNode {
            id: node.id.clone(),
            method: node.method,
            target_ref: node.target_ref.clone(),
            base_url,
            path,
            headers,
            body,
            response_format: node.response_format,
            assertions,
        });
    }

    tracing::info!(plan = %plan.name, env = %env.name, nodes = nodes.len(), "plan resolved");
    Ok(ResolvedPlan {
        name: plan.name.clone(),
        project: plan.project.clone(),
        environment: env.name.clone(),
        timeout: plan.timeout(),
        nodes,
        edges: plan.edges.clone(),
    })
}
