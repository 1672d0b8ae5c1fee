//! Typed plan model for the current schema version.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::template::Template;

/// Schema version produced by [`crate::migrate_to_latest`].
pub const CURRENT_VERSION: u32 = 3;

/// Sentinel edge endpoint marking where execution begins.
pub const START: &str = "START";
/// Sentinel edge endpoint marking where execution ends.
pub const END: &str = "END";

/// Request timeout applied when a plan does not set `timeoutMs`.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub version: u32,
    pub name: String,
    pub project: String,
    pub environment: String,
    pub frequency: Frequency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Plan {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn identity(&self) -> PlanIdentity {
        PlanIdentity {
            project: self.project.clone(),
            environment: self.environment.clone(),
            name: self.name.clone(),
        }
    }
}

/// The `(project, environment, name)` triple that maps to a stable plan id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanIdentity {
    pub project: String,
    pub environment: String,
    pub name: String,
}

impl fmt::Display for PlanIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.environment, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub method: HttpMethod,
    pub target_ref: String,
    pub path: Template,
    #[serde(default)]
    pub headers: BTreeMap<String, Template>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Template>,
    #[serde(default)]
    pub response_format: ResponseFormat,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Json,
    Xml,
    Text,
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

/// A predicate evaluated against a value extracted from a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum Assertion {
    Json { path: String, predicate: Predicate },
    Xml { path: String, predicate: Predicate },
    Text { path: String, predicate: Predicate },
}

impl Assertion {
    pub fn format(&self) -> ResponseFormat {
        match self {
            Assertion::Json { .. } => ResponseFormat::Json,
            Assertion::Xml { .. } => ResponseFormat::Xml,
            Assertion::Text { .. } => ResponseFormat::Text,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Assertion::Json { path, .. } | Assertion::Xml { path, .. } | Assertion::Text { path, .. } => {
                path
            }
        }
    }

    pub fn predicate(&self) -> &Predicate {
        match self {
            Assertion::Json { predicate, .. }
            | Assertion::Xml { predicate, .. }
            | Assertion::Text { predicate, .. } => predicate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Exists,
    NotExists,
    IsEmpty,
    IsNotEmpty,
    IsNull,
    IsNotNull,
}

impl UnaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            UnaryOp::Exists => "exists",
            UnaryOp::NotExists => "notExists",
            UnaryOp::IsEmpty => "isEmpty",
            UnaryOp::IsNotEmpty => "isNotEmpty",
            UnaryOp::IsNull => "isNull",
            UnaryOp::IsNotNull => "isNotNull",
        }
    }

    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "exists" => UnaryOp::Exists,
            "notExists" => UnaryOp::NotExists,
            "isEmpty" => UnaryOp::IsEmpty,
            "isNotEmpty" => UnaryOp::IsNotEmpty,
            "isNull" => UnaryOp::IsNull,
            "isNotNull" => UnaryOp::IsNotNull,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Matches,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Equals => "equals",
            BinaryOp::NotEquals => "notEquals",
            BinaryOp::Contains => "contains",
            BinaryOp::NotContains => "notContains",
            BinaryOp::GreaterThan => "greaterThan",
            BinaryOp::GreaterThanOrEqual => "greaterThanOrEqual",
            BinaryOp::LessThan => "lessThan",
            BinaryOp::LessThanOrEqual => "lessThanOrEqual",
            BinaryOp::Matches => "matches",
        }
    }

    /// Ordering predicates coerce both sides to numbers.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
        )
    }

    fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "equals" => BinaryOp::Equals,
            "notEquals" => BinaryOp::NotEquals,
            "contains" => BinaryOp::Contains,
            "notContains" => BinaryOp::NotContains,
            "greaterThan" => BinaryOp::GreaterThan,
            "greaterThanOrEqual" => BinaryOp::GreaterThanOrEqual,
            "lessThan" => BinaryOp::LessThan,
            "lessThanOrEqual" => BinaryOp::LessThanOrEqual,
            "matches" => BinaryOp::Matches,
            _ => return None,
        })
    }
}

/// Unary predicates take no operand; binary predicates compare against one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPredicate", into = "RawPredicate")]
pub enum Predicate {
    Unary(UnaryOp),
    Binary(BinaryOp, Operand),
}

impl Predicate {
    pub fn op_name(&self) -> &'static str {
        match self {
            Predicate::Unary(op) => op.as_str(),
            Predicate::Binary(op, _) => op.as_str(),
        }
    }

    pub fn operand(&self) -> Option<&Operand> {
        match self {
            Predicate::Unary(_) => None,
            Predicate::Binary(_, operand) => Some(operand),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct RawPredicate {
    op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    operand: Option<Operand>,
}

impl TryFrom<RawPredicate> for Predicate {
    type Error = String;

    fn try_from(raw: RawPredicate) -> std::result::Result<Self, Self::Error> {
        if let Some(op) = UnaryOp::parse(&raw.op) {
            if raw.operand.is_some() {
                return Err(format!("predicate '{}' takes no operand", raw.op));
            }
            return Ok(Predicate::Unary(op));
        }
        if let Some(op) = BinaryOp::parse(&raw.op) {
            return match raw.operand {
                Some(operand) => Ok(Predicate::Binary(op, operand)),
                None => Err(format!("predicate '{}' requires an operand", raw.op)),
            };
        }
        Err(format!("unknown predicate '{}'", raw.op))
    }
}

impl From<Predicate> for RawPredicate {
    fn from(p: Predicate) -> Self {
        match p {
            Predicate::Unary(op) => RawPredicate {
                op: op.as_str().to_string(),
                operand: None,
            },
            Predicate::Binary(op, operand) => RawPredicate {
                op: op.as_str().to_string(),
                operand: Some(operand),
            },
        }
    }
}

/// Right-hand side of a binary predicate. Strings are templated; every other
/// JSON value is taken literally.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Text(Template),
    Value(serde_json::Value),
}

impl Serialize for Operand {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Operand::Text(t) => t.serialize(serializer),
            Operand::Value(v) => v.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Operand {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::String(s) => Template::parse(&s)
                .map(Operand::Text)
                .map_err(serde::de::Error::custom),
            other => Ok(Operand::Value(other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Frequency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyUnit {
    Minute,
    Hour,
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Frequency {
    pub every: u32,
    pub unit: FrequencyUnit,
}

impl Frequency {
    pub fn minutes(every: u32) -> Self {
        Self {
            every,
            unit: FrequencyUnit::Minute,
        }
    }

    /// Length of one scheduling window.
    pub fn period(&self) -> chrono::Duration {
        let n = i64::from(self.every);
        match self.unit {
            FrequencyUnit::Minute => chrono::Duration::minutes(n),
            FrequencyUnit::Hour => chrono::Duration::hours(n),
            FrequencyUnit::Day => chrono::Duration::days(n),
        }
    }

    /// Parse the legacy shorthand `"<n>m"`, `"<n>h"`, `"<n>d"`.
    pub fn parse_shorthand(s: &str) -> Option<Self> {
        let s = s.trim();
        let (digits, unit) = s.split_at(s.len().checked_sub(1)?);
        let every: u32 = digits.parse().ok()?;
        let unit = match unit {
            "m" => FrequencyUnit::Minute,
            "h" => FrequencyUnit::Hour,
            "d" => FrequencyUnit::Day,
            _ => return None,
        };
        Some(Self { every, unit })
    }
}
