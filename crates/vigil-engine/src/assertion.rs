//! Predicate evaluation.
//!
//! Coercion is symmetric. Ordering predicates convert both sides with
//! [`to_number`] and fail the assertion when either side is not numeric.
//! `equals`/`notEquals` compare numerically when both sides are numeric,
//! otherwise structurally, with a string against a scalar compared by the
//! scalar's rendering. Binary predicates never hold on an absent value.

use regex::Regex;
use serde_json::Value;

use vigil_plan::{BinaryOp, UnaryOp};
use vigil_resolve::ResolvedPredicate;

/// Whether one predicate held, and why not when it did not.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub passed: bool,
    pub message: Option<String>,
}

impl Evaluation {
    fn pass() -> Self {
        Self {
            passed: true,
            message: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: Some(message.into()),
        }
    }

    fn check(passed: bool, message: impl FnOnce() -> String) -> Self {
        if passed {
            Self::pass()
        } else {
            Self::fail(message())
        }
    }
}

/// JSON numbers as-is; strings trimmed and parsed; anything else is not a number.
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Render a value for text comparison: strings bare, everything else as JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (to_number(a), to_number(b)) {
        return x == y;
    }
    match (a, b) {
        (Value::String(s), other) | (other, Value::String(s))
            if !matches!(other, Value::Array(_) | Value::Object(_)) =>
        {
            *s == render(other)
        }
        _ => a == b,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

pub fn evaluate(predicate: &ResolvedPredicate, actual: Option<&Value>) -> Evaluation {
    match predicate {
        ResolvedPredicate::Unary(op) => evaluate_unary(*op, actual),
        ResolvedPredicate::Binary(op, expected) => match actual {
            None => Evaluation::fail("no value at path"),
            Some(actual) => evaluate_binary(*op, actual, expected),
        },
    }
}

fn evaluate_unary(op: UnaryOp, actual: Option<&Value>) -> Evaluation {
    match op {
        UnaryOp::Exists => Evaluation::check(actual.is_some(), || "no value at path".into()),
        UnaryOp::NotExists => Evaluation::check(actual.is_none(), || "value is present".into()),
        UnaryOp::IsNull => Evaluation::check(actual == Some(&Value::Null), || {
            "value is not null".into()
        }),
        UnaryOp::IsNotNull => match actual {
            None => Evaluation::fail("no value at path"),
            Some(v) => Evaluation::check(!v.is_null(), || "value is null".into()),
        },
        UnaryOp::IsEmpty => match actual {
            None => Evaluation::fail("no value at path"),
            Some(v) => Evaluation::check(is_empty(v), || "value is not empty".into()),
        },
        UnaryOp::IsNotEmpty => match actual {
            None => Evaluation::fail("no value at path"),
            Some(v) => Evaluation::check(!is_empty(v), || "value is empty".into()),
        },
    }
}

fn evaluate_binary(op: BinaryOp, actual: &Value, expected: &Value) -> Evaluation {
    match op {
        BinaryOp::Equals => Evaluation::check(loosely_equal(actual, expected), || {
            format!("expected {expected}, got {actual}")
        }),
        BinaryOp::NotEquals => Evaluation::check(!loosely_equal(actual, expected), || {
            format!("expected anything but {expected}")
        }),
        BinaryOp::Contains => match contains(actual, expected) {
            Ok(found) => Evaluation::check(found, || format!("{actual} does not contain {expected}")),
            Err(message) => Evaluation::fail(message),
        },
        BinaryOp::NotContains => match contains(actual, expected) {
            Ok(found) => Evaluation::check(!found, || format!("{actual} contains {expected}")),
            Err(message) => Evaluation::fail(message),
        },
        BinaryOp::GreaterThan => compare(op, actual, expected, |a, b| a > b),
        BinaryOp::GreaterThanOrEqual => compare(op, actual, expected, |a, b| a >= b),
        BinaryOp::LessThan => compare(op, actual, expected, |a, b| a < b),
        BinaryOp::LessThanOrEqual => compare(op, actual, expected, |a, b| a <= b),
        BinaryOp::Matches => {
            let pattern = render(expected);
            match Regex::new(&pattern) {
                Ok(re) => Evaluation::check(re.is_match(&render(actual)), || {
                    format!("{actual} does not match /{pattern}/")
                }),
                Err(e) => Evaluation::fail(format!("invalid pattern /{pattern}/: {e}")),
            }
        }
    }
}

fn contains(actual: &Value, expected: &Value) -> Result<bool, String> {
    match actual {
        Value::String(s) => Ok(s.contains(render(expected).as_str())),
        Value::Array(items) => Ok(items.iter().any(|item| loosely_equal(item, expected))),
        Value::Object(map) => Ok(map.contains_key(render(expected).as_str())),
        other => Err(format!(
            "cannot search {other}: contains needs a string, array or object"
        )),
    }
}

fn compare(
    op: BinaryOp,
    actual: &Value,
    expected: &Value,
    holds: impl FnOnce(f64, f64) -> bool,
) -> Evaluation {
    let (Some(a), Some(b)) = (to_number(actual), to_number(expected)) else {
        return Evaluation::fail(format!(
            "{} needs numbers, got {actual} and {expected}",
            op.as_str()
        ));
    };
    Evaluation::check(holds(a, b), || format!("{actual} is not {} {expected}", op.as_str()))
}
