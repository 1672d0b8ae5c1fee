//! Version-to-version plan upgrades.
//!
//! Each step is a pure function from the JSON shape of version `n` to the
//! shape of version `n + 1`. [`migrate_to_latest`] applies them in order until
//! the plan reaches [`CURRENT_VERSION`]. A plan that is already current is
//! returned unchanged.

use serde_json::{json, Map, Value};

use vigil_types::{Result, VigilError};

use crate::model::{Frequency, FrequencyUnit, CURRENT_VERSION, END, START};

type Step = fn(Value) -> Result<Value>;

/// Ordered chain, keyed by the version each step upgrades *from*.
const STEPS: &[(u32, Step)] = &[(1, v1_to_v2), (2, v2_to_v3)];

/// Read the `version` field of a raw plan.
pub fn detect_version(raw: &Value) -> Result<u32> {
    let version = raw
        .get("version")
        .ok_or_else(|| VigilError::schema(plan_context(raw), "missing 'version'"))?;
    version
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .ok_or_else(|| {
            VigilError::schema(plan_context(raw), format!("invalid version {version}"))
        })
}

/// Upgrade a raw plan to the current schema version.
pub fn migrate_to_latest(raw: Value) -> Result<Value> {
    let mut version = detect_version(&raw)?;
    if version == 0 || version > CURRENT_VERSION {
        return Err(VigilError::schema(
            plan_context(&raw),
            format!("unsupported version {version} (current is {CURRENT_VERSION})"),
        ));
    }

    let mut plan = raw;
    while version < CURRENT_VERSION {
        let step = STEPS
            .iter()
            .find(|(from, _)| *from == version)
            .map(|(_, step)| *step)
            .ok_or_else(|| {
                VigilError::schema(plan_context(&plan), format!("no migration from v{version}"))
            })?;
        plan = step(plan)?;
        version += 1;
        tracing::debug!(plan = %plan_name(&plan), version, "migrated plan");
    }
    Ok(plan)
}

fn plan_name(raw: &Value) -> &str {
    raw.get("name").and_then(Value::as_str).unwrap_or("<unnamed>")
}

fn plan_context(raw: &Value) -> String {
    format!("plan '{}'", plan_name(raw))
}

fn step_context(raw: &Value, from: u32) -> String {
    format!("plan '{}' v{}->v{}", plan_name(raw), from, from + 1)
}

fn as_object(value: Value, context: &str, what: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(VigilError::schema(
            context,
            format!("{what} must be an object, got {other}"),
        )),
    }
}

// ---------------------------------------------------------------------------
// v1 -> v2: steps become nodes, edges are synthesised, frequency is structured
// ---------------------------------------------------------------------------

fn v1_to_v2(raw: Value) -> Result<Value> {
    let ctx = step_context(&raw, 1);
    let mut plan = as_object(raw, &ctx, "plan")?;

    let steps = match plan.remove("steps") {
        Some(Value::Array(steps)) => steps,
        Some(other) => {
            return Err(VigilError::schema(
                &ctx,
                format!("'steps' must be an array, got {other}"),
            ))
        }
        None => Vec::new(),
    };

    let mut chain = vec![START.to_string()];
    for (i, step) in steps.iter().enumerate() {
        let id = step.get("id").and_then(Value::as_str).ok_or_else(|| {
            VigilError::schema(&ctx, format!("step {i} has no string 'id'"))
        })?;
        chain.push(id.to_string());
    }
    chain.push(END.to_string());
    let edges: Vec<Value> = chain
        .windows(2)
        .map(|pair| json!({"from": pair[0], "to": pair[1]}))
        .collect();

    if let Some(freq) = plan.remove("frequency") {
        let structured = match freq {
            Value::String(s) => {
                let parsed = Frequency::parse_shorthand(&s).ok_or_else(|| {
                    VigilError::schema(&ctx, format!("invalid frequency shorthand '{s}'"))
                })?;
                json!({"every": parsed.every, "unit": unit_name(parsed.unit)})
            }
            other => other,
        };
        plan.insert("frequency".into(), structured);
    }

    plan.insert("nodes".into(), Value::Array(steps));
    plan.insert("edges".into(), Value::Array(edges));
    plan.insert("version".into(), json!(2));
    Ok(Value::Object(plan))
}

fn unit_name(unit: FrequencyUnit) -> &'static str {
    match unit {
        FrequencyUnit::Minute => "minute",
        FrequencyUnit::Hour => "hour",
        FrequencyUnit::Day => "day",
    }
}

// ---------------------------------------------------------------------------
// v2 -> v3: header maps, targetRef, responseFormat, structured predicates
// ---------------------------------------------------------------------------

fn v2_to_v3(raw: Value) -> Result<Value> {
    let ctx = step_context(&raw, 2);
    let mut plan = as_object(raw, &ctx, "plan")?;

    let nodes = match plan.remove("nodes") {
        Some(Value::Array(nodes)) => nodes,
        Some(other) => {
            return Err(VigilError::schema(
                &ctx,
                format!("'nodes' must be an array, got {other}"),
            ))
        }
        None => Vec::new(),
    };
    let nodes = nodes
        .into_iter()
        .map(|node| upgrade_node_v3(node, &ctx))
        .collect::<Result<Vec<_>>>()?;

    plan.insert("nodes".into(), Value::Array(nodes));
    plan.insert("version".into(), json!(3));
    Ok(Value::Object(plan))
}

fn upgrade_node_v3(node: Value, ctx: &str) -> Result<Value> {
    let mut node = as_object(node, ctx, "node")?;
    let id = node
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();
    let ctx = format!("{ctx} node '{id}'");

    if let Some(headers) = node.remove("headers") {
        node.insert("headers".into(), header_pairs_to_map(headers, &ctx)?);
    }

    if let Some(target) = node.remove("target") {
        node.entry("targetRef").or_insert(target);
    }

    node.entry("responseFormat").or_insert_with(|| json!("json"));

    if let Some(assertions) = node.remove("assertions") {
        let Value::Array(items) = assertions else {
            return Err(VigilError::schema(&ctx, "'assertions' must be an array"));
        };
        let upgraded = items
            .into_iter()
            .map(|a| upgrade_assertion_v3(a, &ctx))
            .collect::<Result<Vec<_>>>()?;
        node.insert("assertions".into(), Value::Array(upgraded));
    }

    Ok(Value::Object(node))
}

fn header_pairs_to_map(headers: Value, ctx: &str) -> Result<Value> {
    match headers {
        Value::Array(pairs) => {
            let mut map = Map::new();
            for pair in pairs {
                match pair.as_array().map(Vec::as_slice) {
                    Some([Value::String(name), value @ Value::String(_)]) => {
                        map.insert(name.clone(), value.clone());
                    }
                    _ => {
                        return Err(VigilError::schema(
                            ctx,
                            format!("header entry {pair} must be a [name, value] pair of strings"),
                        ))
                    }
                }
            }
            Ok(Value::Object(map))
        }
        map @ Value::Object(_) => Ok(map),
        other => Err(VigilError::schema(
            ctx,
            format!("'headers' must be a list of pairs, got {other}"),
        )),
    }
}

fn upgrade_assertion_v3(assertion: Value, ctx: &str) -> Result<Value> {
    let mut a = as_object(assertion, ctx, "assertion")?;
    let format = a.remove("type").unwrap_or_else(|| json!("json"));
    let path = a.remove("path").unwrap_or_else(|| json!("$"));
    let op = a
        .remove("op")
        .ok_or_else(|| VigilError::schema(ctx, "assertion is missing 'op'"))?;

    let mut predicate = Map::new();
    predicate.insert("op".into(), op);
    if let Some(value) = a.remove("value") {
        predicate.insert("operand".into(), value);
    }

    Ok(json!({
        "format": format,
        "path": path,
        "predicate": Value::Object(predicate),
    }))
}
