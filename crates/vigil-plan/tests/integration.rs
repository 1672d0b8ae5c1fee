//! End-to-end tests for plan loading: read file -> migrate -> deserialise -> validate.

use serde_json::json;
use tempfile::TempDir;

use vigil_plan::{
    load_plan_file, load_project, validate_or_raise, PlanGraph, Predicate, Segment, Severity,
    CURRENT_VERSION,
};

fn write(dir: &TempDir, rel: &str, body: serde_json::Value) -> std::path::PathBuf {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, serde_json::to_string_pretty(&body).unwrap()).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Test 1: A legacy v1 file loads as a valid current plan
// ---------------------------------------------------------------------------

#[tokio::test]
async fn legacy_file_loads_validates_and_orders() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "checkout.plan.json",
        json!({
            "version": 1,
            "name": "checkout",
            "project": "shop",
            "environment": "prod",
            "frequency": "5m",
            "steps": [
                {
                    "id": "login",
                    "method": "POST",
                    "target": "auth",
                    "path": "/login",
                    "headers": [["Authorization", "Basic {{ secret:env:BASIC_AUTH }}"]],
                    "body": "{\"user\": \"{{ account.user }}\"}",
                    "assertions": [{"type": "json", "path": "$.token", "op": "exists"}]
                },
                {
                    "id": "cart",
                    "method": "GET",
                    "target": "api",
                    "path": "/cart/{{ account.id }}",
                    "headers": [],
                    "assertions": [{"type": "json", "path": "$.items", "op": "isNotEmpty"}]
                }
            ]
        }),
    );

    let defs = load_plan_file(&path).await.expect("load should succeed");
    assert_eq!(defs.len(), 1);
    let def = &defs[0];
    assert_eq!(def.export_name, "default");
    assert_eq!(def.plan.version, CURRENT_VERSION);

    let diags = validate_or_raise(&def.plan).expect("validation should pass");
    assert!(diags.iter().all(|d| d.severity != Severity::Error));

    let order = PlanGraph::build(&def.plan).execution_order().unwrap();
    assert_eq!(order, vec!["login", "cart"]);

    let login = def.plan.node("login").unwrap();
    let auth = &login.headers["Authorization"];
    assert!(auth
        .segments()
        .iter()
        .any(|s| matches!(s, Segment::Secret(r) if r.scheme == "env" && r.reference == "BASIC_AUTH")));
    assert!(matches!(
        login.assertions[0].predicate(),
        Predicate::Unary(vigil_plan::UnaryOp::Exists)
    ));
}

// ---------------------------------------------------------------------------
// Test 2: Multi-export file and project discovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn project_discovery_loads_every_export() {
    let dir = TempDir::new().unwrap();
    let plan = |name: &str| {
        json!({
            "version": 3,
            "name": name,
            "project": "shop",
            "environment": "staging",
            "frequency": {"every": 1, "unit": "hour"},
            "nodes": [{
                "id": "ping",
                "method": "GET",
                "targetRef": "api",
                "path": "/ping",
                "responseFormat": "text",
                "assertions": [{"format": "text", "path": ".", "predicate": {"op": "equals", "operand": "pong"}}]
            }],
            "edges": [{"from": "START", "to": "ping"}, {"from": "ping", "to": "END"}]
        })
    };
    write(&dir, "monitors/health.plan.json", json!({"east": plan("east"), "west": plan("west")}));
    write(&dir, "single.plan.json", plan("single"));

    let defs = load_project(dir.path()).await.unwrap();
    let keys: Vec<_> = defs
        .iter()
        .map(|d| format!("{}#{}", d.local_path, d.export_name))
        .collect();
    assert_eq!(
        keys,
        vec![
            "monitors/health.plan.json#east",
            "monitors/health.plan.json#west",
            "single.plan.json#default",
        ]
    );
    for def in &defs {
        validate_or_raise(&def.plan).unwrap();
    }
}

// ---------------------------------------------------------------------------
// Test 3: Structural errors are reported with the plan name
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_graph_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = write(
        &dir,
        "broken.plan.json",
        json!({
            "version": 3,
            "name": "broken",
            "project": "shop",
            "environment": "dev",
            "frequency": {"every": 5, "unit": "minute"},
            "nodes": [
                {"id": "a", "method": "GET", "targetRef": "api", "path": "/a"},
                {"id": "b", "method": "GET", "targetRef": "api", "path": "/b"}
            ],
            "edges": [
                {"from": "START", "to": "a"},
                {"from": "a", "to": "b"},
                {"from": "b", "to": "a"},
                {"from": "b", "to": "END"}
            ]
        }),
    );
    let defs = load_plan_file(&path).await.unwrap();
    let err = validate_or_raise(&defs[0].plan).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("plan 'broken'"), "{msg}");
    assert!(msg.contains("Cycle detected"), "{msg}");
}

// ---------------------------------------------------------------------------
// Test 4: Bad templates and unknown versions fail at load time
// ---------------------------------------------------------------------------

#[tokio::test]
async fn load_rejects_bad_placeholder_and_future_version() {
    let dir = TempDir::new().unwrap();
    let bad_template = write(
        &dir,
        "tpl.plan.json",
        json!({
            "version": 3,
            "name": "tpl",
            "project": "shop",
            "environment": "dev",
            "frequency": {"every": 5, "unit": "minute"},
            "nodes": [{"id": "a", "method": "GET", "targetRef": "api", "path": "/{{ unclosed"}],
            "edges": [{"from": "START", "to": "a"}, {"from": "a", "to": "END"}]
        }),
    );
    assert!(load_plan_file(&bad_template).await.is_err());

    let future = write(&dir, "future.plan.json", json!({"version": 42, "name": "future"}));
    let err = load_plan_file(&future).await.unwrap_err();
    assert!(err.to_string().contains("unsupported version 42"));
}
