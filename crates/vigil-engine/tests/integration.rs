//! End-to-end executor runs against the stub adapter.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use vigil_engine::{EventEmitter, PlanExecutor, RunEvent};
use vigil_http::{HttpResponse, Stub, StubAdapter};
use vigil_plan::Plan;
use vigil_resolve::{resolve, Environment, ResolvedPlan, SecretRegistry};
use vigil_types::{NetworkFailure, RunStatus, VigilError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A chain plan: START -> nodes[0] -> ... -> END, all against target `svc`.
async fn chain(nodes: Vec<Value>) -> ResolvedPlan {
    let ids: Vec<String> = nodes
        .iter()
        .map(|n| n["id"].as_str().unwrap().to_string())
        .collect();
    let mut hops = vec!["START".to_string()];
    hops.extend(ids);
    hops.push("END".to_string());
    let edges: Vec<Value> = hops
        .windows(2)
        .map(|w| json!({"from": w[0], "to": w[1]}))
        .collect();

    let plan: Plan = serde_json::from_value(json!({
        "version": 3,
        "name": "smoke",
        "project": "shop",
        "environment": "test",
        "frequency": {"every": 5, "unit": "minute"},
        "timeoutMs": 200,
        "nodes": nodes,
        "edges": edges,
    }))
    .unwrap();
    let env = Environment::new("test").with_target("svc", "http://svc.test");
    resolve(&plan, &env, &SecretRegistry::new()).await.unwrap()
}

fn get_node(id: &str, path: &str, assertions: Value) -> Value {
    json!({
        "id": id,
        "method": "GET",
        "targetRef": "svc",
        "path": path,
        "assertions": assertions,
    })
}

fn assert_json(path: &str, op: &str, operand: Value) -> Value {
    json!({"format": "json", "path": path, "predicate": {"op": op, "operand": operand}})
}

fn executor(adapter: StubAdapter) -> (PlanExecutor, Arc<StubAdapter>) {
    let adapter = Arc::new(adapter);
    (PlanExecutor::new(adapter.clone()), adapter)
}

// ---------------------------------------------------------------------------
// Test 1: A passing single-node plan
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_node_passes() {
    let plan = chain(vec![get_node(
        "A",
        "/health",
        json!([assert_json("$.ok", "equals", json!(true))]),
    )])
    .await;
    let (exec, _) = executor(
        StubAdapter::new().with_stub(Stub::exact("http://svc.test/health").respond_json(200, json!({"ok": true}))),
    );

    let result = exec.run("plan-1", &plan).await.unwrap();
    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(result.plan_id, "plan-1");
    assert_eq!(result.node_results.len(), 1);
    assert_eq!(result.node_results[0].node_id, "A");
    assert_eq!(result.node_results[0].http_status, Some(200));
    assert!(result.note.is_none());
}

// ---------------------------------------------------------------------------
// Test 2: An assertion mismatch fails exactly one assertion
// ---------------------------------------------------------------------------

#[tokio::test]
async fn assertion_mismatch_fails_run() {
    let plan = chain(vec![get_node(
        "A",
        "/health",
        json!([
            assert_json("$.ok", "equals", json!(true)),
            assert_json("status", "equals", json!(200)),
        ]),
    )])
    .await;
    let (exec, _) = executor(
        StubAdapter::new().with_stub(Stub::exact("http://svc.test/health").respond_json(200, json!({"ok": false}))),
    );

    let result = exec.run("plan-1", &plan).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    let node = &result.node_results[0];
    assert_eq!(node.status, RunStatus::Failed);
    assert_eq!(node.failed_assertions(), 1);
    let failed = node.assertions.iter().find(|a| !a.passed).unwrap();
    assert_eq!(failed.path, "$.ok");
    assert_eq!(failed.actual, Some(json!(false)));
    assert_eq!(failed.expected, Some(json!(true)));
}

// ---------------------------------------------------------------------------
// Test 3: A refused connection halts the run with error
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connection_refused_halts_run() {
    let plan = chain(vec![
        get_node("A", "/a", json!([])),
        get_node("B", "/b", json!([])),
        get_node("C", "/c", json!([])),
    ])
    .await;
    let (exec, adapter) = executor(
        StubAdapter::new()
            .with_stub(Stub::exact("http://svc.test/a").respond_json(200, json!({})))
            .with_stub(Stub::exact("http://svc.test/b").fail(NetworkFailure::ConnectionRefused {
                message: "connection refused".into(),
            }))
            .with_stub(Stub::exact("http://svc.test/c").respond_json(200, json!({}))),
    );

    let result = exec.run("plan-1", &plan).await.unwrap();
    assert_eq!(result.status, RunStatus::Error);
    let ids: Vec<&str> = result.node_results.iter().map(|n| n.node_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!(result.node_results[0].status, RunStatus::Passed);
    assert_eq!(result.node_results[1].status, RunStatus::Error);
    assert!(matches!(
        result.network_failure(),
        Some(NetworkFailure::ConnectionRefused { .. })
    ));
    assert_eq!(adapter.call_count(), 2);
    assert!(result.note.unwrap().contains("node 'B'"));
}

#[tokio::test]
async fn error_status_and_timeout_are_errors() {
    let plan = chain(vec![get_node("A", "/down", json!([]))]).await;
    let (exec, _) = executor(
        StubAdapter::new().with_stub(
            Stub::exact("http://svc.test/down").fail(NetworkFailure::HttpStatusError { status: 503 }),
        ),
    );
    let result = exec.run("plan-1", &plan).await.unwrap();
    assert_eq!(result.status, RunStatus::Error);
    assert_eq!(result.node_results[0].http_status, Some(503));

    // The plan timeout (200ms) bounds a slow stub.
    let plan = chain(vec![get_node("A", "/slow", json!([]))]).await;
    let (exec, _) = executor(
        StubAdapter::new().with_stub(Stub::exact("http://svc.test/slow").delay(Duration::from_secs(10))),
    );
    let result = exec.run("plan-1", &plan).await.unwrap();
    assert_eq!(
        result.node_results[0].error,
        Some(NetworkFailure::Timeout { timeout_ms: 200 })
    );
}

// ---------------------------------------------------------------------------
// Test 4: "5" and 5 compare equal in both operand orders
// ---------------------------------------------------------------------------

#[tokio::test]
async fn numeric_coercion_is_symmetric() {
    let plan = chain(vec![
        get_node("as_string", "/s", json!([assert_json("$.count", "equals", json!(5))])),
        get_node("as_number", "/n", json!([assert_json("$.count", "equals", json!("5"))])),
    ])
    .await;
    let (exec, _) = executor(
        StubAdapter::new()
            .with_stub(Stub::exact("http://svc.test/s").respond_json(200, json!({"count": "5"})))
            .with_stub(Stub::exact("http://svc.test/n").respond_json(200, json!({"count": 5}))),
    );

    let result = exec.run("plan-1", &plan).await.unwrap();
    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(result.node_results.len(), 2);
}

#[tokio::test]
async fn non_numeric_input_fails_only_that_assertion() {
    let plan = chain(vec![
        get_node(
            "A",
            "/a",
            json!([
                assert_json("$.count", "greaterThan", json!(1)),
                assert_json("$.name", "equals", json!("box")),
            ]),
        ),
        get_node("B", "/b", json!([])),
    ])
    .await;
    let (exec, _) = executor(
        StubAdapter::new()
            .with_stub(Stub::exact("http://svc.test/a").respond_json(200, json!({"count": "many", "name": "box"})))
            .with_stub(Stub::exact("http://svc.test/b").respond_json(200, json!({}))),
    );

    let result = exec.run("plan-1", &plan).await.unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    // Assertion failures do not halt the run.
    assert_eq!(result.node_results.len(), 2);
    assert_eq!(result.node_results[0].failed_assertions(), 1);
    assert_eq!(result.node_results[1].status, RunStatus::Passed);
}

// ---------------------------------------------------------------------------
// Test 5: Edge order, not declaration order, drives execution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nodes_run_in_edge_order_with_events() {
    let plan: Plan = serde_json::from_value(json!({
        "version": 3,
        "name": "ordered",
        "project": "shop",
        "environment": "test",
        "frequency": {"every": 1, "unit": "hour"},
        "nodes": [
            get_node("second", "/2", json!([])),
            get_node("first", "/1", json!([])),
        ],
        "edges": [
            {"from": "second", "to": "END"},
            {"from": "START", "to": "first"},
            {"from": "first", "to": "second"}
        ]
    }))
    .unwrap();
    let env = Environment::new("test").with_target("svc", "http://svc.test/api");
    let plan = resolve(&plan, &env, &SecretRegistry::new()).await.unwrap();

    let adapter = Arc::new(StubAdapter::new().with_stub(
        Stub::pattern(r"^http://svc\.test/api/\d$")
            .unwrap()
            .respond(HttpResponse::text(200, "ok")),
    ));
    let emitter = EventEmitter::new(32);
    let mut rx = emitter.subscribe();
    let exec = PlanExecutor::new(adapter.clone()).with_events(emitter);

    let result = exec.run("plan-2", &plan).await.unwrap();
    assert_eq!(result.status, RunStatus::Passed);

    let urls: Vec<String> = adapter.calls().into_iter().map(|r| r.url).collect();
    assert_eq!(urls, vec!["http://svc.test/api/1", "http://svc.test/api/2"]);

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            RunEvent::RunStarted { .. } => "run_started".to_string(),
            RunEvent::NodeStarted { node_id, .. } => format!("start:{node_id}"),
            RunEvent::NodeCompleted { node_id, .. } => format!("done:{node_id}"),
            RunEvent::RunCompleted { .. } => "run_completed".to_string(),
        });
    }
    assert_eq!(
        kinds,
        vec![
            "run_started",
            "start:first",
            "done:first",
            "start:second",
            "done:second",
            "run_completed"
        ]
    );
}

// ---------------------------------------------------------------------------
// Test 6: Cancellation between nodes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_stops_before_next_node() {
    let plan = chain(vec![
        get_node("A", "/a", json!([])),
        get_node("B", "/b", json!([])),
    ])
    .await;
    let adapter = Arc::new(
        StubAdapter::new()
            .with_stub(Stub::exact("http://svc.test/a").delay(Duration::from_millis(50)))
            .with_stub(Stub::exact("http://svc.test/b")),
    );
    let exec = PlanExecutor::new(adapter.clone());
    let mut events = exec.events().subscribe();
    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);

    // Cancel while node A is in flight.
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if matches!(event, RunEvent::NodeStarted { ref node_id, .. } if node_id == "A") {
                let _ = cancel_tx.send(true);
                break;
            }
        }
    });

    let result = exec
        .run_until_cancelled("plan-1", &plan, cancel_rx)
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Error);
    assert_eq!(result.node_results.len(), 1);
    assert_eq!(result.node_results[0].status, RunStatus::Passed);
    assert_eq!(result.note.as_deref(), Some("cancelled before node 'B'"));
    assert_eq!(adapter.call_count(), 1);
}

// ---------------------------------------------------------------------------
// Test 7: Unmatched stub requests surface as errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unmatched_stub_is_an_error() {
    let plan = chain(vec![get_node("A", "/unknown", json!([]))]).await;
    let (exec, _) = executor(StubAdapter::new());
    let err = exec.run("plan-1", &plan).await.unwrap_err();
    assert!(matches!(err, VigilError::NoStubMatched { ref url, .. } if url == "http://svc.test/unknown"));
}

// ---------------------------------------------------------------------------
// Test 8: XML and text responses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn xml_and_text_assertions() {
    let plan = chain(vec![
        json!({
            "id": "feed",
            "method": "GET",
            "targetRef": "svc",
            "path": "/feed.xml",
            "responseFormat": "xml",
            "assertions": [
                {"format": "xml", "path": "/feed/entry[2]/@id", "predicate": {"op": "equals", "operand": 2}},
                {"format": "xml", "path": "/feed/title", "predicate": {"op": "contains", "operand": "News"}}
            ]
        }),
        json!({
            "id": "version",
            "method": "GET",
            "targetRef": "svc",
            "path": "/version",
            "responseFormat": "text",
            "assertions": [
                {"format": "text", "path": "build (\\d+)", "predicate": {"op": "greaterThanOrEqual", "operand": 100}},
                {"format": "text", "path": "header:content-type", "predicate": {"op": "matches", "operand": "^text/"}}
            ]
        }),
    ])
    .await;
    let (exec, _) = executor(
        StubAdapter::new()
            .with_stub(Stub::exact("http://svc.test/feed.xml").respond(HttpResponse::text(
                200,
                r#"<feed><title>Daily News</title><entry id="1"/><entry id="2"/></feed>"#,
            )))
            .with_stub(Stub::exact("http://svc.test/version").respond(
                HttpResponse::text(200, "app build 120").with_header("Content-Type", "text/plain"),
            )),
    );

    let result = exec.run("plan-1", &plan).await.unwrap();
    for node in &result.node_results {
        for a in &node.assertions {
            assert!(a.passed, "{} {} failed: {:?}", node.node_id, a.path, a.message);
        }
    }
    assert_eq!(result.status, RunStatus::Passed);
}
