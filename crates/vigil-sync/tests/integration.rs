//! Project-level sync: discovery, hashing, idempotence, failure handling, hub client.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Path as UrlPath;
use axum::http::{HeaderMap, StatusCode};
use axum::extract::Query;
use axum::routing::{post, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use vigil_sync::{
    content_hash, hash_export, HubClient, InMemoryPlanStore, PlanStore, StateStore, SyncAction,
    SyncEngine,
};
use vigil_types::VigilError;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn write(dir: &TempDir, rel: &str, body: &Value) {
    let path = dir.path().join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, serde_json::to_string_pretty(body).unwrap()).unwrap();
}

fn health_plan(path: &str) -> Value {
    json!({
        "version": 3,
        "name": "health",
        "project": "shop",
        "environment": "prod",
        "frequency": {"every": 5, "unit": "minute"},
        "nodes": [{
            "id": "ping",
            "method": "GET",
            "targetRef": "api",
            "path": path,
            "assertions": [{"format": "json", "path": "status", "predicate": {"op": "equals", "operand": 200}}]
        }],
        "edges": [{"from": "START", "to": "ping"}, {"from": "ping", "to": "END"}]
    })
}

fn renamed(mut plan: Value, name: &str) -> Value {
    plan["name"] = json!(name);
    plan
}

fn project() -> TempDir {
    let dir = TempDir::new().unwrap();
    write(&dir, "monitors/health.plan.json", &health_plan("/health"));
    write(
        &dir,
        "monitors/legacy.plan.json",
        &json!({
            "version": 1,
            "name": "legacy",
            "project": "shop",
            "environment": "prod",
            "frequency": "1h",
            "steps": [{
                "id": "home",
                "method": "GET",
                "target": "web",
                "path": "/",
                "headers": [],
                "assertions": [{"type": "text", "path": ".", "op": "contains", "value": "Welcome"}]
            }]
        }),
    );
    write(
        &dir,
        "multi.plan.json",
        &json!({
            "smoke": renamed(health_plan("/smoke"), "smoke"),
            "deep": renamed(health_plan("/deep"), "deep"),
        }),
    );
    dir
}

// ---------------------------------------------------------------------------
// Test 1: Two consecutive syncs perform writes only once
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_all_is_idempotent() {
    let dir = project();
    let store = Arc::new(InMemoryPlanStore::new());
    let engine = SyncEngine::new(dir.path(), store.clone());

    let first = engine.sync_all(None).await.unwrap();
    assert!(first.is_success());
    assert_eq!(first.outcomes.len(), 4);
    assert!(first.outcomes.iter().all(|o| o.action == SyncAction::Created));
    assert_eq!(store.writes(), 4);

    let second = engine.sync_all(None).await.unwrap();
    assert_eq!(second.applied(), 0);
    assert!(second.outcomes.iter().all(|o| o.action == SyncAction::Unchanged));
    assert_eq!(store.writes(), 4);

    let state = StateStore::new(dir.path()).load().await.unwrap().unwrap();
    let entries = &state.plans["prod"];
    assert_eq!(entries.len(), 4);
    assert!(entries
        .iter()
        .any(|e| e.local_path == "monitors/legacy.plan.json" && e.export_name == "default"));
    assert!(entries
        .iter()
        .any(|e| e.local_path == "multi.plan.json" && e.export_name == "deep"));
}

// ---------------------------------------------------------------------------
// Test 2: Editing one plan re-pushes only that plan
// ---------------------------------------------------------------------------

#[tokio::test]
async fn edited_plan_is_updated_in_place() {
    let dir = project();
    let store = Arc::new(InMemoryPlanStore::new());
    let engine = SyncEngine::new(dir.path(), store.clone());
    let first = engine.sync_all(None).await.unwrap();
    let original_id = first
        .outcomes
        .iter()
        .find(|o| o.local_path == "monitors/health.plan.json")
        .unwrap()
        .plan_id
        .clone();

    write(&dir, "monitors/health.plan.json", &health_plan("/healthz"));
    let second = engine.sync_all(None).await.unwrap();
    let updated: Vec<_> = second.outcomes.iter().filter(|o| o.applied()).collect();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].action, SyncAction::Updated);
    assert_eq!(updated[0].plan_id, original_id);
    assert_eq!(store.writes(), 5);
    assert_eq!(store.get(&original_id).unwrap()["nodes"][0]["path"], "/healthz");
}

// ---------------------------------------------------------------------------
// Test 3: Field order does not change the hash; content does
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hash_is_stable_under_reordering() {
    let a = TempDir::new().unwrap();
    let b = TempDir::new().unwrap();
    write(&a, "p.plan.json", &health_plan("/health"));
    let reordered = r#"{
        "edges": [{"to": "ping", "from": "START"}, {"to": "END", "from": "ping"}],
        "nodes": [{
            "assertions": [{"predicate": {"operand": 200, "op": "equals"}, "path": "status", "format": "json"}],
            "path": "/health", "targetRef": "api", "method": "GET", "id": "ping"
        }],
        "frequency": {"unit": "minute", "every": 5},
        "environment": "prod", "project": "shop", "name": "health", "version": 3
    }"#;
    std::fs::write(b.path().join("p.plan.json"), reordered).unwrap();

    let (_, hash_a) = hash_export(a.path(), "p.plan.json", "default").await.unwrap();
    let (def_b, hash_b) = hash_export(b.path(), "p.plan.json", "default").await.unwrap();
    assert_eq!(hash_a, hash_b);
    assert_eq!(def_b.local_path, "p.plan.json");

    let mut changed = health_plan("/health");
    changed["nodes"][0]["assertions"][0]["predicate"]["operand"] = json!(201);
    assert_ne!(content_hash(&changed), hash_a);

    let missing = hash_export(a.path(), "p.plan.json", "nope").await.unwrap_err();
    assert!(matches!(missing, VigilError::NotFound { .. }));
}

// ---------------------------------------------------------------------------
// Test 4: A failing store leaves state untouched and a retry succeeds
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_sync_is_retryable() {
    let dir = project();
    let store = Arc::new(InMemoryPlanStore::new());
    let engine = SyncEngine::new(dir.path(), store.clone());

    store.set_failing(true);
    let report = engine.sync_all(None).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 4);
    assert!(StateStore::new(dir.path()).load().await.unwrap().is_none());

    store.set_failing(false);
    let report = engine.sync_all(None).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.applied(), 4);
}

// ---------------------------------------------------------------------------
// Test 5: Environment override, validation and locking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn environment_override_is_recorded() {
    let dir = project();
    let engine = SyncEngine::new(dir.path(), Arc::new(InMemoryPlanStore::new()));
    let report = engine.sync_all(Some("staging")).await.unwrap();
    assert!(report.outcomes.iter().all(|o| o.environment == "staging"));
    let state = StateStore::new(dir.path()).load().await.unwrap().unwrap();
    assert!(state.plans.contains_key("staging"));
    assert!(!state.plans.contains_key("prod"));
}

#[tokio::test]
async fn invalid_plan_aborts_before_any_write() {
    let dir = project();
    let mut broken = health_plan("/x");
    broken["edges"] = json!([{"from": "START", "to": "ping"}]);
    write(&dir, "broken.plan.json", &broken);

    let store = Arc::new(InMemoryPlanStore::new());
    let err = SyncEngine::new(dir.path(), store.clone())
        .sync_all(None)
        .await
        .unwrap_err();
    assert!(matches!(err, VigilError::SchemaError { .. }));
    assert!(err.to_string().contains("broken.plan.json"));
    assert_eq!(store.writes(), 0);
}

#[tokio::test]
async fn held_lock_blocks_sync() {
    let dir = project();
    let lock = StateStore::new(dir.path()).lock().await.unwrap();
    let err = SyncEngine::new(dir.path(), Arc::new(InMemoryPlanStore::new()))
        .sync_all(None)
        .await
        .unwrap_err();
    assert!(matches!(err, VigilError::StateLocked { .. }));
    drop(lock);
}

// ---------------------------------------------------------------------------
// Test 6: HubClient against a local hub
// ---------------------------------------------------------------------------

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("authorization").and_then(|v| v.to_str().ok()) == Some("Bearer hub-token")
}

async fn serve_hub() -> String {
    let router = Router::new()
        .route(
            "/v1/plans",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                if !authorized(&headers) {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad token"})));
                }
                let name = body["definition"]["name"].clone();
                (StatusCode::CREATED, Json(json!({"id": "p-1", "name": name})))
            })
            .get(|Query(q): Query<HashMap<String, String>>| async move {
                let hit = q.get("project").map(String::as_str) == Some("shop")
                    && q.get("environment").map(String::as_str) == Some("prod")
                    && q.get("name").map(String::as_str) == Some("health");
                if hit {
                    Json(json!([{"id": "p-1", "name": "health"}]))
                } else {
                    Json(json!([]))
                }
            }),
        )
        .route(
            "/v1/plans/:id",
            put(|UrlPath(id): UrlPath<String>, Json(body): Json<Value>| async move {
                if id == "gone" {
                    return (StatusCode::NOT_FOUND, Json(json!({"error": "no such plan"})));
                }
                let name = body["definition"]["name"].clone();
                (StatusCode::OK, Json(json!({"id": id, "name": name})))
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn hub_client_create_update_and_errors() {
    let base = serve_hub().await;
    let client = HubClient::new(&base, "hub-token");
    let def = health_plan("/health");

    let created = client.create_plan("prod", &def).await.unwrap();
    assert_eq!(created.id, "p-1");
    assert_eq!(created.name, "health");

    let updated = client.update_plan("p-1", "prod", &def).await.unwrap();
    assert_eq!(updated.id, "p-1");

    let err = client.update_plan("gone", "prod", &def).await.unwrap_err();
    match err {
        VigilError::SyncConflict { plan, message } => {
            assert_eq!(plan, "health");
            assert!(message.contains("404"));
            assert!(message.contains("no such plan"));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let err = HubClient::new(&base, "wrong")
        .create_plan("prod", &def)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn hub_client_finds_plan_by_identity() {
    let base = serve_hub().await;
    let client = HubClient::new(&base, "hub-token");

    let found = client.find_plan("shop", "prod", "health").await.unwrap().unwrap();
    assert_eq!(found.id, "p-1");
    assert!(client.find_plan("shop", "staging", "health").await.unwrap().is_none());
}

// ---------------------------------------------------------------------------
// Test 7: A create applied remotely but answered with an error is adopted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lost_create_response_is_adopted_on_retry() {
    let dir = project();
    let store = Arc::new(InMemoryPlanStore::new());
    let engine = SyncEngine::new(dir.path(), store.clone());

    store.set_losing_responses(true);
    let report = engine.sync_all(None).await.unwrap();
    assert_eq!(report.failures.len(), 4);
    assert_eq!(store.len(), 4);
    assert!(StateStore::new(dir.path()).load().await.unwrap().is_none());

    store.set_losing_responses(false);
    let report = engine.sync_all(None).await.unwrap();
    assert!(report.is_success());
    assert!(report.outcomes.iter().all(|o| o.action == SyncAction::Updated));
    assert_eq!(store.len(), 4);

    let again = engine.sync_all(None).await.unwrap();
    assert_eq!(again.applied(), 0);
}

// ---------------------------------------------------------------------------
// Test 8: Transport errors do not echo the request URL
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hub_errors_leave_url_out() {
    let client = HubClient::new("http://127.0.0.1:1/tenant-9f3a", "hub-token");
    let err = client
        .create_plan("prod", &health_plan("/health"))
        .await
        .unwrap_err();
    assert!(matches!(err, VigilError::SyncConflict { .. }));
    assert!(!err.to_string().contains("tenant-9f3a"));
}
