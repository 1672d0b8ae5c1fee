//! LiveAdapter against a local axum server.

use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use vigil_http::{AdapterError, HttpAdapter, HttpRequest, LiveAdapter};
use vigil_plan::HttpMethod;
use vigil_types::NetworkFailure;

async fn serve() -> String {
    let router = Router::new()
        .route("/health", get(|| async { Json(json!({"ok": true})) }))
        .route(
            "/echo",
            post(|body: String| async move { (StatusCode::CREATED, [("x-echo", "1")], body) }),
        )
        .route(
            "/broken",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down for maintenance") }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

// ---------------------------------------------------------------------------
// Test 1: Success responses carry status, headers and body
// ---------------------------------------------------------------------------

#[tokio::test]
async fn get_and_post_round_trip() {
    let base = serve().await;
    let adapter = LiveAdapter::new();

    let resp = adapter
        .request(&HttpRequest::new(HttpMethod::Get, format!("{base}/health")))
        .await
        .unwrap();
    assert_eq!(resp.status, 200);
    assert_eq!(resp.status_text, "OK");
    assert_eq!(resp.header("content-type"), Some("application/json"));
    assert_eq!(resp.data, r#"{"ok":true}"#);

    let mut req = HttpRequest::new(HttpMethod::Post, format!("{base}/echo"));
    req.body = Some("hello".into());
    req.headers.insert("content-type".into(), "text/plain".into());
    let resp = adapter.request(&req).await.unwrap();
    assert_eq!(resp.status, 201);
    assert_eq!(resp.header("x-echo"), Some("1"));
    assert_eq!(resp.data, "hello");
}

// ---------------------------------------------------------------------------
// Test 2: Error statuses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn error_status_is_failure_unless_accepted() {
    let base = serve().await;
    let req = HttpRequest::new(HttpMethod::Get, format!("{base}/broken"));

    let err = LiveAdapter::new().request(&req).await.unwrap_err();
    assert_eq!(
        err,
        AdapterError::Network(NetworkFailure::HttpStatusError { status: 503 })
    );

    let resp = LiveAdapter::new()
        .accept_all_statuses(true)
        .request(&req)
        .await
        .unwrap();
    assert_eq!(resp.status, 503);
    assert_eq!(resp.data, "down for maintenance");
}

// ---------------------------------------------------------------------------
// Test 3: Transport failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_is_classified() {
    let base = serve().await;
    let req = HttpRequest::new(HttpMethod::Get, format!("{base}/slow"))
        .with_timeout(Duration::from_millis(100));
    let err = LiveAdapter::new().request(&req).await.unwrap_err();
    assert_eq!(
        err,
        AdapterError::Network(NetworkFailure::Timeout { timeout_ms: 100 })
    );
}

#[tokio::test]
async fn refused_connection_is_classified() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let req = HttpRequest::new(HttpMethod::Get, format!("http://{addr}/"));
    let err = LiveAdapter::new().request(&req).await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::Network(NetworkFailure::ConnectionRefused { .. })
    ));
}

#[tokio::test]
async fn failure_text_leaves_url_out() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let req = HttpRequest::new(
        HttpMethod::Get,
        format!("http://{addr}/health?api_key=s3cr3t-value"),
    );
    let err = LiveAdapter::new().request(&req).await.unwrap_err();
    let failure = match err {
        AdapterError::Network(failure) => failure,
        other => panic!("expected a network failure, got {other:?}"),
    };
    assert!(failure.is_transient());
    assert!(!failure.to_string().contains("s3cr3t-value"));
    assert!(!failure.to_string().contains("api_key"));
}

// ---------------------------------------------------------------------------
// Test 4: Requests that cannot be built are not transient
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_requests_are_terminal() {
    let err = LiveAdapter::new()
        .request(&HttpRequest::new(HttpMethod::Get, "not a url ?token=s3cr3t-value"))
        .await
        .unwrap_err();
    let failure = match err {
        AdapterError::Network(failure) => failure,
        other => panic!("expected a network failure, got {other:?}"),
    };
    assert!(matches!(failure, NetworkFailure::InvalidRequest { .. }));
    assert!(!failure.is_transient());
    assert!(!failure.to_string().contains("s3cr3t-value"));

    let base = serve().await;
    let mut req = HttpRequest::new(HttpMethod::Get, format!("{base}/health"));
    req.headers.insert("bad header".into(), "x".into());
    let err = LiveAdapter::new().request(&req).await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::Network(NetworkFailure::InvalidRequest { .. })
    ));
}
