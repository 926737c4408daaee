use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use fastsearch::{
    ApiTokenConfig, CheckType, Clock, HttpState, SearchStatus, Service, ServiceConfig, SqliteStore,
    router,
};
use serde_json::{Value, json};
use tower::util::ServiceExt;

#[derive(Clone)]
struct ManualClock(Arc<AtomicI64>);

impl ManualClock {
    fn at(epoch_ms: i64) -> Self {
        Self(Arc::new(AtomicI64::new(epoch_ms)))
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

fn test_config() -> ServiceConfig {
    ServiceConfig {
        allowed_origins: vec!["https://app.example.com".to_string()],
        callback_secret: Some("hook-secret".to_string()),
        default_quota_limit: 3,
        api_tokens: vec![ApiTokenConfig::new("user-1", "tok-1")],
        ..ServiceConfig::default()
    }
}

struct TestApp {
    app: Router,
    store: SqliteStore,
    _dir: tempfile::TempDir,
}

async fn test_app() -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::new(dir.path().join("fastsearch.sqlite"));
    store.init().await.expect("init");
    let clock = ManualClock::at(1_700_000_000_000);
    let config = test_config();
    let service = Service::with_clock(store.clone(), &config, Box::new(clock));
    let app = router(HttpState::new(service, config));
    TestApp {
        app,
        store,
        _dir: dir,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, parsed)
}

async fn launch(app: &Router) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/fast-search",
        &[("authorization", "Bearer tok-1")],
        Some(json!({"brief_id": "brief-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    body["solution_id"].as_str().expect("solution_id").to_string()
}

async fn quota_used(app: &Router) -> i64 {
    let (status, body) = send(
        app,
        "GET",
        "/quota",
        &[("authorization", "Bearer tok-1")],
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["used"].as_i64().expect("used")
}

#[tokio::test]
async fn error_callback_fails_search_and_refunds_quota() {
    let t = test_app().await;
    let solution_id = launch(&t.app).await;
    assert_eq!(quota_used(&t.app).await, 1);

    let (status, body) = send(
        &t.app,
        "POST",
        "/fast-search-callback",
        &[("x-callback-secret", "hook-secret")],
        Some(json!({
            "solution_id": solution_id,
            "status": "error",
            "error_message": "upstream timeout"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["refunded"], true);
    assert_eq!(body["reason"], "upstream timeout");

    assert_eq!(quota_used(&t.app).await, 0);

    let record = t.store.search(&solution_id).await.unwrap().unwrap();
    assert_eq!(record.fast_search_status, SearchStatus::Failed);
    assert!(record.fast_search_checked_at_ms.is_some());

    let logs = t.store.monitoring_logs(&solution_id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].check_type, CheckType::Callback);
    assert!(logs[0].refunded);
    assert_eq!(logs[0].details["reason"], "upstream timeout");
}

#[tokio::test]
async fn finished_callback_with_matches_is_success_without_refund() {
    let t = test_app().await;
    let solution_id = launch(&t.app).await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/supplier-matches",
        &[("x-callback-secret", "hook-secret")],
        Some(json!({
            "solution_id": solution_id,
            "suppliers": [
                {"name": "Acme Metals"},
                {"name": "Borealis Plastics"},
                {"name": "Cantor Tooling"}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inserted"], 3);

    let (status, body) = send(
        &t.app,
        "POST",
        "/fast-search-callback",
        &[("x-callback-secret", "hook-secret")],
        Some(json!({"solution_id": solution_id, "status": "finished", "suppliers_count": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["suppliers_found"], 3);
    assert_eq!(body["refunded"], false);

    assert_eq!(quota_used(&t.app).await, 1);
}

#[tokio::test]
async fn finished_callback_with_no_matches_fails_and_refunds() {
    let t = test_app().await;
    let solution_id = launch(&t.app).await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/fast-search-callback",
        &[("x-callback-secret", "hook-secret")],
        Some(json!({"solution_id": solution_id, "status": "finished"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["refunded"], true);
    assert_eq!(body["reason"], "no suppliers found");
    assert_eq!(quota_used(&t.app).await, 0);
}

#[tokio::test]
async fn redelivered_callback_never_refunds_twice() {
    let t = test_app().await;
    let solution_id = launch(&t.app).await;

    let payload = json!({"solution_id": solution_id, "status": "finished"});
    let (status, body) = send(
        &t.app,
        "POST",
        "/fast-search-callback",
        &[("x-callback-secret", "hook-secret")],
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refunded"], true);
    assert_eq!(quota_used(&t.app).await, 0);

    // At-least-once delivery: the second attempt sees a terminal record.
    let (status, body) = send(
        &t.app,
        "POST",
        "/fast-search-callback",
        &[("x-callback-secret", "hook-secret")],
        Some(payload),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["refunded"], false);
    assert_eq!(quota_used(&t.app).await, 0);

    let logs = t.store.monitoring_logs(&solution_id).await.unwrap();
    assert_eq!(logs.len(), 1);
}

#[tokio::test]
async fn callback_validates_payload_and_secret() {
    let t = test_app().await;
    let solution_id = launch(&t.app).await;

    let (status, body) = send(
        &t.app,
        "POST",
        "/fast-search-callback",
        &[("x-callback-secret", "hook-secret")],
        Some(json!({"status": "finished"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = send(
        &t.app,
        "POST",
        "/fast-search-callback",
        &[("x-callback-secret", "hook-secret")],
        Some(json!({"solution_id": solution_id, "status": "cancelled"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &t.app,
        "POST",
        "/fast-search-callback",
        &[("x-callback-secret", "hook-secret")],
        Some(json!({"solution_id": "sol-unknown", "status": "finished"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &t.app,
        "POST",
        "/fast-search-callback",
        &[("x-callback-secret", "wrong")],
        Some(json!({"solution_id": solution_id, "status": "finished"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Nothing above touched the record or the quota.
    let record = t.store.search(&solution_id).await.unwrap().unwrap();
    assert_eq!(record.fast_search_status, SearchStatus::Pending);
    assert_eq!(quota_used(&t.app).await, 1);
}

#[tokio::test]
async fn preflight_echoes_allow_listed_origin_only() {
    let t = test_app().await;

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/fast-search")
        .header("origin", "https://app.example.com")
        .body(Body::empty())
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|value| value.to_str().ok()),
        Some("https://app.example.com")
    );
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-credentials")
            .and_then(|value| value.to_str().ok()),
        Some("true")
    );

    let request = Request::builder()
        .method("OPTIONS")
        .uri("/fast-search")
        .header("origin", "https://evil.example.com")
        .body(Body::empty())
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(response.headers().get("access-control-allow-origin").is_none());
}
