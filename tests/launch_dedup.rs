use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use fastsearch::{ApiTokenConfig, HttpState, Service, ServiceConfig, SqliteStore, router};
use serde_json::{Value, json};
use tower::util::ServiceExt;

struct TestApp {
    app: Router,
    _dir: tempfile::TempDir,
}

async fn test_app(default_quota_limit: i64) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SqliteStore::new(dir.path().join("fastsearch.sqlite"));
    store.init().await.expect("init");
    let config = ServiceConfig {
        default_quota_limit,
        api_tokens: vec![ApiTokenConfig::new("user-1", "tok-1")],
        ..ServiceConfig::default()
    };
    let service = Service::new(store, &config);
    TestApp {
        app: router(HttpState::new(service, config)),
        _dir: dir,
    }
}

async fn launch_with_headers(app: &Router, headers: &[(&str, &str)]) -> (StatusCode, Value) {
    let mut builder = Request::builder().method("POST").uri("/fast-search");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder
        .header("content-type", "application/json")
        .body(Body::from(json!({"brief_id": "brief-1"}).to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, parsed)
}

async fn quota_used(app: &Router) -> i64 {
    let request = Request::builder()
        .method("GET")
        .uri("/quota")
        .header("authorization", "Bearer tok-1")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    body["used"].as_i64().expect("used")
}

#[tokio::test]
async fn repeated_request_id_is_rejected_without_consuming_quota() {
    let t = test_app(5).await;
    let headers = [
        ("authorization", "Bearer tok-1"),
        ("x-request-id", "req-abc"),
    ];

    let (status, body) = launch_with_headers(&t.app, &headers).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(quota_used(&t.app).await, 1);

    let (status, body) = launch_with_headers(&t.app, &headers).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(quota_used(&t.app).await, 1);

    // A fresh request id goes through.
    let (status, _) = launch_with_headers(
        &t.app,
        &[
            ("authorization", "Bearer tok-1"),
            ("x-request-id", "req-def"),
        ],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quota_used(&t.app).await, 2);
}

#[tokio::test]
async fn exhausted_quota_denies_further_launches() {
    let t = test_app(2).await;
    let headers = [("authorization", "Bearer tok-1")];

    for _ in 0..2 {
        let (status, _) = launch_with_headers(&t.app, &headers).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = launch_with_headers(&t.app, &headers).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert!(
        body["error"]
            .as_str()
            .expect("error message")
            .contains("quota")
    );
    assert_eq!(quota_used(&t.app).await, 2);
}

#[tokio::test]
async fn launch_requires_auth_and_brief_id() {
    let t = test_app(5).await;

    let (status, _) = launch_with_headers(&t.app, &[]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = launch_with_headers(&t.app, &[("authorization", "Bearer wrong")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .method("POST")
        .uri("/fast-search")
        .header("authorization", "Bearer tok-1")
        .header("content-type", "application/json")
        .body(Body::from(json!({}).to_string()))
        .unwrap();
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // None of the rejected launches consumed quota.
    assert_eq!(quota_used(&t.app).await, 0);
}
