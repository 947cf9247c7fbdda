//! API endpoint integration tests

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use tower::ServiceExt;
use voicebox::DetectorMode;
use voicebox::api::{ApiServer, ApiState};
use voicebox::audio::{MockBackend, MockDevice};
use voicebox::session::SessionLifecycleManager;

mod common;
use common::{ScriptedStt, create_test_user, harness, test_devices};

/// Build a test API router over a mock backend; returns the manager for cleanup
fn build_test_router(backend: MockBackend) -> (axum::Router, Arc<SessionLifecycleManager>) {
    let h = harness(backend, ScriptedStt::default(), DetectorMode::Fallback);
    create_test_user(&h.db, "1", "en");

    let sessions = Arc::new(h.manager);
    let state = Arc::new(ApiState {
        sessions: Arc::clone(&sessions),
        devices: test_devices(&h.backend),
        db: h.db,
    });

    (ApiServer::new(state, 0).router(), sessions)
}

async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _) = build_test_router(MockBackend::new());

    let (status, json) = send(&app, "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint() {
    let (app, _) = build_test_router(MockBackend::new());

    let (status, json) = send(&app, "GET", "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["checks"]["database"]["status"], "ok");
    assert_eq!(json["checks"]["audio"]["status"], "ok");
}

#[tokio::test]
async fn test_ready_without_speaker_is_degraded() {
    let backend = MockBackend::new().with_devices(vec![MockDevice::input(0, "mic", &[16000])]);
    let (app, _) = build_test_router(backend);

    let (status, json) = send(&app, "GET", "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "degraded");
    assert_eq!(json["checks"]["audio"]["status"], "fail");
    assert!(json["checks"]["audio"]["message"].is_string());
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let (app, sessions) = build_test_router(MockBackend::new());

    let (status, json) = send(&app, "POST", "/sessions/1/start").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["user_id"], "1");
    assert_eq!(json["ok"], true);

    let (status, json) = send(&app, "POST", "/sessions/1/start").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"]["code"], "already_running");

    let (status, json) = send(&app, "GET", "/sessions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sessions"], serde_json::json!(["1"]));

    let (status, json) = send(&app, "GET", "/sessions/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["running"], true);
    assert_eq!(json["language"], "en");

    let (status, _) = send(&app, "POST", "/sessions/1/pause").await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&app, "GET", "/sessions/1").await;
    assert_eq!(json["paused"], true);

    let (status, _) = send(&app, "POST", "/sessions/1/resume").await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(&app, "POST", "/sessions/1/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ok"], true);
    assert!(!sessions.is_running("1"));

    let (status, json) = send(&app, "POST", "/sessions/1/stop").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_unknown_user_cannot_start() {
    let (app, sessions) = build_test_router(MockBackend::new());

    let (status, json) = send(&app, "POST", "/sessions/ghost/start").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "not_found");
    assert!(sessions.running_sessions().is_empty());
}

#[tokio::test]
async fn test_controls_without_session_are_not_found() {
    let (app, _) = build_test_router(MockBackend::new());

    for uri in ["/sessions/1", "/sessions/1/pause", "/sessions/1/resume", "/sessions/1/listen"] {
        let method = if uri == "/sessions/1" { "GET" } else { "POST" };
        let (status, _) = send(&app, method, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
    }
}

#[tokio::test]
async fn test_start_with_listen_now() {
    let (app, sessions) = build_test_router(MockBackend::new());

    let (status, _) = send(&app, "POST", "/sessions/1/start?listen_now=true").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = send(&app, "POST", "/sessions/1/listen").await;
    assert_eq!(status, StatusCode::OK);

    assert_eq!(tokio::task::spawn_blocking(move || sessions.stop_all()).await.unwrap(), 1);
}
