// HTTP-level tests against the full router with in-memory tiers.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use converge_session_api::{app, AppState, SessionService};
use converge_storage::privacy::PrivacyEngine;
use converge_storage::{
    build_registry, BroadcastEventSink, HotConfig, StorageConfig, WarmConfig,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app() -> axum::Router {
    let registry = Arc::new(
        build_registry(StorageConfig {
            warm: Some(WarmConfig::Memory),
            hot: Some(HotConfig::Memory {
                capacity: 64,
                idle_ttl_secs: 300,
            }),
            cold: None,
        })
        .await
        .unwrap(),
    );
    let service = Arc::new(
        SessionService::new(
            registry.clone(),
            Arc::new(PrivacyEngine::disabled()),
            Arc::new(BroadcastEventSink::default()),
            Arc::new(parking_lot::RwLock::new(vec![])),
        )
        .unwrap(),
    );
    app(AppState::new(service, registry).unwrap())
}

async fn send(router: &axum::Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    let request = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::from(body.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn session_lifecycle_over_http() {
    let router = test_app().await;

    // Create
    let (status, session) = send(
        &router,
        "POST",
        "/sessions",
        Some(json!({"agentName": "support-bot", "workspace": "acme", "tags": ["t1"]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = session["id"].as_str().unwrap().to_string();

    // Idempotent re-create with the same id
    let (status, replay) = send(
        &router,
        "POST",
        "/sessions",
        Some(json!({"id": session_id, "agentName": "support-bot", "workspace": "acme"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(replay["id"], session["id"]);
    assert_eq!(replay["createdAt"], session["createdAt"]);

    // Append two messages, ids must differ and come back assigned
    let (status, first) = send(
        &router,
        "POST",
        &format!("/sessions/{session_id}/messages"),
        Some(json!({"role": "user", "content": "hello"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let (_, second) = send(
        &router,
        "POST",
        &format!("/sessions/{session_id}/messages"),
        Some(json!({"role": "assistant", "content": "hi there"})),
    )
    .await;
    assert_ne!(first["id"], second["id"]);

    // Stable listing order
    let (status, listed) = send(
        &router,
        "GET",
        &format!("/sessions/{session_id}/messages"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["count"], 2);
    assert_eq!(listed["items"][0]["content"], "hello");
    assert_eq!(listed["items"][1]["content"], "hi there");

    // Eval batch with one conversation-level result (empty messageId)
    let (status, _) = send(
        &router,
        "POST",
        &format!("/sessions/{session_id}/eval-results"),
        Some(json!({"results": [
            {"messageId": "", "evalId": "tone", "evalType": "heuristic", "passed": true},
            {"messageId": first["id"], "evalId": "accuracy", "evalType": "llm-judge", "passed": false}
        ]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    // Query with filters
    let (status, failed) = send(
        &router,
        "GET",
        &format!("/eval-results?sessionId={session_id}&passed=false"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed["count"], 1);
    assert_eq!(failed["items"][0]["evalId"], "accuracy");

    // Delete cascades
    let (status, _) = send(&router, "DELETE", &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&router, "GET", &format!("/sessions/{session_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, evals) = send(
        &router,
        "GET",
        &format!("/eval-results?sessionId={session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(evals["count"], 0);
}

#[tokio::test]
async fn errors_are_lowercase_json() {
    let router = test_app().await;

    let (status, body) = send(
        &router,
        "POST",
        "/sessions",
        Some(json!({"agentName": "  ", "workspace": "acme"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["error"].as_str().unwrap();
    assert_eq!(message, message.to_lowercase());

    let (status, body) = send(
        &router,
        "GET",
        "/sessions/018f4e2a-1111-7000-8000-000000000001",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn health_and_metrics_endpoints() {
    let router = test_app().await;

    let (status, body) = send(&router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&router, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");

    // Drive one tracked route, then confirm it shows up in the metrics text
    let _ = send(&router, "GET", "/eval-results", None).await;
    let response = router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec(),
    )
    .unwrap();
    assert!(text.contains("http_requests_total"));
}

#[tokio::test]
async fn opt_out_blocks_session_creation() {
    let router = test_app().await;

    let (status, _) = send(
        &router,
        "PUT",
        "/privacy/preferences/user-7",
        Some(json!({"optedOut": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        "POST",
        "/sessions",
        Some(json!({"agentName": "support-bot", "workspace": "acme", "userId": "user-7"})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("opted out"));
}
