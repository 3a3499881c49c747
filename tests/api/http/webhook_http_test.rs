//! GitHub webhook HTTP tests

use super::{build_test_router, create_test_config, TestAppState};
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tower::ServiceExt;

const SECRET: &str = "webhook-secret";

async fn deliver(app: &Router, payload: &Value, signature: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/webhooks/github")
        .header("Content-Type", "application/json");
    if let Some(signature) = signature {
        request = request.header("X-Hub-Signature-256", signature);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::from(payload.to_string())).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

fn sign(payload: &Value) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(SECRET.as_bytes()).unwrap();
    mac.update(payload.to_string().as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn signed_app() -> Router {
    let mut config = create_test_config();
    config.github.webhook_secret = Some(SECRET.to_string());
    build_test_router(TestAppState::with_config(config))
}

#[tokio::test]
async fn test_labelled_issue_triggers_code_agent() {
    let app = build_test_router(TestAppState::new());
    let payload = json!({
        "action": "labeled",
        "issue": {"number": 42, "labels": [{"name": "bug"}, {"name": "agent-task"}]}
    });

    let (status, body) = deliver(&app, &payload, None).await;

    assert_eq!(status, StatusCode::OK);
    let outcome = &body["data"];
    assert_eq!(outcome["status"], "triggered");
    assert_eq!(outcome["agent"], "code-agent");
    assert_eq!(outcome["issue"], 42);
}

#[tokio::test]
async fn test_pull_request_triggers_reviewer() {
    let app = build_test_router(TestAppState::new());
    let payload = json!({"action": "opened", "pull_request": {"number": 7}});

    let (_, body) = deliver(&app, &payload, None).await;

    let outcome = &body["data"];
    assert_eq!(outcome["agent"], "reviewer-agent");
    assert_eq!(outcome["pr"], 7);
}

#[tokio::test]
async fn test_other_events_are_only_received() {
    let app = build_test_router(TestAppState::new());
    let payload = json!({
        "action": "opened",
        "issue": {"number": 5, "labels": [{"name": "question"}]}
    });

    let (_, body) = deliver(&app, &payload, None).await;

    let outcome = &body["data"];
    assert_eq!(outcome["status"], "received");
    assert_eq!(outcome["event"], "opened");
    assert!(outcome.get("agent").is_none());
}

#[tokio::test]
async fn test_signature_required_when_secret_configured() {
    let app = signed_app();
    let payload = json!({"action": "opened", "pull_request": {"number": 7}});

    let (status, body) = deliver(&app, &payload, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing webhook signature");

    let (status, body) = deliver(&app, &payload, Some("sha256=00ff")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid webhook signature");

    let (status, body) = deliver(&app, &payload, Some(&sign(&payload))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pr"], 7);
}

#[tokio::test]
async fn test_non_json_body_is_rejected() {
    let app = build_test_router(TestAppState::new());
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/webhooks/github")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
