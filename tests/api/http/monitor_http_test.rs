//! Repository monitoring HTTP tests

use super::{
    build_test_router, create_test_config, data, delete_json, get_json, post_empty, post_json,
    TestAppState,
};
use crate::api::{issue, TokenRunner};
use axum::http::StatusCode;
use coding_agents_core::runner::IssueTaskCallback;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn state_with_token() -> TestAppState {
    let mut config = create_test_config();
    config.github.token = Some("ghp_configured".to_string());
    TestAppState::with_config(config)
}

#[tokio::test]
async fn test_add_repo_requires_token() {
    let app = build_test_router(TestAppState::new());

    let (status, body): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/monitoring/repos",
        &json!({"owner": "octocat", "repo": "hello"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body.unwrap()["error"], "bad_request");
}

#[tokio::test]
async fn test_add_repo_with_explicit_token() {
    let app = build_test_router(TestAppState::new());

    let (status, body): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/monitoring/repos",
        &json!({"owner": "octocat", "repo": "hello", "github_token": "ghp_x", "poll_interval": 120}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let summary = data(&body);
    assert_eq!(summary["repo"], "octocat/hello");
    assert_eq!(summary["poll_interval"], 120);
    assert_eq!(summary["processed_issues"], 0);
    assert!(!body.unwrap().to_string().contains("ghp_x"));
}

#[tokio::test]
async fn test_add_repo_validates_interval() {
    let app = build_test_router(state_with_token());

    let (status, _): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/monitoring/repos",
        &json!({"owner": "octocat", "repo": "hello", "poll_interval": 1}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_list_and_remove_repos() {
    let app = build_test_router(state_with_token());
    for repo in ["zeta", "alpha"] {
        let (status, _): (_, Option<Value>) = post_json(
            &app,
            "/api/v1/monitoring/repos",
            &json!({"owner": "octocat", "repo": repo}),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body): (_, Option<Value>) = get_json(&app, "/api/v1/monitoring/repos").await;
    assert_eq!(status, StatusCode::OK);
    let repos: Vec<&str> = data(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["repo"].as_str().unwrap())
        .collect();
    assert_eq!(repos, vec!["octocat/alpha", "octocat/zeta"]);

    let (status, body): (_, Option<Value>) =
        delete_json(&app, "/api/v1/monitoring/repos/octocat/zeta").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["message"], "Stopped monitoring octocat/zeta");

    let (status, _): (_, Option<Value>) =
        delete_json(&app, "/api/v1/monitoring/repos/octocat/zeta").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_stop_status() {
    let state = state_with_token();
    let app = build_test_router(state.clone());
    let (_, _): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/monitoring/repos",
        &json!({"owner": "octocat", "repo": "hello", "poll_interval": 3600}),
    )
    .await;

    let (_, body): (_, Option<Value>) = get_json(&app, "/api/v1/monitoring/status").await;
    assert_eq!(data(&body)["running"], false);
    assert_eq!(data(&body)["repos_count"], 1);

    let (status, body): (_, Option<Value>) = post_empty(&app, "/api/v1/monitoring/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.unwrap()["message"], "Monitor started");
    let (_, body): (_, Option<Value>) = post_empty(&app, "/api/v1/monitoring/start").await;
    assert_eq!(body.unwrap()["message"], "Monitor already running");

    let (_, body): (_, Option<Value>) = get_json(&app, "/api/v1/monitoring/status").await;
    assert_eq!(data(&body)["running"], true);

    let (status, _): (_, Option<Value>) = post_empty(&app, "/api/v1/monitoring/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!state.monitor.is_running());
}

#[tokio::test]
async fn test_new_issues_become_tasks_once() {
    let state = state_with_token();
    state
        .monitor
        .register_callback(Arc::new(IssueTaskCallback::new(
            state.task_service.clone(),
            None,
            None,
        )))
        .await;
    let app = build_test_router(state.clone());
    let (status, _): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/monitoring/repos",
        &json!({"owner": "octocat", "repo": "hello"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    state.issues.queue(vec![issue(101, &[]), issue(102, &[])]).await;
    assert_eq!(state.monitor.poll_repo_once("octocat", "hello").await.unwrap(), 2);
    state.issues.queue(vec![issue(102, &[]), issue(103, &[])]).await;
    assert_eq!(state.monitor.poll_repo_once("octocat", "hello").await.unwrap(), 1);

    let (_, body): (_, Option<Value>) = get_json(&app, "/api/v1/tasks").await;
    let mut issues: Vec<u64> = data(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["issue_number"].as_u64().unwrap())
        .collect();
    issues.sort();
    assert_eq!(issues, vec![101, 102, 103]);

    let (_, body): (_, Option<Value>) = get_json(&app, "/api/v1/monitoring/status").await;
    assert_eq!(data(&body)["repos"][0]["processed_issues"], 3);
}

#[tokio::test]
async fn test_issue_runs_with_the_repository_credential() {
    let runner = Arc::new(TokenRunner::default());
    let state = TestAppState::new().with_shared_runner(runner.clone());
    state
        .monitor
        .register_callback(Arc::new(IssueTaskCallback::new(
            state.task_service.clone(),
            state.executor.clone(),
            state.config.github.token.clone(),
        )))
        .await;
    let app = build_test_router(state.clone());

    let (status, _): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/monitoring/repos",
        &json!({"owner": "octocat", "repo": "hello", "github_token": "repo-token"}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    state.issues.queue(vec![issue(201, &[])]).await;
    assert_eq!(state.monitor.poll_repo_once("octocat", "hello").await.unwrap(), 1);

    let executor = state.executor.as_ref().unwrap();
    assert_eq!(executor.shutdown(Duration::from_secs(30)).await, 0);
    assert_eq!(
        *runner.tokens.lock().await,
        vec![Some("repo-token".to_string())]
    );
}
