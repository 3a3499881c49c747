//! Task API HTTP tests

use super::{build_test_router, data, delete_json, get_json, post_empty, post_json, TestAppState};
use crate::api::ScriptedRunner;
use axum::http::StatusCode;
use coding_agents_core::domain::{CreateTaskInput, TaskStatus};
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn test_create_task_defaults() {
    let app = build_test_router(TestAppState::new());

    let (status, body): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/tasks",
        &json!({"type": "code-agent", "issue_number": 42, "max_iterations": 5}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let task = data(&body);
    assert!(!task["id"].as_str().unwrap().is_empty());
    assert_eq!(task["type"], "code-agent");
    assert_eq!(task["status"], "pending");
    assert_eq!(task["progress"], 0.0);
    assert_eq!(task["branch_name"], "agent/issue-42");
}

#[tokio::test]
async fn test_create_task_never_returns_token() {
    let state = TestAppState::new();
    let app = build_test_router(state.clone());

    let (status, body): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/tasks",
        &json!({"type": "reviewer", "pr_number": 9, "github_token": "ghp_secret"}),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert!(!body.unwrap().to_string().contains("ghp_secret"));
}

#[tokio::test]
async fn test_create_task_rejects_iteration_limit() {
    let state = TestAppState::new();
    let app = build_test_router(state.clone());

    let (status, body): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/tasks",
        &json!({"type": "code-agent", "issue_number": 1, "max_iterations": 0}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body.unwrap()["error"], "validation");
    assert!(state.task_service.get_all(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_task_rejects_unknown_type() {
    let app = build_test_router(TestAppState::new());

    let (status, _): (_, Option<Value>) =
        post_json(&app, "/api/v1/tasks", &json!({"type": "planner"})).await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_get_task_not_found() {
    let app = build_test_router(TestAppState::new());

    let (status, body): (_, Option<Value>) = get_json(&app, "/api/v1/tasks/missing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let body = body.unwrap();
    assert_eq!(body["error"], "not_found");
    assert_eq!(body["message"], "Task missing not found");
}

#[tokio::test]
async fn test_get_task() {
    let state = TestAppState::new();
    let task = state
        .task_service
        .create(CreateTaskInput::code_agent(3))
        .await
        .unwrap();
    let app = build_test_router(state);

    let (status, body): (_, Option<Value>) =
        get_json(&app, &format!("/api/v1/tasks/{}", task.id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(data(&body)["id"], task.id.as_str());
    assert_eq!(data(&body)["issue_number"], 3);
}

#[tokio::test]
async fn test_list_tasks_filters() {
    let state = TestAppState::new();
    let first = state
        .task_service
        .create(CreateTaskInput::code_agent(1))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = state
        .task_service
        .create(CreateTaskInput::code_agent(2))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let third = state
        .task_service
        .create(CreateTaskInput::code_agent(3))
        .await
        .unwrap();
    state.task_service.mark_started(&second.id).await.unwrap();
    state.task_service.cancel(&third.id).await.unwrap();
    let app = build_test_router(state);

    let (_, body): (_, Option<Value>) = get_json(&app, "/api/v1/tasks").await;
    let ids: Vec<&str> = data(&body)
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec![third.id.as_str(), second.id.as_str(), first.id.as_str()]);

    let (_, body): (_, Option<Value>) = get_json(&app, "/api/v1/tasks?active_only=true").await;
    let active = data(&body).as_array().unwrap();
    assert_eq!(active.len(), 2);
    assert!(active.iter().all(|t| t["status"] != "cancelled"));

    let (_, body): (_, Option<Value>) = get_json(&app, "/api/v1/tasks?status=running").await;
    let running = data(&body).as_array().unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0]["id"], second.id.as_str());
}

#[tokio::test]
async fn test_cancel_task() {
    let state = TestAppState::new();
    let task = state
        .task_service
        .create(CreateTaskInput::code_agent(5))
        .await
        .unwrap();
    let app = build_test_router(state);

    let (status, body): (_, Option<Value>) =
        delete_json(&app, &format!("/api/v1/tasks/{}", task.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data(&body)["status"], "cancelled");
    assert!(!data(&body)["completed_at"].is_null());

    let (status, _): (_, Option<Value>) = delete_json(&app, "/api/v1/tasks/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_retry_task() {
    let state = TestAppState::new();
    let original = state
        .task_service
        .create(CreateTaskInput::code_agent(8))
        .await
        .unwrap();
    let app = build_test_router(state.clone());

    let retry_path = format!("/api/v1/tasks/{}/retry", original.id);
    let (status, body): (_, Option<Value>) = post_empty(&app, &retry_path).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body.unwrap()["error"], "conflict");

    state
        .task_service
        .mark_failed(&original.id, "tests failed")
        .await
        .unwrap();
    let (status, body): (_, Option<Value>) = post_empty(&app, &retry_path).await;
    assert_eq!(status, StatusCode::CREATED);
    let retried = data(&body);
    assert_ne!(retried["id"], original.id.as_str());
    assert_eq!(retried["status"], "pending");
    assert_eq!(retried["issue_number"], 8);
    assert!(retried["error"].is_null());
    assert!(retried["logs"][0]
        .as_str()
        .unwrap()
        .ends_with(&format!("Retried from task {}", original.id)));

    let (status, _): (_, Option<Value>) = post_empty(&app, "/api/v1/tasks/missing/retry").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_task_logs_tail() {
    let state = TestAppState::new();
    let task = state
        .task_service
        .create(CreateTaskInput::code_agent(4))
        .await
        .unwrap();
    for i in 0..5 {
        state
            .task_service
            .add_log(&task.id, &format!("line {}", i))
            .await
            .unwrap();
    }
    let app = build_test_router(state);

    let (status, body): (_, Option<Value>) =
        get_json(&app, &format!("/api/v1/tasks/{}/logs?limit=2", task.id)).await;
    assert_eq!(status, StatusCode::OK);
    let logs = data(&body)["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs[0].as_str().unwrap().ends_with("line 3"));
    assert!(logs[1].as_str().unwrap().ends_with("line 4"));

    let (_, body): (_, Option<Value>) =
        get_json(&app, &format!("/api/v1/tasks/{}/logs", task.id)).await;
    assert_eq!(data(&body)["logs"].as_array().unwrap().len(), 5);

    let (status, _): (_, Option<Value>) = get_json(&app, "/api/v1/tasks/missing/logs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_task_diff() {
    let state = TestAppState::new();
    let task = state
        .task_service
        .create(CreateTaskInput::code_agent(4))
        .await
        .unwrap();
    state
        .task_service
        .set_files_changed(
            &task.id,
            [("README.md".to_string(), "+docs".to_string())]
                .into_iter()
                .collect(),
        )
        .await
        .unwrap();
    let app = build_test_router(state);

    let (status, body): (_, Option<Value>) =
        get_json(&app, &format!("/api/v1/tasks/{}/diff", task.id)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(data(&body)["task_id"], task.id.as_str());
    assert_eq!(data(&body)["files_changed"]["README.md"], "+docs");
}

#[tokio::test]
async fn test_task_stats() {
    let state = TestAppState::new();
    let done = state
        .task_service
        .create(CreateTaskInput::code_agent(1))
        .await
        .unwrap();
    let failed = state
        .task_service
        .create(CreateTaskInput::code_agent(2))
        .await
        .unwrap();
    state
        .task_service
        .create(CreateTaskInput::code_agent(3))
        .await
        .unwrap();
    state.task_service.mark_started(&done.id).await.unwrap();
    state.task_service.mark_completed(&done.id, None).await.unwrap();
    state.task_service.mark_failed(&failed.id, "boom").await.unwrap();
    let app = build_test_router(state);

    let (status, body): (_, Option<Value>) = get_json(&app, "/api/v1/tasks/stats/summary").await;

    assert_eq!(status, StatusCode::OK);
    let stats = data(&body);
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["active"], 1);
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["failed"], 1);
    assert_eq!(stats["by_status"]["pending"], 1);
}

#[tokio::test]
async fn test_created_task_runs_through_executor() {
    let state = TestAppState::new().with_runner(ScriptedRunner { fail_with: None });
    let app = build_test_router(state.clone());

    let (status, body): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/tasks",
        &json!({"type": "code-agent", "issue_number": 12}),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = data(&body)["id"].as_str().unwrap().to_string();

    let task = wait_for_terminal(&state, &id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 1.0);
    assert!(task.files_changed.contains_key("src/lib.rs"));
    assert_eq!(
        task.result.unwrap()["pr_url"],
        "https://github.com/octocat/hello/pull/12"
    );
}

#[tokio::test]
async fn test_failed_workflow_is_recorded() {
    let state = TestAppState::new().with_runner(ScriptedRunner {
        fail_with: Some("tests failed after 5 iterations".to_string()),
    });
    let app = build_test_router(state.clone());

    let (_, body): (_, Option<Value>) = post_json(
        &app,
        "/api/v1/tasks",
        &json!({"type": "code-agent", "issue_number": 13}),
    )
    .await;
    let id = data(&body)["id"].as_str().unwrap().to_string();

    let task = wait_for_terminal(&state, &id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error.as_deref(), Some("tests failed after 5 iterations"));
    assert!(task
        .logs
        .last()
        .unwrap()
        .ends_with("Task failed: tests failed after 5 iterations"));
}

async fn wait_for_terminal(state: &TestAppState, id: &str) -> coding_agents_core::domain::Task {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(task) = state.task_service.get(id).await.unwrap() {
                if task.is_terminal() {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task did not finish")
}
