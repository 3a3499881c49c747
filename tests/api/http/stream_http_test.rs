//! SSE endpoint HTTP tests

use super::{build_test_router, get_text, TestAppState};
use axum::http::StatusCode;
use coding_agents_core::domain::CreateTaskInput;
use serde_json::Value;
use std::time::Duration;

/// (event name, JSON data) per SSE frame; comment frames are skipped
fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|frame| {
            let mut name = None;
            let mut data = None;
            for line in frame.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data = serde_json::from_str(v.trim()).ok();
                }
            }
            Some((name?, data?))
        })
        .collect()
}

fn names(events: &[(String, Value)]) -> Vec<&str> {
    events.iter().map(|(name, _)| name.as_str()).collect()
}

#[tokio::test]
async fn test_log_stream_unknown_task_sends_single_error() {
    let app = build_test_router(TestAppState::new());

    let (status, body) = get_text(&app, "/api/v1/tasks/nope/logs/stream").await;

    assert_eq!(status, StatusCode::OK);
    let events = parse_sse(&body);
    assert_eq!(names(&events), vec!["error"]);
    assert_eq!(events[0].1["error"], "Task nope not found");
}

#[tokio::test]
async fn test_update_stream_unknown_task_sends_single_error() {
    let app = build_test_router(TestAppState::new());

    let (_, body) = get_text(&app, "/api/v1/tasks/nope/stream").await;

    assert_eq!(names(&parse_sse(&body)), vec!["error"]);
}

#[tokio::test]
async fn test_log_stream_of_finished_task_replays_backlog() {
    let state = TestAppState::new();
    let task = state
        .task_service
        .create(CreateTaskInput::code_agent(1))
        .await
        .unwrap();
    state.task_service.mark_started(&task.id).await.unwrap();
    state.task_service.add_log(&task.id, "working").await.unwrap();
    state
        .task_service
        .mark_completed(&task.id, Some(serde_json::json!({"ok": true})))
        .await
        .unwrap();
    let app = build_test_router(state);

    let (_, body) = get_text(&app, &format!("/api/v1/tasks/{}/logs/stream", task.id)).await;

    let events = parse_sse(&body);
    assert_eq!(names(&events), vec!["log", "log", "log", "done"]);
    assert!(events[1].1["message"].as_str().unwrap().ends_with("working"));
    let done = &events[3].1;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["progress"], 1.0);
    assert_eq!(done["result"]["ok"], true);
}

#[tokio::test]
async fn test_log_stream_follows_running_task() {
    let state = TestAppState::new();
    let task = state
        .task_service
        .create(CreateTaskInput::code_agent(2))
        .await
        .unwrap();
    state.task_service.mark_started(&task.id).await.unwrap();
    let app = build_test_router(state.clone());

    let tasks = state.task_service.clone();
    let id = task.id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tasks.add_log(&id, "halfway").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tasks.mark_failed(&id, "lint errors").await.unwrap();
    });

    let (_, body) = get_text(&app, &format!("/api/v1/tasks/{}/logs/stream", task.id)).await;

    let events = parse_sse(&body);
    assert!(names(&events).contains(&"status"));
    let logs: Vec<&str> = events
        .iter()
        .filter(|(name, _)| name == "log")
        .map(|(_, data)| data["message"].as_str().unwrap())
        .collect();
    assert_eq!(logs.len(), 3, "{:?}", logs);
    assert!(logs[1].ends_with("halfway"));
    assert!(logs[2].ends_with("Task failed: lint errors"));
    let (last, done) = events.last().unwrap();
    assert_eq!(last, "done");
    assert_eq!(done["error"], "lint errors");
}

#[tokio::test]
async fn test_update_stream_ends_with_complete() {
    let state = TestAppState::new();
    let task = state
        .task_service
        .create(CreateTaskInput::code_agent(3))
        .await
        .unwrap();
    let app = build_test_router(state.clone());

    let tasks = state.task_service.clone();
    let id = task.id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        tasks.cancel(&id).await.unwrap();
    });

    let (_, body) = get_text(&app, &format!("/api/v1/tasks/{}/stream", task.id)).await;

    let events = parse_sse(&body);
    assert_eq!(events.first().unwrap().0, "init");
    assert_eq!(events.first().unwrap().1["status"], "pending");
    let (last, snapshot) = events.last().unwrap();
    assert_eq!(last, "complete");
    assert_eq!(snapshot["status"], "cancelled");
    assert_eq!(snapshot["id"], task.id.as_str());
}
