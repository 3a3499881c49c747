//! Task API handlers

use crate::api::{task_not_found, SuccessResponse};
use crate::domain::{CreateTaskInput, LogsQuery, Task, TaskListQuery, TaskStats};
use crate::error::Result;
use crate::state::HasServices;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskLogsResponse {
    pub task_id: String,
    pub logs: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TaskDiffResponse {
    pub task_id: String,
    /// path -> unified diff
    pub files_changed: BTreeMap<String, String>,
}

/// Hand a task to the background executor, if one is configured
async fn dispatch<S: HasServices>(state: &S, task: &Task, github_token: Option<String>) {
    let Some(executor) = state.executor() else {
        tracing::debug!(task_id = %task.id, "No workflow runner configured, task stays pending");
        return;
    };
    let token = github_token.or_else(|| state.config().github.token.clone());
    executor.spawn(task, token).await;
}

/// Create task
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    tag = "Tasks",
    request_body = CreateTaskInput,
    responses(
        (status = 201, description = "Task created", body = Task),
        (status = 422, description = "Validation error")
    )
)]
pub async fn create<S: HasServices>(
    State(state): State<S>,
    Json(mut input): Json<CreateTaskInput>,
) -> Result<impl IntoResponse> {
    let github_token = input.github_token.take();
    let task = state.task_service().create(input).await?;
    dispatch(&state, &task, github_token).await;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(task))))
}

/// List tasks, newest first
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    tag = "Tasks",
    params(
        ("status" = Option<String>, Query, description = "Filter by status"),
        ("active_only" = Option<bool>, Query, description = "Only pending, running or reviewing tasks")
    ),
    responses((status = 200, description = "Task list", body = Vec<Task>))
)]
pub async fn list<S: HasServices>(
    State(state): State<S>,
    Query(query): Query<TaskListQuery>,
) -> Result<impl IntoResponse> {
    let tasks = state.task_service().list(&query).await?;
    Ok(Json(SuccessResponse::new(tasks)))
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/stats/summary",
    tag = "Tasks",
    responses((status = 200, description = "Aggregate task statistics", body = TaskStats))
)]
pub async fn stats<S: HasServices>(State(state): State<S>) -> Result<impl IntoResponse> {
    let stats = state.task_service().stats().await?;
    Ok(Json(SuccessResponse::new(stats)))
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Task", body = Task),
        (status = 404, description = "Task not found")
    )
)]
pub async fn get<S: HasServices>(
    State(state): State<S>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let task = state
        .task_service()
        .get(&id)
        .await?
        .ok_or_else(|| task_not_found(&id))?;
    Ok(Json(SuccessResponse::new(task)))
}

/// Cancel task. Already finished tasks are returned unchanged.
#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{id}",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Cancelled task", body = Task),
        (status = 404, description = "Task not found")
    )
)]
pub async fn cancel<S: HasServices>(
    State(state): State<S>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let task = state
        .task_service()
        .cancel(&id)
        .await?
        .ok_or_else(|| task_not_found(&id))?;

    let connections = state.connections();
    connections.broadcast_status(&task.id, task.status).await;
    connections.broadcast_complete(&task).await;
    Ok(Json(SuccessResponse::new(task)))
}

/// Start a new task with the inputs of a finished one
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{id}/retry",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task ID")),
    responses(
        (status = 201, description = "New task", body = Task),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task is still active")
    )
)]
pub async fn retry<S: HasServices>(
    State(state): State<S>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let task = state
        .task_service()
        .retry(&id)
        .await?
        .ok_or_else(|| task_not_found(&id))?;
    dispatch(&state, &task, None).await;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(task))))
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}/logs",
    tag = "Tasks",
    params(
        ("id" = String, Path, description = "Task ID"),
        ("limit" = Option<usize>, Query, description = "Number of trailing lines (default 100)")
    ),
    responses(
        (status = 200, description = "Log tail", body = TaskLogsResponse),
        (status = 404, description = "Task not found")
    )
)]
pub async fn logs<S: HasServices>(
    State(state): State<S>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<impl IntoResponse> {
    let logs = state
        .task_service()
        .logs(&id, query.limit)
        .await?
        .ok_or_else(|| task_not_found(&id))?;
    Ok(Json(SuccessResponse::new(TaskLogsResponse { task_id: id, logs })))
}

#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}/diff",
    tag = "Tasks",
    params(("id" = String, Path, description = "Task ID")),
    responses(
        (status = 200, description = "Changed files", body = TaskDiffResponse),
        (status = 404, description = "Task not found")
    )
)]
pub async fn diff<S: HasServices>(
    State(state): State<S>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let files_changed = state
        .task_service()
        .diff(&id)
        .await?
        .ok_or_else(|| task_not_found(&id))?;
    Ok(Json(SuccessResponse::new(TaskDiffResponse {
        task_id: id,
        files_changed,
    })))
}
