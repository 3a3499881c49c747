//! Repository monitoring API handlers

use crate::api::{MessageResponse, SuccessResponse};
use crate::domain::{repo_key, AddRepoInput, MonitorStatus, RepoSummary};
use crate::error::{AppError, Result};
use crate::state::HasServices;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use validator::Validate;

/// Start monitoring a repository
#[utoipa::path(
    post,
    path = "/api/v1/monitoring/repos",
    tag = "Monitoring",
    request_body = AddRepoInput,
    responses(
        (status = 201, description = "Repository registered", body = RepoSummary),
        (status = 400, description = "No GitHub token available"),
        (status = 422, description = "Validation error")
    )
)]
pub async fn add_repo<S: HasServices>(
    State(state): State<S>,
    Json(input): Json<AddRepoInput>,
) -> Result<impl IntoResponse> {
    input.validate()?;
    let token = input
        .github_token
        .clone()
        .or_else(|| state.config().github.token.clone())
        .ok_or_else(|| {
            AppError::BadRequest(
                "github_token is required when GITHUB_TOKEN is not configured".to_string(),
            )
        })?;

    let record = state
        .monitor()
        .add(&input.owner, &input.repo, &token, input.poll_interval)
        .await?;
    Ok((StatusCode::CREATED, Json(SuccessResponse::new(record.summary()))))
}

#[utoipa::path(
    get,
    path = "/api/v1/monitoring/repos",
    tag = "Monitoring",
    responses((status = 200, description = "Monitored repositories", body = Vec<RepoSummary>))
)]
pub async fn list_repos<S: HasServices>(State(state): State<S>) -> Result<impl IntoResponse> {
    Ok(Json(SuccessResponse::new(state.monitor().list().await)))
}

#[utoipa::path(
    delete,
    path = "/api/v1/monitoring/repos/{owner}/{repo}",
    tag = "Monitoring",
    params(
        ("owner" = String, Path, description = "Repository owner"),
        ("repo" = String, Path, description = "Repository name")
    ),
    responses(
        (status = 200, description = "Repository removed", body = MessageResponse),
        (status = 404, description = "Repository not monitored")
    )
)]
pub async fn remove_repo<S: HasServices>(
    State(state): State<S>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let key = repo_key(&owner, &repo);
    if !state.monitor().remove(&owner, &repo).await? {
        return Err(AppError::NotFound(format!(
            "Repository {} is not monitored",
            key
        )));
    }
    Ok(Json(MessageResponse::new(format!(
        "Stopped monitoring {}",
        key
    ))))
}

#[utoipa::path(
    get,
    path = "/api/v1/monitoring/status",
    tag = "Monitoring",
    responses((status = 200, description = "Monitor status", body = MonitorStatus))
)]
pub async fn status<S: HasServices>(State(state): State<S>) -> Result<impl IntoResponse> {
    Ok(Json(SuccessResponse::new(state.monitor().status().await)))
}

/// Start polling every registered repository
#[utoipa::path(
    post,
    path = "/api/v1/monitoring/start",
    tag = "Monitoring",
    responses((status = 200, description = "Monitor running", body = MessageResponse))
)]
pub async fn start<S: HasServices>(State(state): State<S>) -> Result<impl IntoResponse> {
    let message = if state.monitor().start().await {
        "Monitor started"
    } else {
        "Monitor already running"
    };
    Ok(Json(MessageResponse::new(message)))
}

#[utoipa::path(
    post,
    path = "/api/v1/monitoring/stop",
    tag = "Monitoring",
    responses((status = 200, description = "Monitor stopped", body = MessageResponse))
)]
pub async fn stop<S: HasServices>(State(state): State<S>) -> Result<impl IntoResponse> {
    state.monitor().stop().await;
    Ok(Json(MessageResponse::new("Monitor stopped")))
}
