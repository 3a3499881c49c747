//! Service info and health check endpoints

use crate::state::HasServices;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub docs: String,
    pub health: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// "healthy" or "degraded"
    pub status: String,
    pub version: String,
    /// "connected" or "disconnected"
    pub store: String,
    pub active_tasks: usize,
    pub github_configured: bool,
}

#[utoipa::path(
    get,
    path = "/",
    tag = "System",
    responses((status = 200, description = "Service information", body = ServiceInfo))
)]
pub async fn root() -> impl IntoResponse {
    Json(ServiceInfo {
        name: "coding-agents-core".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        docs: "/api-docs/openapi.json".to_string(),
        health: "/health".to_string(),
    })
}

/// Health check; an unreachable store degrades the status instead of failing
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    responses((status = 200, description = "Health status", body = HealthResponse))
)]
pub async fn health<S: HasServices>(State(state): State<S>) -> impl IntoResponse {
    let store_ok = state.check_ready().await;
    let active_tasks = if store_ok {
        match state.task_service().list_active().await {
            Ok(tasks) => tasks.len(),
            Err(e) => {
                tracing::warn!(error = %e, "Health check could not count active tasks");
                0
            }
        }
    } else {
        0
    };

    Json(HealthResponse {
        status: if store_ok { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: if store_ok { "connected" } else { "disconnected" }.to_string(),
        active_tasks,
        github_configured: state.config().github.token.is_some(),
    })
}

#[utoipa::path(
    get,
    path = "/ready",
    tag = "System",
    responses(
        (status = 200, description = "Ready"),
        (status = 503, description = "Task store unreachable")
    )
)]
pub async fn ready<S: HasServices>(State(state): State<S>) -> impl IntoResponse {
    if state.check_ready().await {
        (StatusCode::OK, "ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not_ready")
    }
}
