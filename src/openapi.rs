//! OpenAPI document assembly
//!
//! Collects the handler path annotations and domain schemas into the
//! document served at `/api-docs/openapi.json`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Coding Agents Core API",
        version = "0.1.0",
        description = "Task lifecycle, live observation and repository monitoring for coding agents",
        contact(name = "Coding Agents Team")
    ),
    tags(
        (name = "System", description = "Service info and health checks"),
        (name = "Tasks", description = "Task creation, inspection, cancellation and retry"),
        (name = "Streaming", description = "Server-sent events and WebSocket channels"),
        (name = "Monitoring", description = "GitHub repository monitoring"),
        (name = "Webhooks", description = "Inbound GitHub events"),
    ),
    components(
        schemas(
            crate::api::MessageResponse,
            crate::api::health::ServiceInfo,
            crate::api::health::HealthResponse,
            crate::api::task::TaskLogsResponse,
            crate::api::task::TaskDiffResponse,

            crate::domain::Task,
            crate::domain::TaskStatus,
            crate::domain::TaskType,
            crate::domain::TaskStats,
            crate::domain::CreateTaskInput,
            crate::domain::TaskListQuery,
            crate::domain::LogsQuery,

            crate::domain::AddRepoInput,
            crate::domain::RepoSummary,
            crate::domain::MonitorStatus,

            crate::domain::WebhookOutcome,
        )
    ),
    paths(
        crate::api::health::root,
        crate::api::health::health,
        crate::api::health::ready,

        crate::api::task::create,
        crate::api::task::list,
        crate::api::task::stats,
        crate::api::task::get,
        crate::api::task::cancel,
        crate::api::task::retry,
        crate::api::task::logs,
        crate::api::task::diff,

        crate::api::stream::log_stream,
        crate::api::stream::update_stream,
        crate::api::ws::task_socket,

        crate::api::monitor::add_repo,
        crate::api::monitor::list_repos,
        crate::api::monitor::remove_repo,
        crate::api::monitor::status,
        crate::api::monitor::start,
        crate::api::monitor::stop,

        crate::api::webhook::github,
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    pub fn build() -> utoipa::openapi::OpenApi {
        Self::openapi()
    }
}
