//! Prometheus metrics setup and metric definitions

use anyhow::Context;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    // Prometheus defaults plus sub-millisecond buckets for cheap endpoints
    let buckets = vec![
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(&buckets)
        .context("failed to set histogram buckets")?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}

/// Register metric descriptions and emit zero values so HELP/TYPE lines are
/// present from startup.
pub fn describe_metrics() {
    // HTTP
    describe_counter!(
        "coding_agents_http_requests_total",
        "Total number of HTTP requests"
    );
    describe_histogram!(
        "coding_agents_http_request_duration_seconds",
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        "coding_agents_http_requests_in_flight",
        "Number of HTTP requests currently being processed"
    );

    // Tasks
    describe_counter!("coding_agents_tasks_created_total", "Tasks created by type");
    describe_counter!(
        "coding_agents_task_transitions_total",
        "Task status transitions by target status"
    );
    describe_counter!(
        "coding_agents_tasks_cleaned_total",
        "Terminal tasks removed by the retention sweep"
    );

    // Observers
    describe_counter!("coding_agents_sse_streams_total", "SSE streams opened by kind");
    describe_gauge!(
        "coding_agents_ws_connections",
        "Currently registered WebSocket connections"
    );
    describe_counter!(
        "coding_agents_ws_messages_total",
        "WebSocket messages delivered by type"
    );

    // Repository monitor
    describe_counter!(
        "coding_agents_monitor_polls_total",
        "Repository poll cycles by result"
    );
    describe_counter!(
        "coding_agents_monitor_new_issues_total",
        "Newly detected issues"
    );
    describe_counter!(
        "coding_agents_monitor_callback_failures_total",
        "Issue callbacks that failed"
    );
    describe_counter!(
        "coding_agents_webhooks_total",
        "GitHub webhook deliveries by outcome"
    );

    counter!("coding_agents_tasks_created_total", "type" => "code-agent").absolute(0);
    counter!("coding_agents_tasks_cleaned_total").absolute(0);
    counter!("coding_agents_monitor_polls_total", "result" => "ok").absolute(0);
    counter!("coding_agents_monitor_polls_total", "result" => "error").absolute(0);
    counter!("coding_agents_monitor_new_issues_total").absolute(0);
    counter!("coding_agents_monitor_callback_failures_total").absolute(0);
    gauge!("coding_agents_ws_connections").set(0.0);
    gauge!("coding_agents_http_requests_in_flight").set(0.0);
}
