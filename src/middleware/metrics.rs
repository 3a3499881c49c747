//! HTTP observability middleware
//!
//! A Tower Layer/Service combining request ID propagation and HTTP metrics.

use axum::{body::Body, http::Request, response::Response};
use metrics::{counter, gauge, histogram};
use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Instant,
};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Tower Layer for HTTP observability (request ID + metrics).
#[derive(Clone)]
pub struct ObservabilityLayer;

impl<S> Layer<S> for ObservabilityLayer {
    type Service = ObservabilityMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ObservabilityMiddleware { inner }
    }
}

#[derive(Clone)]
pub struct ObservabilityMiddleware<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for ObservabilityMiddleware<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let method = request.method().to_string();
        let path = normalize_path(request.uri().path());

        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        gauge!("coding_agents_http_requests_in_flight").increment(1.0);
        let start = Instant::now();

        let mut inner = self.inner.clone();
        let span = tracing::info_span!("request", request_id = %request_id);

        Box::pin(
            async move {
                let result = inner.call(request).await;
                gauge!("coding_agents_http_requests_in_flight").decrement(1.0);
                let mut response = result?;

                // Streams and upgrades are counted when their headers go out.
                let duration = start.elapsed().as_secs_f64();
                let status = response.status().as_u16().to_string();
                counter!("coding_agents_http_requests_total", "method" => method.clone(), "path" => path.clone(), "status" => status)
                    .increment(1);
                histogram!("coding_agents_http_request_duration_seconds", "method" => method, "path" => path)
                    .record(duration);

                if let Ok(val) = request_id.parse() {
                    response.headers_mut().insert(REQUEST_ID_HEADER, val);
                }
                Ok(response)
            }
            .instrument(span),
        )
    }
}

/// Collapse id-like segments to `{id}` and repository coordinates to
/// `{owner}/{repo}` to keep label cardinality bounded.
fn normalize_path(path: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut after_repos = 0;
    for seg in path.split('/') {
        if after_repos > 0 {
            out.push(if after_repos == 2 { "{owner}" } else { "{repo}" });
            after_repos -= 1;
            continue;
        }
        if seg == "repos" && out.last() == Some(&"monitoring") {
            after_repos = 2;
            out.push(seg);
            continue;
        }
        out.push(if looks_like_id(seg) { "{id}" } else { seg });
    }
    out.join("/")
}

fn looks_like_id(s: &str) -> bool {
    let uuid = s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-');
    let number = !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    uuid || number
}
