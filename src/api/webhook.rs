//! GitHub webhook intake

use crate::api::SuccessResponse;
use crate::domain::WebhookOutcome;
use crate::error::{AppError, Result};
use crate::state::HasServices;
use axum::{body::Bytes, extract::State, http::HeaderMap, response::IntoResponse, Json};
use hmac::{Hmac, Mac};
use metrics::counter;
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Check a `sha256=<hex>` HMAC of the raw body
fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let expected_hex = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(expected_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Report which workflow an event would start. Nothing is executed here.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/github",
    tag = "Webhooks",
    request_body(content = String, description = "Raw GitHub event payload", content_type = "application/json"),
    responses(
        (status = 200, description = "Event classified", body = WebhookOutcome),
        (status = 400, description = "Body is not JSON"),
        (status = 401, description = "Missing or invalid signature")
    )
)]
pub async fn github<S: HasServices>(
    State(state): State<S>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let config = state.config();
    if let Some(secret) = config.github.webhook_secret.as_deref() {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if signature.is_empty() {
            tracing::warn!("GitHub webhook received without signature header");
            return Err(AppError::Unauthorized("Missing webhook signature".to_string()));
        }
        if !verify_signature(secret, &body, signature) {
            tracing::warn!("GitHub webhook signature verification failed");
            return Err(AppError::Unauthorized("Invalid webhook signature".to_string()));
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("Invalid webhook payload: {}", e)))?;
    let outcome = WebhookOutcome::classify(&payload, &config.github.trigger_label);

    counter!("coding_agents_webhooks_total", "status" => outcome.status.clone()).increment(1);
    tracing::info!(
        status = %outcome.status,
        agent = outcome.agent.as_deref().unwrap_or("-"),
        "GitHub webhook received"
    );
    Ok(Json(SuccessResponse::new(outcome)))
}
