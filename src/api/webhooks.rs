//! Signed webhook intake from the 3JMS inventory system.
//!
//! Raw bytes are captured before any JSON parsing so the signature check
//! covers exactly what was sent; the body-size ceiling is enforced by the
//! router layer before this handler runs.

use super::{ApiError, AppState};
use crate::intake::{self, IntakeError, IntakeOutcome};
use crate::models::{Job, WebhookPayload};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookResponse {
    job_id: String,
    status: &'static str,
    job: Job,
}

pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if state.config.webhook_verification_enabled() {
        verify(&state, &headers, &body)?;
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request("invalid_json", e.to_string()))?;

    let valid = intake::validate(&payload).map_err(|errors| {
        ApiError::new(StatusCode::BAD_REQUEST, "validation_failed")
            .with_details(json!(errors))
    })?;

    let outcome = intake::process(
        &state.stores.jobs,
        &valid,
        &state.config.default_theme,
        state.config.image_max_per_sku,
    )
    .map_err(|e| match e {
        IntakeError::Validation(errors) => {
            ApiError::new(StatusCode::BAD_REQUEST, "validation_failed").with_details(json!(errors))
        }
        IntakeError::QuotaReached { sku, max } => ApiError::bad_request(
            "quota_reached",
            format!("sku {} already has {} completed images", sku, max),
        ),
        IntakeError::Store(store_err) => store_err.into(),
    })?;

    Ok(match outcome {
        IntakeOutcome::Created(job) => {
            info!(job_id = %job.id, sku = %job.sku, "Webhook accepted, job created");
            (
                StatusCode::CREATED,
                Json(WebhookResponse {
                    job_id: job.id.clone(),
                    status: "created",
                    job,
                }),
            )
                .into_response()
        }
        IntakeOutcome::Duplicate(job) => {
            info!(job_id = %job.id, sku = %job.sku, "Duplicate webhook delivery");
            (
                StatusCode::OK,
                Json(WebhookResponse {
                    job_id: job.id.clone(),
                    status: "duplicate",
                    job,
                }),
            )
                .into_response()
        }
    })
}

fn verify(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), ApiError> {
    let Some(secret) = state.config.webhook_secret.as_deref() else {
        warn!("Webhook rejected: verification enabled but no secret configured");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "signature_required"));
    };
    let provided = intake::SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "signature_missing"))?;

    if !intake::verify_signature(secret, body, provided) {
        warn!("Webhook rejected: bad signature");
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "signature_invalid"));
    }
    Ok(())
}
