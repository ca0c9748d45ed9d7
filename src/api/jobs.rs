//! Job queries and admin actions.

use super::{ApiError, AppState};
use crate::errors::ErrorCode;
use crate::executors::{self, StepError};
use crate::keys::{self, Aspect, CompositeKind};
use crate::models::{Job, JobUpdate};
use crate::state_machine::JobStatus;
use crate::store::{JobFilter, LeaseGuard};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Single status or comma-separated set.
    pub status: Option<String>,
    pub sku: Option<String>,
    pub theme: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub jobs: Vec<Job>,
    pub count: usize,
    pub limit: u32,
    pub offset: u32,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let mut statuses = Vec::new();
    if let Some(raw) = &query.status {
        for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let status = JobStatus::parse(part).ok_or_else(|| {
                ApiError::bad_request("invalid_status", format!("unknown status {:?}", part))
            })?;
            statuses.push(status);
        }
    }
    let filter = JobFilter {
        statuses,
        sku: query.sku,
        theme: query.theme,
        limit: query.limit,
        offset: query.offset,
    };
    let jobs = state.stores.jobs.list(&filter)?;
    Ok(Json(ListResponse {
        count: jobs.len(),
        limit: filter.limit.unwrap_or(50),
        offset: filter.offset.unwrap_or(0),
        jobs,
    }))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<crate::models::JobStats>, ApiError> {
    Ok(Json(state.stores.jobs.stats()?))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .stores
        .jobs
        .get(&id)?
        .ok_or_else(|| ApiError::not_found(id))?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    #[serde(rename = "type")]
    pub kind: String,
    /// Index into list-valued artifacts, default 0.
    pub index: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub url: String,
    pub key: String,
}

/// Presigned GET for an existing artifact.
pub async fn presign_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PresignQuery>,
) -> Result<Json<PresignResponse>, ApiError> {
    let job = state
        .stores
        .jobs
        .get(&id)?
        .ok_or_else(|| ApiError::not_found(id))?;

    let index = query.index.unwrap_or(0);
    let key = match query.kind.as_str() {
        "original" => job.s3_original_key.clone(),
        "cutout" => job.s3_cutout_key.clone(),
        "mask" => job.s3_mask_key.clone(),
        "composite" => job.s3_composite_keys.get(index).cloned(),
        "derivative" => job.s3_derivative_keys.get(index).cloned(),
        other => {
            return Err(ApiError::bad_request(
                "invalid_type",
                format!("unknown artifact type {:?}", other),
            ))
        }
    }
    .ok_or_else(|| {
        ApiError::bad_request(
            "artifact_missing",
            format!("job has no {} artifact at index {}", query.kind, index),
        )
    })?;

    let url = state
        .providers
        .objects
        .presign_get(&key, 3600)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.code.as_str()))?;
    Ok(Json(PresignResponse { url, key }))
}

#[derive(Debug, Deserialize)]
pub struct PresignCreateRequest {
    pub kind: String,
    pub variant: Option<u32>,
    pub aspect: Option<String>,
    /// Composite flavor: `sharp` or `ai`.
    #[serde(rename = "type")]
    pub composite_kind: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PresignCreateResponse {
    pub put: String,
    pub get: String,
    pub key: String,
}

/// Mint a key for a new artifact and presign both directions.
pub async fn presign_create(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<PresignCreateRequest>,
) -> Result<Json<PresignCreateResponse>, ApiError> {
    let job = state
        .stores
        .jobs
        .get(&id)?
        .ok_or_else(|| ApiError::not_found(id))?;

    let variant = request.variant.unwrap_or(1).max(1);
    let aspect = match request.aspect.as_deref() {
        None => Aspect::Square,
        Some(raw) => Aspect::parse(raw).ok_or_else(|| {
            ApiError::bad_request("invalid_aspect", format!("unknown aspect {:?}", raw))
        })?,
    };
    let key = match request.kind.as_str() {
        "original" => keys::original(&job.sku, &job.image_hash),
        "cutout" => keys::cutout(&job.sku, &job.image_hash),
        "mask" => keys::mask(&job.sku, &job.image_hash),
        "background" => keys::background(&job.sku, &job.image_hash, &job.theme, variant),
        "composite" => {
            let kind = match request.composite_kind.as_deref() {
                Some("ai") => CompositeKind::Ai,
                _ => CompositeKind::Sharp,
            };
            keys::composite(&job.sku, &job.image_hash, &job.theme, aspect, variant, kind)
        }
        "derivative" => {
            let (width, height) = aspect.dimensions();
            keys::derivative(&job.sku, &job.image_hash, &job.theme, aspect, width, height, "jpg")
        }
        "thumbnail" => keys::thumbnail(&job.sku, &job.image_hash),
        "manifest" => keys::manifest(&job.sku, &job.image_hash, &job.theme),
        other => {
            return Err(ApiError::bad_request(
                "invalid_kind",
                format!("unknown artifact kind {:?}", other),
            ))
        }
    };

    let objects = &state.providers.objects;
    let put = objects
        .presign_put(&key, 3600)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.code.as_str()))?;
    let get = objects
        .presign_get(&key, 3600)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.code.as_str()))?;
    Ok(Json(PresignCreateResponse { put, get, key }))
}

/// Re-queue a failed job if eligible.
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .stores
        .jobs
        .retry(&id, state.processor.max_retries())?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub code: String,
    pub message: String,
    pub stack: Option<String>,
}

/// Manually fail a job (terminal).
pub async fn fail(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<FailRequest>,
) -> Result<Json<Job>, ApiError> {
    let code = ErrorCode::parse(&request.code).ok_or_else(|| {
        ApiError::bad_request("invalid_code", format!("unknown error code {:?}", request.code))
    })?;
    if !code.is_persistable() {
        return Err(ApiError::bad_request(
            "invalid_code",
            format!("{} is never persisted on a job", code),
        ));
    }
    let update = JobUpdate {
        error_code: Some(code),
        error_message: Some(request.message),
        error_stack: request.stack,
        ..Default::default()
    };
    let job = state
        .stores
        .jobs
        .update_status(&id, JobStatus::Failed, update, LeaseGuard::Admin)?;
    Ok(Json(job))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub status: &'static str,
    pub job: Job,
}

/// Force the storefront-push step for a DONE/DERIVATIVES job. Idempotent:
/// jobs already carrying media ids are returned unchanged.
pub async fn push_shopify(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PushResponse>, ApiError> {
    let job = state
        .stores
        .jobs
        .get(&id)?
        .ok_or_else(|| ApiError::not_found(id.clone()))?;

    if !job.shopify_media_ids.is_empty() {
        return Ok(Json(PushResponse {
            status: "already_pushed",
            job,
        }));
    }
    if !matches!(
        job.status,
        JobStatus::Derivatives | JobStatus::ShopifyPush | JobStatus::Done
    ) {
        return Err(ApiError::bad_request(
            "invalid_status",
            format!("push-shopify requires DONE or DERIVATIVES, found {}", job.status),
        ));
    }

    let owner = format!("admin-{}", Uuid::new_v4());
    let leased = state
        .stores
        .jobs
        .try_lease(&id, &owner, 10 * 60 * 1000)?
        .ok_or_else(|| {
            ApiError::new(StatusCode::CONFLICT, "lease_conflict")
                .with_details(json!("job is being processed"))
        })?;

    let mut ctx = state.processor.executor_context();
    ctx.owner = owner;
    let result = executors::force_push(&ctx, &leased).await;
    if result.is_err() {
        // Leave the job reachable for the processor and future retries.
        let _ = state.stores.jobs.release_lease(&id, &ctx.owner);
    }
    let pushed = result.map_err(|e| match e {
            StepError::Provider(p) if p.code == ErrorCode::ProductNotFound => {
                ApiError::new(StatusCode::NOT_FOUND, p.code.as_str()).with_details(json!(p.message))
            }
            StepError::Provider(p) => {
                ApiError::new(StatusCode::BAD_GATEWAY, p.code.as_str()).with_details(json!(p.message))
            }
            StepError::Store(s) => s.into(),
            StepError::Cancelled => ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
        })?;
    Ok(Json(PushResponse {
        status: "pushed",
        job: pushed,
    }))
}
