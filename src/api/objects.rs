//! Serving side of the filesystem object store's presigned URLs.
//!
//! GET and PUT against `/objects/{key}` carry the method, expiry, and
//! HMAC token minted by `FsObjectStore::presign_*`. Deployments using an
//! external object store do not mount these routes' backing store and get
//! 404s here.

use super::{ApiError, AppState};
use crate::providers::ObjectStore;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    pub method: Option<String>,
    pub expires: u64,
    pub signature: String,
}

pub async fn serve(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, ApiError> {
    let Some(fs) = &state.fs_objects else {
        return Err(ApiError::not_found("object store not served here"));
    };
    let method = query.method.as_deref().unwrap_or("GET");
    if method != "GET" || !fs.verify("GET", &key, query.expires, &query.signature) {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "signature_invalid"));
    }
    let bytes = fs
        .get(&key)
        .await
        .map_err(|_| ApiError::not_found(key.clone()))?;
    Ok((
        [(header::CONTENT_TYPE, content_type_for(&key))],
        bytes,
    )
        .into_response())
}

pub async fn upload(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<SignedQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let Some(fs) = &state.fs_objects else {
        return Err(ApiError::not_found("object store not served here"));
    };
    let method = query.method.as_deref().unwrap_or("PUT");
    if method != "PUT" || !fs.verify("PUT", &key, query.expires, &query.signature) {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "signature_invalid"));
    }
    fs.put(&key, &body, content_type_for(&key))
        .await
        .map_err(|e| {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.code.as_str())
        })?;
    Ok(StatusCode::CREATED)
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("json") => "application/json",
        _ => "image/jpeg",
    }
}
