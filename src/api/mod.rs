//! HTTP control plane: thin handlers over the stores and processor.
//!
//! Every route validates input, calls one store/processor operation, and
//! serializes the result. Error bodies are `{ error, details? }` with the
//! taxonomy code where one applies.

pub mod jobs;
pub mod objects;
pub mod processor_api;
pub mod webhooks;

use crate::config::Config;
use crate::errors::StoreError;
use crate::middleware::{rate_limit_middleware, RateLimiter};
use crate::processor::Processor;
use crate::providers::{FsObjectStore, ProviderSet};
use crate::store::Stores;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    middleware as axum_mw,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Webhook bodies above this are rejected 413. Exactly this size is
/// accepted.
pub const MAX_WEBHOOK_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub stores: Arc<Stores>,
    pub providers: ProviderSet,
    pub processor: Arc<Processor>,
    pub http: reqwest::Client,
    /// Set when the filesystem object store backs storage; enables the
    /// presigned-object routes.
    pub fs_objects: Option<Arc<FsObjectStore>>,
}

/// Typed HTTP error: `{ error, details? }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: String,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found").with_details(json!(what.into()))
    }

    pub fn bad_request(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error).with_details(json!(details.into()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "error": self.error });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => Self::not_found(id),
            StoreError::Transition(t) => {
                Self::new(StatusCode::BAD_REQUEST, t.code().as_str()).with_details(json!(t.to_string()))
            }
            StoreError::RetryNotEligible { reason, .. } => {
                Self::bad_request("retry_not_eligible", reason)
            }
            StoreError::LeaseLost { id, .. } => {
                Self::new(StatusCode::CONFLICT, "lease_conflict").with_details(json!(id))
            }
            StoreError::InvalidInput(msg) => Self::bad_request("invalid_input", msg),
            StoreError::Corrupt { id, detail } => {
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Unknown")
                    .with_details(json!(format!("{}: {}", id, detail)))
            }
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                .with_details(json!(other.to_string())),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let limiter = RateLimiter::new(
        state.config.rate_limit_max,
        Duration::from_secs(state.config.rate_limit_window_secs),
    );

    let webhook_routes = Router::new()
        .route("/webhooks/3jms/images", post(webhooks::receive))
        .layer(DefaultBodyLimit::max(MAX_WEBHOOK_BYTES))
        .layer(axum_mw::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));

    let job_routes = Router::new()
        .route("/jobs", get(jobs::list))
        .route("/jobs/stats", get(jobs::stats))
        .route("/jobs/:id", get(jobs::get_one))
        .route(
            "/jobs/:id/presign",
            get(jobs::presign_get).post(jobs::presign_create),
        )
        .route("/jobs/:id/retry", post(jobs::retry))
        .route("/jobs/:id/fail", post(jobs::fail))
        .route("/jobs/:id/push-shopify", post(jobs::push_shopify));

    let processor_routes = Router::new()
        .route("/processor/status", get(processor_api::status))
        .route("/processor/start", post(processor_api::start))
        .route("/processor/stop", post(processor_api::stop));

    Router::new()
        .route("/health", get(health))
        .merge(webhook_routes)
        .merge(job_routes)
        .merge(processor_routes)
        .route(
            "/objects/*key",
            get(objects::serve).put(objects::upload),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "PhotoPipe operational"
}
