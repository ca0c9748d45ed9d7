//! Shared data model: the job record, its update set, and wire payloads.

use crate::errors::ErrorCode;
use crate::state_machine::JobStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The central pipeline record. One row per (sku, image_hash, theme).
///
/// Timestamps are epoch milliseconds. List-valued artifact fields are
/// stored as JSON arrays and parsed at the read boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub sku: String,
    pub image_hash: String,
    pub theme: String,
    pub status: JobStatus,
    pub attempt: u32,
    pub source_url: String,

    pub s3_original_key: Option<String>,
    pub s3_cutout_key: Option<String>,
    pub s3_mask_key: Option<String>,
    pub s3_bg_keys: Vec<String>,
    pub s3_composite_keys: Vec<String>,
    pub s3_derivative_keys: Vec<String>,
    pub s3_manifest_key: Option<String>,
    pub shopify_media_ids: Vec<String>,
    pub shopify_product_id: Option<String>,

    pub provider_job_id: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,

    pub cost_usd: f64,
    pub step_durations_ms: BTreeMap<String, i64>,

    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub lease_until: Option<i64>,
    pub lease_owner: Option<String>,
}

impl Job {
    pub fn has_segmentation_artifacts(&self) -> bool {
        self.s3_original_key.is_some() && self.s3_cutout_key.is_some() && self.s3_mask_key.is_some()
    }
}

/// Partial update merged into a job by `update_status` / `set_artifacts`.
///
/// `None` leaves the column untouched. Artifact fields are monotonic:
/// single keys are only ever set, list fields are overwritten whole.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub s3_original_key: Option<String>,
    pub s3_cutout_key: Option<String>,
    pub s3_mask_key: Option<String>,
    pub s3_bg_keys: Option<Vec<String>>,
    pub s3_composite_keys: Option<Vec<String>>,
    pub s3_derivative_keys: Option<Vec<String>>,
    pub s3_manifest_key: Option<String>,
    pub shopify_media_ids: Option<Vec<String>>,
    pub shopify_product_id: Option<String>,
    pub provider_job_id: Option<String>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub error_stack: Option<String>,
    /// Step name and elapsed ms, merged into `step_durations_ms`.
    pub step_duration: Option<(&'static str, i64)>,
}

impl JobUpdate {
    pub fn is_empty(&self) -> bool {
        self.s3_original_key.is_none()
            && self.s3_cutout_key.is_none()
            && self.s3_mask_key.is_none()
            && self.s3_bg_keys.is_none()
            && self.s3_composite_keys.is_none()
            && self.s3_derivative_keys.is_none()
            && self.s3_manifest_key.is_none()
            && self.shopify_media_ids.is_none()
            && self.shopify_product_id.is_none()
            && self.provider_job_id.is_none()
            && self.error_code.is_none()
            && self.error_message.is_none()
            && self.error_stack.is_none()
            && self.step_duration.is_none()
    }

    /// Apply this update to a snapshot, producing the merged view the
    /// state machine validates against.
    pub fn merged_into(&self, job: &Job) -> Job {
        let mut next = job.clone();
        if let Some(v) = &self.s3_original_key {
            next.s3_original_key = Some(v.clone());
        }
        if let Some(v) = &self.s3_cutout_key {
            next.s3_cutout_key = Some(v.clone());
        }
        if let Some(v) = &self.s3_mask_key {
            next.s3_mask_key = Some(v.clone());
        }
        if let Some(v) = &self.s3_bg_keys {
            next.s3_bg_keys = v.clone();
        }
        if let Some(v) = &self.s3_composite_keys {
            next.s3_composite_keys = v.clone();
        }
        if let Some(v) = &self.s3_derivative_keys {
            next.s3_derivative_keys = v.clone();
        }
        if let Some(v) = &self.s3_manifest_key {
            next.s3_manifest_key = Some(v.clone());
        }
        if let Some(v) = &self.shopify_media_ids {
            next.shopify_media_ids = v.clone();
        }
        if let Some(v) = &self.shopify_product_id {
            next.shopify_product_id = Some(v.clone());
        }
        if let Some(v) = &self.provider_job_id {
            next.provider_job_id = Some(v.clone());
        }
        if let Some(v) = self.error_code {
            next.error_code = Some(v);
        }
        if let Some(v) = &self.error_message {
            next.error_message = Some(v.clone());
        }
        if let Some(v) = &self.error_stack {
            next.error_stack = Some(v.clone());
        }
        if let Some((step, ms)) = &self.step_duration {
            next.step_durations_ms.insert(step.to_string(), *ms);
        }
        next
    }
}

/// Raw webhook body. Fields are optional so validation can report every
/// missing/invalid field at once instead of failing on the first.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub taken_at: Option<String>,
}

/// Aggregate numbers for the stats endpoint and logs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub total_cost_usd: f64,
    pub avg_completion_ms: Option<f64>,
    pub failure_rate: f64,
}
