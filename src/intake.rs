//! Webhook intake: signature verification, payload validation, per-SKU
//! quota, and idempotent job creation.
//!
//! Validation reports every bad field at once. The HMAC comparison is
//! constant-time via the mac's own verifier. Deduplication is the job
//! table's unique triple; this module only interprets the outcome.

use crate::errors::StoreError;
use crate::models::{Job, WebhookPayload};
use crate::store::JobStore;
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature headers accepted, in precedence order.
pub const SIGNATURE_HEADERS: [&str; 3] = ["x-3jms-signature", "x-webhook-signature", "x-signature"];

pub const MAX_SKU_LEN: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

/// A payload that passed validation.
#[derive(Debug, Clone)]
pub struct ValidIntake {
    pub sku: String,
    pub image_url: String,
    pub sha256: String,
    pub taken_at: Option<chrono::DateTime<chrono::Utc>>,
    pub event: Option<String>,
}

#[derive(Debug)]
pub enum IntakeError {
    Validation(Vec<FieldError>),
    QuotaReached { sku: String, max: u32 },
    Store(StoreError),
}

impl From<StoreError> for IntakeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

#[derive(Debug)]
pub enum IntakeOutcome {
    Created(Job),
    Duplicate(Job),
}

pub fn sku_is_valid(sku: &str) -> bool {
    !sku.is_empty()
        && sku.len() <= MAX_SKU_LEN
        && sku
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn sha256_is_valid(hash: &str) -> bool {
    hash.len() == 64
        && hash
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
}

fn url_is_valid(url: &str) -> bool {
    match reqwest::Url::parse(url) {
        Ok(parsed) => matches!(parsed.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// Validate the raw payload, reporting every failing field.
pub fn validate(payload: &WebhookPayload) -> Result<ValidIntake, Vec<FieldError>> {
    let mut errors = Vec::new();

    let sku = payload.sku.clone().unwrap_or_default();
    if !sku_is_valid(&sku) {
        errors.push(FieldError {
            field: "sku",
            message: format!(
                "sku must be 1-{} characters of [A-Za-z0-9_-]",
                MAX_SKU_LEN
            ),
        });
    }

    let image_url = payload.image_url.clone().unwrap_or_default();
    if !url_is_valid(&image_url) {
        errors.push(FieldError {
            field: "imageUrl",
            message: "imageUrl must be an absolute http(s) URL".to_string(),
        });
    }

    let sha256 = payload.sha256.clone().unwrap_or_default();
    if !sha256_is_valid(&sha256) {
        errors.push(FieldError {
            field: "sha256",
            message: "sha256 must be exactly 64 lowercase hex characters".to_string(),
        });
    }

    let taken_at = match &payload.taken_at {
        None => None,
        Some(raw) => match chrono::DateTime::parse_from_rfc3339(raw) {
            Ok(dt) => Some(dt.with_timezone(&chrono::Utc)),
            Err(_) => {
                errors.push(FieldError {
                    field: "takenAt",
                    message: "takenAt must be an ISO-8601 timestamp".to_string(),
                });
                None
            }
        },
    };

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(ValidIntake {
        sku,
        image_url,
        sha256,
        taken_at,
        event: payload.event.clone(),
    })
}

/// Constant-time HMAC-SHA256 check of the raw body against the hex
/// signature from the header.
pub fn verify_signature(secret: &str, body: &[u8], provided_hex: &str) -> bool {
    let Ok(provided) = hex::decode(provided_hex.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&provided).is_ok()
}

/// Hex HMAC-SHA256 of a body, for the signing side (dev tooling, tests).
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Validated intake against the store: quota first, then the idempotent
/// create.
pub fn process(
    jobs: &JobStore,
    intake: &ValidIntake,
    theme: &str,
    max_per_sku: u32,
) -> Result<IntakeOutcome, IntakeError> {
    let done = jobs.count_done_for_sku(&intake.sku)?;
    if done >= i64::from(max_per_sku) {
        return Err(IntakeError::QuotaReached {
            sku: intake.sku.clone(),
            max: max_per_sku,
        });
    }

    let (job, created) = jobs.create(&intake.sku, &intake.sha256, theme, &intake.image_url)?;
    if created {
        Ok(IntakeOutcome::Created(job))
    } else {
        Ok(IntakeOutcome::Duplicate(job))
    }
}
