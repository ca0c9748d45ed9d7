//! NEW -> BG_REMOVED: download the source image, verify its hash, upload
//! the original, and run background removal.

use super::{cancellable, ExecutorContext, StepError};
use crate::errors::ErrorCode;
use crate::keys;
use crate::models::{Job, JobUpdate};
use crate::providers::ProviderError;
use crate::state_machine::JobStatus;
use crate::store::LeaseGuard;
use sha2::{Digest, Sha256};
use std::time::Instant;
use tracing::debug;

/// Source bodies smaller than this cannot be a usable product photo.
const MIN_SOURCE_BYTES: usize = 1024;

pub(super) async fn run(ctx: &ExecutorContext, job: &Job) -> Result<Job, StepError> {
    let started = Instant::now();
    let mut shutdown = ctx.shutdown.clone();

    let response = cancellable(&mut shutdown, ctx.http.get(&job.source_url).send())
        .await?
        .map_err(|e| classify_download(&e))?;

    let status = response.status();
    if status.is_client_error() {
        return Err(ProviderError::invalid_image(format!(
            "source fetch returned {}",
            status
        ))
        .into());
    }
    if !status.is_success() {
        return Err(
            ProviderError::new(ErrorCode::Unknown, format!("source fetch returned {}", status))
                .into(),
        );
    }

    let bytes = cancellable(&mut shutdown, response.bytes())
        .await?
        .map_err(|e| classify_download(&e))?;
    if bytes.len() < MIN_SOURCE_BYTES {
        return Err(ProviderError::invalid_image(format!(
            "source image is {} bytes, below the {} byte floor",
            bytes.len(),
            MIN_SOURCE_BYTES
        ))
        .into());
    }

    let digest = hex::encode(Sha256::digest(&bytes));
    if digest != job.image_hash {
        return Err(ProviderError::invalid_image(format!(
            "source bytes hash to {} but the webhook announced {}",
            digest, job.image_hash
        ))
        .into());
    }

    let original_key = keys::original(&job.sku, &job.image_hash);
    cancellable(
        &mut shutdown,
        ctx.providers.objects.put(&original_key, &bytes, "image/jpeg"),
    )
    .await??;
    debug!(job_id = %job.id, key = %original_key, "Uploaded original");

    let segmented = cancellable(
        &mut shutdown,
        ctx.providers
            .segmenter
            .remove_background(&job.source_url, &job.sku, &job.image_hash),
    )
    .await??;

    if segmented.cost_usd > 0.0 {
        ctx.stores.jobs.add_cost(&job.id, segmented.cost_usd)?;
    }

    let update = JobUpdate {
        s3_original_key: Some(original_key),
        s3_cutout_key: Some(segmented.cutout_key),
        s3_mask_key: Some(segmented.mask_key),
        provider_job_id: segmented.provider_job_id,
        step_duration: Some(("fetch_segment", started.elapsed().as_millis() as i64)),
        ..Default::default()
    };
    Ok(ctx.stores.jobs.update_status(
        &job.id,
        JobStatus::BgRemoved,
        update,
        LeaseGuard::Owner(&ctx.owner),
    )?)
}

fn classify_download(err: &reqwest::Error) -> StepError {
    if err.is_timeout() {
        ProviderError::timeout(format!("source download timed out: {}", err)).into()
    } else {
        ProviderError::new(ErrorCode::Unknown, format!("source download failed: {}", err)).into()
    }
}
