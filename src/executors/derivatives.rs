//! COMPOSITED -> DERIVATIVES: multi-size, multi-aspect, multi-format
//! outputs plus a thumbnail, and the manifest tying every artifact
//! together.

use super::{cancellable, ExecutorContext, StepError};
use crate::keys::{self, Aspect};
use crate::models::{Job, JobUpdate};
use crate::providers::{DerivativeSpec, ProviderError};
use crate::state_machine::JobStatus;
use crate::store::{LeaseGuard, OutputFormat};
use std::time::Instant;
use tracing::debug;

const ASPECTS: [Aspect; 3] = [Aspect::Square, Aspect::Portrait, Aspect::Landscape];
const FORMATS: [OutputFormat; 2] = [OutputFormat::Jpeg, OutputFormat::Webp];
const THUMBNAIL_SIZE: u32 = 400;

pub(super) async fn run(ctx: &ExecutorContext, job: &Job) -> Result<Job, StepError> {
    let started = Instant::now();
    let mut shutdown = ctx.shutdown.clone();

    // Derivatives come off the primary composite.
    let src_key = job
        .s3_composite_keys
        .first()
        .cloned()
        .ok_or_else(|| ProviderError::composite("job carries no composite keys"))?;
    let quality = ctx.stores.settings.sharp_settings()?.quality;

    let mut derivative_keys = Vec::with_capacity(ASPECTS.len() * FORMATS.len() + 1);
    for aspect in ASPECTS {
        let (width, height) = aspect.dimensions();
        for format in FORMATS {
            let out_key = keys::derivative(
                &job.sku,
                &job.image_hash,
                &job.theme,
                aspect,
                width,
                height,
                format.ext(),
            );
            let spec = DerivativeSpec {
                width,
                height,
                quality,
                ext: format.ext().to_string(),
            };
            let output = cancellable(
                &mut shutdown,
                ctx.providers.compositor.derivative(&src_key, &spec, &out_key),
            )
            .await??;
            derivative_keys.push(output.key);
        }
    }

    let thumbnail_key = keys::thumbnail(&job.sku, &job.image_hash);
    let thumb_spec = DerivativeSpec {
        width: THUMBNAIL_SIZE,
        height: THUMBNAIL_SIZE,
        quality,
        ext: "jpg".to_string(),
    };
    let thumb = cancellable(
        &mut shutdown,
        ctx.providers
            .compositor
            .derivative(&src_key, &thumb_spec, &thumbnail_key),
    )
    .await??;
    derivative_keys.push(thumb.key);

    let manifest_key = keys::manifest(&job.sku, &job.image_hash, &job.theme);
    let manifest = serde_json::json!({
        "sku": job.sku,
        "imageHash": job.image_hash,
        "theme": job.theme,
        "sourceUrl": job.source_url,
        "original": job.s3_original_key,
        "cutout": job.s3_cutout_key,
        "mask": job.s3_mask_key,
        "backgrounds": job.s3_bg_keys,
        "composites": job.s3_composite_keys,
        "derivatives": derivative_keys,
        "thumbnail": thumbnail_key,
        "generatedAt": chrono::Utc::now().to_rfc3339(),
    });
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| ProviderError::storage(format!("manifest serialization: {}", e)))?;
    cancellable(
        &mut shutdown,
        ctx.providers
            .objects
            .put(&manifest_key, &manifest_bytes, "application/json"),
    )
    .await??;
    debug!(job_id = %job.id, derivatives = derivative_keys.len(), "Wrote derivatives and manifest");

    let update = JobUpdate {
        s3_derivative_keys: Some(derivative_keys),
        s3_manifest_key: Some(manifest_key),
        step_duration: Some(("derivatives", started.elapsed().as_millis() as i64)),
        ..Default::default()
    };
    Ok(ctx.stores.jobs.update_status(
        &job.id,
        JobStatus::Derivatives,
        update,
        LeaseGuard::Owner(&ctx.owner),
    )?)
}
