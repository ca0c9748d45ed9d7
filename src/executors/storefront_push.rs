//! DERIVATIVES -> SHOPIFY_PUSH -> DONE: resolve the product, hand the
//! storefront presigned composite URLs, record the media ids.
//!
//! Attachment is at-least-once; jobs that already carry media ids skip
//! the attach call, which is what makes webhook redelivery and the manual
//! force-push safe.

use super::{cancellable, ExecutorContext, StepError};
use crate::errors::StoreError;
use crate::models::{Job, JobUpdate};
use crate::providers::ProviderError;
use crate::state_machine::JobStatus;
use crate::store::LeaseGuard;
use std::time::Instant;
use tracing::{debug, info};

pub(super) async fn run(ctx: &ExecutorContext, job: &Job) -> Result<Job, StepError> {
    let started = Instant::now();

    let (media_ids, product_id) = if job.shopify_media_ids.is_empty() {
        attach(ctx, job).await?
    } else {
        debug!(job_id = %job.id, "Media already attached, skipping");
        (
            job.shopify_media_ids.clone(),
            job.shopify_product_id.clone().unwrap_or_default(),
        )
    };

    // Two transitions in one step; the lease is kept across the first so
    // no other worker can squeeze in between.
    let update = JobUpdate {
        shopify_media_ids: Some(media_ids),
        shopify_product_id: (!product_id.is_empty()).then_some(product_id),
        step_duration: Some(("storefront_push", started.elapsed().as_millis() as i64)),
        ..Default::default()
    };
    ctx.stores.jobs.update_status(
        &job.id,
        JobStatus::ShopifyPush,
        update,
        LeaseGuard::OwnerKeep(&ctx.owner),
    )?;
    Ok(ctx.stores.jobs.update_status(
        &job.id,
        JobStatus::Done,
        JobUpdate::default(),
        LeaseGuard::Owner(&ctx.owner),
    )?)
}

/// Crash recovery: a job that stopped between the two transitions only
/// needs the final completion write.
pub(super) async fn finalize(ctx: &ExecutorContext, job: &Job) -> Result<Job, StepError> {
    info!(job_id = %job.id, "Finalizing interrupted storefront push");
    Ok(ctx.stores.jobs.update_status(
        &job.id,
        JobStatus::Done,
        JobUpdate::default(),
        LeaseGuard::Owner(&ctx.owner),
    )?)
}

/// Admin force-push for a DONE or DERIVATIVES job. Never attaches twice:
/// populated media ids short-circuit.
pub async fn force_push(ctx: &ExecutorContext, job: &Job) -> Result<Job, StepError> {
    if !job.shopify_media_ids.is_empty() {
        return Ok(job.clone());
    }
    match job.status {
        JobStatus::Derivatives => run(ctx, job).await,
        JobStatus::ShopifyPush => finalize(ctx, job).await,
        // A DONE job missing media ids gets them attached in place;
        // terminal status does not move.
        JobStatus::Done => {
            let (media_ids, product_id) = attach(ctx, job).await?;
            let update = JobUpdate {
                shopify_media_ids: Some(media_ids),
                shopify_product_id: (!product_id.is_empty()).then_some(product_id),
                ..Default::default()
            };
            ctx.stores.jobs.release_lease(&job.id, &ctx.owner)?;
            Ok(ctx.stores.jobs.set_artifacts(&job.id, &update)?)
        }
        other => Err(StepError::Store(StoreError::InvalidInput(format!(
            "push-shopify requires a DONE or DERIVATIVES job, found {}",
            other
        )))),
    }
}

async fn attach(ctx: &ExecutorContext, job: &Job) -> Result<(Vec<String>, String), StepError> {
    let mut shutdown = ctx.shutdown.clone();

    let product_id = match ctx
        .stores
        .shopify_map
        .fresh(&job.sku, ctx.shopify_map_ttl_ms)?
    {
        Some(mapping) => mapping.product_id,
        None => {
            let product = cancellable(
                &mut shutdown,
                ctx.providers.storefront.find_product(&job.sku),
            )
            .await??
            .ok_or_else(|| {
                ProviderError::product_not_found(format!(
                    "sku {} has no product in the storefront",
                    job.sku
                ))
            })?;
            ctx.stores.shopify_map.upsert(
                &job.sku,
                &product.product_id,
                Some(product.handle.as_str()),
            )?;
            product.product_id
        }
    };

    let urls: Vec<String> = job
        .s3_composite_keys
        .iter()
        .map(|key| ctx.providers.objects.presign_get(key, ctx.presign_ttl_secs))
        .collect::<Result<_, _>>()?;
    if urls.is_empty() {
        return Err(ProviderError::storefront("job carries no composites to push").into());
    }

    let alt_text = format!("{} product photo", job.sku);
    let media_ids = cancellable(
        &mut shutdown,
        ctx.providers
            .storefront
            .attach_media(&product_id, &urls, &alt_text),
    )
    .await??;
    if media_ids.is_empty() {
        return Err(ProviderError::storefront("storefront returned no media ids").into());
    }
    debug!(job_id = %job.id, product_id = %product_id, media = media_ids.len(), "Attached media");
    Ok((media_ids, product_id))
}
