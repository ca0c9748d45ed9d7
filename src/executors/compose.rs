//! BACKGROUND_READY -> COMPOSITED: place the product on each background.
//!
//! Two strategies, selected by settings. The cutout flow layers the
//! transparent cutout onto a background (deterministic compositor, or an
//! AI compositor when one is configured). The seedream flow hands the
//! original photo to the AI compositor to edit in place against each
//! background. `sharp_workflow` forces the deterministic path outright.

use super::{cancellable, ExecutorContext, StepError};
use crate::keys::{self, Aspect, CompositeKind};
use crate::models::{Job, JobUpdate};
use crate::providers::{ComposeOptions, ProviderError};
use crate::state_machine::JobStatus;
use crate::store::{AiCompositorChoice, LeaseGuard, WorkflowPreference};
use std::time::Instant;
use tracing::debug;

enum Strategy {
    Deterministic,
    /// AI composition from the given source key (cutout, or the original
    /// in the seedream edit flow).
    Ai { source_key: String },
}

pub(super) async fn run(ctx: &ExecutorContext, job: &Job) -> Result<Job, StepError> {
    let started = Instant::now();
    let mut shutdown = ctx.shutdown.clone();

    let cutout_key = job
        .s3_cutout_key
        .clone()
        .ok_or_else(|| ProviderError::composite("job carries no cutout key"))?;
    let sharp = ctx.stores.settings.sharp_settings()?;
    let strategy = select_strategy(ctx, job, &cutout_key)?;

    let mut composite_keys = Vec::with_capacity(job.s3_bg_keys.len());
    let mut total_cost = 0.0;

    for (index, bg_key) in job.s3_bg_keys.iter().enumerate() {
        let variant = index as u32 + 1;
        match &strategy {
            Strategy::Ai { source_key } => {
                let options = ComposeOptions {
                    sku: job.sku.clone(),
                    image_hash: job.image_hash.clone(),
                    theme: job.theme.clone(),
                    aspect: Aspect::Square,
                    variant,
                };
                let output = cancellable(
                    &mut shutdown,
                    ctx.providers
                        .ai_compositor
                        .compose(source_key, bg_key, &options),
                )
                .await??;
                total_cost += output.cost_usd;
                composite_keys.push(output.composite_key);
            }
            Strategy::Deterministic => {
                let out_key = keys::composite(
                    &job.sku,
                    &job.image_hash,
                    &job.theme,
                    Aspect::Square,
                    variant,
                    CompositeKind::Sharp,
                );
                let output = cancellable(
                    &mut shutdown,
                    ctx.providers
                        .compositor
                        .compose(&cutout_key, bg_key, &sharp, &out_key),
                )
                .await??;
                composite_keys.push(output.key);
            }
        }
    }

    if total_cost > 0.0 {
        ctx.stores.jobs.add_cost(&job.id, total_cost)?;
    }

    debug!(
        job_id = %job.id,
        composites = composite_keys.len(),
        "Compositing finished"
    );
    let update = JobUpdate {
        s3_composite_keys: Some(composite_keys),
        step_duration: Some(("compose", started.elapsed().as_millis() as i64)),
        ..Default::default()
    };
    Ok(ctx.stores.jobs.update_status(
        &job.id,
        JobStatus::Composited,
        update,
        LeaseGuard::Owner(&ctx.owner),
    )?)
}

fn select_strategy(
    ctx: &ExecutorContext,
    job: &Job,
    cutout_key: &str,
) -> Result<Strategy, StepError> {
    if ctx.stores.settings.sharp_workflow()? {
        return Ok(Strategy::Deterministic);
    }
    if ctx.stores.settings.ai_compositor()? == AiCompositorChoice::None {
        return Ok(Strategy::Deterministic);
    }
    let source_key = match ctx.stores.settings.workflow_preference()? {
        WorkflowPreference::SeedreamEdit => job
            .s3_original_key
            .clone()
            .unwrap_or_else(|| cutout_key.to_string()),
        WorkflowPreference::CutoutComposite => cutout_key.to_string(),
    };
    Ok(Strategy::Ai { source_key })
}
