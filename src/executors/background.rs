//! BG_REMOVED -> BACKGROUND_READY: publish the active template's selected
//! backgrounds, or generate themed variants from the resolved prompt.

use super::{cancellable, ExecutorContext, StepError};
use crate::models::{Job, JobUpdate};
use crate::providers::BackgroundRequest;
use crate::state_machine::JobStatus;
use crate::store::LeaseGuard;
use futures_util::future::try_join_all;
use std::time::Instant;
use tracing::debug;

/// Generated background canvas size; composites and derivatives crop from
/// this.
const BG_WIDTH: u32 = 2048;
const BG_HEIGHT: u32 = 2048;

pub(super) async fn run(ctx: &ExecutorContext, job: &Job) -> Result<Job, StepError> {
    let started = Instant::now();
    let mut shutdown = ctx.shutdown.clone();

    let template_id = ctx.stores.settings.active_background_template()?;
    let mut bg_keys = if template_id.is_empty() {
        Vec::new()
    } else {
        ctx.stores.templates.selected_asset_keys(&template_id)?
    };

    if bg_keys.is_empty() {
        let prompt = resolve_prompt(ctx, &job.theme)?;
        let count = ctx.stores.settings.background_variant_count()?;
        debug!(job_id = %job.id, count, "Generating background variants");

        let requests: Vec<BackgroundRequest> = (1..=count)
            .map(|variant| BackgroundRequest {
                prompt: prompt.clone(),
                theme: job.theme.clone(),
                sku: job.sku.clone(),
                image_hash: job.image_hash.clone(),
                variant,
                width: BG_WIDTH,
                height: BG_HEIGHT,
            })
            .collect();
        let generate_all = try_join_all(
            requests
                .iter()
                .map(|request| ctx.providers.backgrounds.generate(request)),
        );
        let outputs = cancellable(&mut shutdown, generate_all).await??;

        let total_cost: f64 = outputs.iter().map(|o| o.cost_usd).sum();
        if total_cost > 0.0 {
            ctx.stores.jobs.add_cost(&job.id, total_cost)?;
        }
        bg_keys = outputs.into_iter().map(|o| o.bg_key).collect();
    } else {
        debug!(job_id = %job.id, template_id = %template_id, "Publishing template backgrounds");
    }

    let update = JobUpdate {
        s3_bg_keys: Some(bg_keys),
        step_duration: Some(("background", started.elapsed().as_millis() as i64)),
        ..Default::default()
    };
    Ok(ctx.stores.jobs.update_status(
        &job.id,
        JobStatus::BackgroundReady,
        update,
        LeaseGuard::Owner(&ctx.owner),
    )?)
}

/// Selected custom prompt, else the default prompt, else a theme-derived
/// fallback. Stored prompts are used verbatim; the theme is appended only
/// when it names a real family.
fn resolve_prompt(ctx: &ExecutorContext, theme: &str) -> Result<String, StepError> {
    let selected_id = ctx.stores.settings.selected_prompt_id()?;
    if !selected_id.is_empty() {
        if let Some(prompt) = ctx.stores.prompts.get(&selected_id)? {
            return Ok(themed(prompt.text, theme));
        }
    }
    if let Some(prompt) = ctx.stores.prompts.get_default()? {
        return Ok(themed(prompt.text, theme));
    }
    Ok(format!(
        "Professional product photography backdrop, {} theme, studio lighting",
        theme
    ))
}

fn themed(text: String, theme: &str) -> String {
    if theme == "default" {
        text
    } else {
        format!("{}, {} theme", text, theme)
    }
}
