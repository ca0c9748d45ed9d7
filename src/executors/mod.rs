//! Step executors: one per pipeline state.
//!
//! Each step takes a leased job, performs its I/O through the provider
//! contracts, and advances the job in a single guarded transition at the
//! end, so a cancellation mid-step leaves no partial state. Failures are
//! classified into the taxonomy and written through the normal FAILED
//! transition; the processor decides whether a retry follows.

mod background;
mod compose;
mod derivatives;
mod fetch_segment;
mod storefront_push;

pub use storefront_push::force_push;

use crate::errors::{ErrorCode, StoreError};
use crate::models::{Job, JobUpdate};
use crate::providers::{ProviderError, ProviderSet};
use crate::state_machine::JobStatus;
use crate::store::{LeaseGuard, Stores};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Everything a step needs: stores, providers, the lease identity it
/// writes under, and the shutdown handle it must honor at every
/// suspension point.
#[derive(Clone)]
pub struct ExecutorContext {
    pub stores: Arc<Stores>,
    pub providers: ProviderSet,
    pub http: reqwest::Client,
    pub owner: String,
    pub shutdown: watch::Receiver<bool>,
    pub presign_ttl_secs: u64,
    pub shopify_map_ttl_ms: i64,
}

#[derive(Debug)]
pub enum StepError {
    Provider(ProviderError),
    Store(StoreError),
    Cancelled,
}

impl From<ProviderError> for StepError {
    fn from(e: ProviderError) -> Self {
        Self::Provider(e)
    }
}

impl From<StoreError> for StepError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// What happened to a leased job after one executor pass.
#[derive(Debug)]
pub enum StepOutcome {
    /// Transitioned to its next state (possibly DONE).
    Advanced(Job),
    /// Marked FAILED with a taxonomy code.
    Failed(Job),
    /// Shutdown hit a suspension point; lease released, job untouched.
    Cancelled,
    /// The lease expired under us; another worker owns the job now.
    LeaseLost,
    /// The job's state has no executor (terminal or legacy); lease released.
    Skipped,
}

/// Run a provider future, aborting at the suspension point if shutdown
/// fires first.
pub(crate) async fn cancellable<T>(
    shutdown: &mut watch::Receiver<bool>,
    fut: impl Future<Output = T>,
) -> Result<T, StepError> {
    if *shutdown.borrow() {
        return Err(StepError::Cancelled);
    }
    tokio::select! {
        result = fut => Ok(result),
        _ = shutdown.changed() => Err(StepError::Cancelled),
    }
}

/// Dispatch a leased job to the executor for its current state and settle
/// the result against the store.
pub async fn execute(ctx: &ExecutorContext, job: Job) -> StepOutcome {
    let result = match job.status {
        JobStatus::New => fetch_segment::run(ctx, &job).await,
        JobStatus::BgRemoved => background::run(ctx, &job).await,
        JobStatus::BackgroundReady => compose::run(ctx, &job).await,
        JobStatus::Composited => derivatives::run(ctx, &job).await,
        JobStatus::Derivatives => storefront_push::run(ctx, &job).await,
        JobStatus::ShopifyPush => storefront_push::finalize(ctx, &job).await,
        other => {
            warn!(job_id = %job.id, status = %other, "No executor for leased state, releasing");
            if let Err(e) = ctx.stores.jobs.release_lease(&job.id, &ctx.owner) {
                warn!(job_id = %job.id, error = %e, "Failed to release lease");
            }
            return StepOutcome::Skipped;
        }
    };

    match result {
        Ok(updated) => {
            if updated.status == JobStatus::Done {
                info!(
                    job_id = %updated.id,
                    sku = %updated.sku,
                    cost_usd = updated.cost_usd,
                    "Job complete"
                );
            }
            StepOutcome::Advanced(updated)
        }
        Err(StepError::Cancelled) => {
            if let Err(e) = ctx.stores.jobs.release_lease(&job.id, &ctx.owner) {
                warn!(job_id = %job.id, error = %e, "Failed to release lease on cancel");
            }
            StepOutcome::Cancelled
        }
        Err(StepError::Store(StoreError::LeaseLost { .. })) => StepOutcome::LeaseLost,
        Err(err) => fail_job(ctx, &job, err).await,
    }
}

/// Classify an executor error and persist the FAILED transition under the
/// lease.
async fn fail_job(ctx: &ExecutorContext, job: &Job, err: StepError) -> StepOutcome {
    let (code, message) = classify(err);
    warn!(
        job_id = %job.id,
        sku = %job.sku,
        status = %job.status,
        code = %code,
        error = %message,
        "Step failed"
    );
    let update = JobUpdate {
        error_code: Some(code),
        error_message: Some(message),
        ..Default::default()
    };
    match ctx.stores.jobs.update_status(
        &job.id,
        JobStatus::Failed,
        update,
        LeaseGuard::Owner(&ctx.owner),
    ) {
        Ok(failed) => StepOutcome::Failed(failed),
        Err(StoreError::LeaseLost { .. }) => StepOutcome::LeaseLost,
        Err(store_err) => {
            warn!(job_id = %job.id, error = %store_err, "Could not persist failure");
            if let Err(e) = ctx.stores.jobs.release_lease(&job.id, &ctx.owner) {
                warn!(job_id = %job.id, error = %e, "Failed to release lease");
            }
            StepOutcome::LeaseLost
        }
    }
}

fn classify(err: StepError) -> (ErrorCode, String) {
    match err {
        StepError::Provider(e) => (e.code, e.message),
        StepError::Store(e) => (ErrorCode::Unknown, e.to_string()),
        StepError::Cancelled => (ErrorCode::Unknown, "cancelled".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancellable_short_circuits_when_already_shut_down() {
        let (tx, mut rx) = watch::channel(true);
        let result = cancellable(&mut rx, async { 42 }).await;
        assert!(matches!(result, Err(StepError::Cancelled)));
        drop(tx);
    }

    #[tokio::test]
    async fn cancellable_aborts_pending_work_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let slow = async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            42
        };
        let send = async {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            tx.send(true).unwrap();
        };
        let (result, ()) = tokio::join!(cancellable(&mut rx, slow), send);
        assert!(matches!(result, Err(StepError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellable_passes_through_completed_work() {
        let (_tx, mut rx) = watch::channel(false);
        let result = cancellable(&mut rx, async { "done" }).await.unwrap();
        assert_eq!(result, "done");
    }
}
