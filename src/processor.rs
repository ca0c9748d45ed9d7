//! Long-running job processor: a polling scheduler over a small worker
//! pool.
//!
//! Every tick it re-queues failed jobs whose backoff has elapsed, leases
//! up to the free concurrency, and dispatches each leased job to the
//! executor for its state on a spawned task. Backoff needs no in-memory
//! timers: a FAILED job is not leasable, so it sits out its window in the
//! store and survives restarts.

use crate::executors::{self, ExecutorContext, StepOutcome};
use crate::models::Job;
use crate::providers::ProviderSet;
use crate::state_machine::{self, JobStatus};
use crate::store::{JobFilter, Stores};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub poll_interval_ms: u64,
    pub concurrency: usize,
    pub max_retries: u32,
    pub lease_ttl_ms: i64,
    pub presign_ttl_secs: u64,
    pub shopify_map_ttl_ms: i64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            concurrency: 4,
            max_retries: 3,
            lease_ttl_ms: 10 * 60 * 1000,
            presign_ttl_secs: 3_600,
            shopify_map_ttl_ms: 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStatus {
    pub is_running: bool,
    pub version: String,
    pub config: ProcessorStatusConfig,
    pub current_jobs: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorStatusConfig {
    pub poll_interval: u64,
    pub concurrency: usize,
    pub max_retries: u32,
}

pub struct Processor {
    stores: Arc<Stores>,
    providers: ProviderSet,
    http: reqwest::Client,
    config: ProcessorConfig,
    owner: String,
    running: AtomicBool,
    active: Mutex<HashSet<String>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Processor {
    pub fn new(
        stores: Arc<Stores>,
        providers: ProviderSet,
        http: reqwest::Client,
        config: ProcessorConfig,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            stores,
            providers,
            http,
            config,
            owner: format!("worker-{}", Uuid::new_v4()),
            running: AtomicBool::new(true),
            active: Mutex::new(HashSet::new()),
            shutdown_tx,
        })
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(owner = %self.owner, "Processor started");
    }

    /// Pause leasing. In-flight jobs finish; nothing new is picked up.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!(owner = %self.owner, "Processor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Shutdown handle shared with executors and the HTTP server.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Stop leasing and tell in-flight executors to abort at their next
    /// suspension point.
    pub fn initiate_shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait until in-flight jobs drain, up to `grace`. Returns true if
    /// everything drained.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            if self.active.lock().is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                let stuck: Vec<String> = self.active.lock().iter().cloned().collect();
                warn!(jobs = ?stuck, "Grace period expired with jobs in flight");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn status(&self) -> ProcessorStatus {
        ProcessorStatus {
            is_running: self.is_running(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config: ProcessorStatusConfig {
                poll_interval: self.config.poll_interval_ms,
                concurrency: self.config.concurrency,
                max_retries: self.config.max_retries,
            },
            current_jobs: self.active.lock().iter().cloned().collect(),
        }
    }

    /// The polling loop. Runs until shutdown fires.
    pub async fn run(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut tick = interval(Duration::from_millis(self.config.poll_interval_ms.max(10)));
        info!(
            owner = %self.owner,
            poll_interval_ms = self.config.poll_interval_ms,
            concurrency = self.config.concurrency,
            "Processor loop running"
        );
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if !self.is_running() {
                        continue;
                    }
                    if let Err(e) = Self::tick(&self) {
                        warn!(error = %e, "Processor tick failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(owner = %self.owner, "Processor loop exited");
    }

    fn tick(this: &Arc<Self>) -> Result<(), crate::errors::StoreError> {
        this.requeue_due_retries()?;

        let active_count = this.active.lock().len();
        let capacity = this.config.concurrency.saturating_sub(active_count);
        if capacity == 0 {
            return Ok(());
        }

        let leased =
            this.stores
                .jobs
                .lease_runnable(capacity, &this.owner, this.config.lease_ttl_ms)?;
        for job in leased {
            Self::dispatch(this, job);
        }
        Ok(())
    }

    fn dispatch(this: &Arc<Self>, job: Job) {
        {
            let mut active = this.active.lock();
            if !active.insert(job.id.clone()) {
                // Already running here; leave it to the running task.
                return;
            }
        }
        debug!(job_id = %job.id, status = %job.status, "Dispatching");

        let this = this.clone();
        tokio::spawn(async move {
            let ctx = this.executor_context();
            let job_id = job.id.clone();
            let outcome = executors::execute(&ctx, job).await;
            match &outcome {
                StepOutcome::Advanced(j) => {
                    debug!(job_id = %j.id, status = %j.status, "Step complete")
                }
                StepOutcome::Failed(j) => {
                    let will_retry = state_machine::can_retry(j, this.config.max_retries);
                    info!(
                        job_id = %j.id,
                        code = j.error_code.map(|c| c.as_str()).unwrap_or("-"),
                        attempt = j.attempt,
                        will_retry,
                        "Job failed"
                    );
                }
                StepOutcome::Cancelled => info!(job_id = %job_id, "Step cancelled"),
                StepOutcome::LeaseLost => warn!(job_id = %job_id, "Lease lost mid-step"),
                StepOutcome::Skipped => {}
            }
            this.active.lock().remove(&job_id);
        });
    }

    /// FAILED jobs whose backoff has elapsed go back to their resume
    /// state; retryable codes with an exhausted budget get the terminal
    /// MaxRetriesExceeded stamp.
    fn requeue_due_retries(&self) -> Result<(), crate::errors::StoreError> {
        let failed = self.stores.jobs.list(&JobFilter {
            statuses: vec![JobStatus::Failed],
            limit: Some(200),
            ..Default::default()
        })?;
        let now = crate::store::now_ms();

        for job in failed {
            let Some(code) = job.error_code else {
                continue;
            };
            if code == crate::errors::ErrorCode::MaxRetriesExceeded {
                continue;
            }
            if !code.is_retryable(job.attempt) {
                continue;
            }
            if job.attempt >= self.config.max_retries {
                info!(job_id = %job.id, attempt = job.attempt, "Retry budget exhausted");
                self.stores.jobs.stamp_retries_exhausted(&job.id)?;
                continue;
            }
            let due_at = job.updated_at + state_machine::retry_delay_ms(job.attempt) as i64;
            if now < due_at {
                continue;
            }
            match self.stores.jobs.retry(&job.id, self.config.max_retries) {
                Ok(requeued) => info!(
                    job_id = %requeued.id,
                    status = %requeued.status,
                    attempt = requeued.attempt,
                    "Re-queued after backoff"
                ),
                Err(e) => warn!(job_id = %job.id, error = %e, "Re-queue failed"),
            }
        }
        Ok(())
    }

    pub fn executor_context(&self) -> ExecutorContext {
        ExecutorContext {
            stores: self.stores.clone(),
            providers: self.providers.clone(),
            http: self.http.clone(),
            owner: self.owner.clone(),
            shutdown: self.shutdown_tx.subscribe(),
            presign_ttl_secs: self.config.presign_ttl_secs,
            shopify_map_ttl_ms: self.config.shopify_map_ttl_ms,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}
