//! Durable job persistence over SQLite.
//!
//! The UNIQUE(sku, image_hash, theme) constraint is the dedup authority;
//! every status change goes through the state machine; every multi-field
//! write runs in a transaction on the shared connection. Lease columns
//! give executors a time-bounded exclusive right to mutate a job, and
//! leased writes carry the owner in the WHERE clause so a stale holder
//! cannot clobber a re-leased job.

use crate::errors::{ErrorCode, StoreError};
use crate::models::{Job, JobStats, JobUpdate};
use crate::state_machine::{
    plan_retry, plan_transition, JobStatus, TransitionPlan, RUNNABLE_STATUSES,
};
use crate::store::{now_ms, Db};
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

const JOB_COLUMNS: &str = "id, sku, image_hash, theme, status, attempt, source_url, \
     s3_original_key, s3_cutout_key, s3_mask_key, s3_bg_keys, s3_composite_keys, \
     s3_derivative_keys, s3_manifest_key, shopify_media_ids, shopify_product_id, \
     provider_job_id, error_code, error_message, error_stack, cost_usd, \
     step_durations_ms, created_at, updated_at, completed_at, lease_until, lease_owner";

/// Who is performing a mutating write, and what happens to the lease.
#[derive(Debug, Clone, Copy)]
pub enum LeaseGuard<'a> {
    /// Admin action: no lease check, any lease is cleared.
    Admin,
    /// Executor write: owner must hold a live lease; the lease is released.
    Owner(&'a str),
    /// Executor mid-step write: owner must hold a live lease; it is kept
    /// (used between the two transitions of the storefront push).
    OwnerKeep(&'a str),
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub statuses: Vec<JobStatus>,
    pub sku: Option<String>,
    pub theme: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

pub struct JobStore {
    conn: Arc<Mutex<Connection>>,
}

impl JobStore {
    pub fn new(db: Db) -> Self {
        Self { conn: db.handle() }
    }

    /// Atomic upsert keyed on (sku, image_hash, theme). Returns the job
    /// and whether this call inserted it.
    pub fn create(
        &self,
        sku: &str,
        image_hash: &str,
        theme: &str,
        source_url: &str,
    ) -> Result<(Job, bool), StoreError> {
        let now = now_ms();
        let id = Uuid::new_v4().to_string();
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT INTO jobs (id, sku, image_hash, theme, status, attempt, source_url, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'NEW', 0, ?5, ?6, ?6)
             ON CONFLICT(sku, image_hash, theme) DO NOTHING",
            params![id, sku, image_hash, theme, source_url, now],
        )?;
        let job = query_one(
            &conn,
            &format!(
                "SELECT {} FROM jobs WHERE sku = ?1 AND image_hash = ?2 AND theme = ?3",
                JOB_COLUMNS
            ),
            params![sku, image_hash, theme],
        )?
        .ok_or_else(|| StoreError::NotFound(format!("{}/{}/{}", sku, image_hash, theme)))?;
        Ok((job, inserted > 0))
    }

    pub fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let conn = self.conn.lock();
        query_one(
            &conn,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
        )
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut sql = format!("SELECT {} FROM jobs WHERE 1 = 1", JOB_COLUMNS);
        let mut values: Vec<rusqlite::types::Value> = Vec::new();

        if !filter.statuses.is_empty() {
            let placeholders = vec!["?"; filter.statuses.len()].join(", ");
            sql.push_str(&format!(" AND status IN ({})", placeholders));
            for s in &filter.statuses {
                values.push(s.as_str().to_string().into());
            }
        }
        if let Some(sku) = &filter.sku {
            sql.push_str(" AND sku = ?");
            values.push(sku.clone().into());
        }
        if let Some(theme) = &filter.theme {
            sql.push_str(" AND theme = ?");
            values.push(theme.clone().into());
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");
        values.push(i64::from(filter.limit.unwrap_or(50).min(500)).into());
        values.push(i64::from(filter.offset.unwrap_or(0)).into());

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let raws: Vec<RawJob> = stmt
            .query_map(params_from_iter(values), raw_from_row)?
            .collect::<Result<_, _>>()?;
        raws.into_iter().map(RawJob::finish).collect()
    }

    /// Validate and persist a state transition. Delegates legality to the
    /// state machine and performs the write in one guarded statement.
    pub fn update_status(
        &self,
        id: &str,
        target: JobStatus,
        updates: JobUpdate,
        guard: LeaseGuard<'_>,
    ) -> Result<Job, StoreError> {
        if let Some(code) = updates.error_code {
            if !code.is_persistable() {
                return Err(StoreError::InvalidInput(format!(
                    "error code {} is never persisted on a job",
                    code
                )));
            }
        }

        let now = now_ms();
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let job = query_one(
            &tx,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
        )?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        check_guard(&job, guard, now)?;
        let plan = plan_transition(&job, target, updates, now)?;
        let affected = write_plan(&tx, &job, &plan, guard)?;
        if affected == 0 {
            return Err(StoreError::LeaseLost {
                id: id.to_string(),
                owner: guard_owner(guard).unwrap_or("").to_string(),
            });
        }

        let updated = query_one(
            &tx,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
        )?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(updated)
    }

    /// Re-queue a failed job at its resume state, consuming an attempt and
    /// clearing the error. The only edge out of FAILED.
    pub fn retry(&self, id: &str, max_attempts: u32) -> Result<Job, StoreError> {
        let now = now_ms();
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let job = query_one(
            &tx,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
        )?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let plan = plan_retry(&job, max_attempts, now).map_err(|e| StoreError::RetryNotEligible {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        write_plan(&tx, &job, &plan, LeaseGuard::Admin)?;

        let updated = query_one(
            &tx,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
        )?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(updated)
    }

    /// Merge artifact references without changing status. List fields are
    /// overwritten whole; single keys only ever gain values.
    pub fn set_artifacts(&self, id: &str, updates: &JobUpdate) -> Result<Job, StoreError> {
        let now = now_ms();
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let job = query_one(
            &tx,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
        )?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let merged = updates.merged_into(&job);

        tx.execute(
            "UPDATE jobs SET
                s3_original_key = ?2, s3_cutout_key = ?3, s3_mask_key = ?4,
                s3_bg_keys = ?5, s3_composite_keys = ?6, s3_derivative_keys = ?7,
                s3_manifest_key = ?8, shopify_media_ids = ?9, shopify_product_id = ?10,
                provider_job_id = ?11, step_durations_ms = ?12, updated_at = ?13
             WHERE id = ?1",
            params![
                id,
                merged.s3_original_key,
                merged.s3_cutout_key,
                merged.s3_mask_key,
                serde_json::to_string(&merged.s3_bg_keys)?,
                serde_json::to_string(&merged.s3_composite_keys)?,
                serde_json::to_string(&merged.s3_derivative_keys)?,
                merged.s3_manifest_key,
                serde_json::to_string(&merged.shopify_media_ids)?,
                merged.shopify_product_id,
                merged.provider_job_id,
                serde_json::to_string(&merged.step_durations_ms)?,
                now,
            ],
        )?;

        let updated = query_one(
            &tx,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
        )?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn increment_attempt(&self, id: &str) -> Result<Job, StoreError> {
        let now = now_ms();
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE jobs SET attempt = attempt + 1, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        query_one(
            &conn,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
        )?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    /// Non-negative cost accumulator.
    pub fn add_cost(&self, id: &str, delta_usd: f64) -> Result<(), StoreError> {
        if !delta_usd.is_finite() || delta_usd < 0.0 {
            return Err(StoreError::InvalidInput(format!(
                "cost delta must be a non-negative number, got {}",
                delta_usd
            )));
        }
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE jobs SET cost_usd = cost_usd + ?2 WHERE id = ?1",
            params![id, delta_usd],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Atomically claim up to `limit` runnable jobs: non-terminal primary
    /// states whose lease is absent or expired. Oldest first.
    pub fn lease_runnable(
        &self,
        limit: usize,
        owner: &str,
        ttl_ms: i64,
    ) -> Result<Vec<Job>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = now_ms();
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let placeholders = vec!["?"; RUNNABLE_STATUSES.len()].join(", ");
        let mut values: Vec<rusqlite::types::Value> = RUNNABLE_STATUSES
            .iter()
            .map(|s| s.as_str().to_string().into())
            .collect();
        values.push(now.into());
        values.push((limit as i64).into());

        let ids: Vec<String> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT id FROM jobs
                 WHERE status IN ({})
                   AND (lease_until IS NULL OR lease_until < ?)
                 ORDER BY created_at ASC
                 LIMIT ?",
                placeholders
            ))?;
            let rows = stmt
                .query_map(params_from_iter(values), |row| row.get(0))?
                .collect::<Result<_, _>>()?;
            rows
        };

        let mut jobs = Vec::with_capacity(ids.len());
        for id in &ids {
            tx.execute(
                "UPDATE jobs SET lease_owner = ?2, lease_until = ?3
                 WHERE id = ?1 AND (lease_until IS NULL OR lease_until < ?4)",
                params![id, owner, now + ttl_ms, now],
            )?;
            if let Some(job) = query_one(
                &tx,
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
            )? {
                jobs.push(job);
            }
        }
        tx.commit()?;
        Ok(jobs)
    }

    /// Claim a lease on one specific job regardless of status. Returns
    /// None when another owner holds a live lease.
    pub fn try_lease(&self, id: &str, owner: &str, ttl_ms: i64) -> Result<Option<Job>, StoreError> {
        let now = now_ms();
        let conn = self.conn.lock();
        let affected = conn.execute(
            "UPDATE jobs SET lease_owner = ?2, lease_until = ?3
             WHERE id = ?1 AND (lease_until IS NULL OR lease_until < ?4 OR lease_owner = ?2)",
            params![id, owner, now + ttl_ms, now],
        )?;
        if affected == 0 {
            // Either missing or leased by someone else; disambiguate.
            return match query_one(
                &conn,
                &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
                params![id],
            )? {
                Some(_) => Ok(None),
                None => Err(StoreError::NotFound(id.to_string())),
            };
        }
        query_one(
            &conn,
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![id],
        )
    }

    /// Owner-matched release; a stale owner's release after TTL expiry is
    /// a no-op.
    pub fn release_lease(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE jobs SET lease_owner = NULL, lease_until = NULL
             WHERE id = ?1 AND lease_owner = ?2",
            params![id, owner],
        )?;
        Ok(())
    }

    /// Annotate a terminally failed job whose retry budget ran out. Not a
    /// transition; FAILED stays FAILED.
    pub fn stamp_retries_exhausted(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE jobs SET error_code = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'FAILED'",
            params![id, ErrorCode::MaxRetriesExceeded.as_str(), now_ms()],
        )?;
        Ok(())
    }

    /// DONE jobs for a SKU, the quota denominator.
    pub fn count_done_for_sku(&self, sku: &str) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE sku = ?1 AND status = 'DONE'",
            params![sku],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn stats(&self) -> Result<JobStats, StoreError> {
        let conn = self.conn.lock();
        let mut by_status: BTreeMap<String, i64> = BTreeMap::new();
        {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                by_status.insert(status, count);
            }
        }
        let total: i64 = by_status.values().sum();
        let failed = by_status.get("FAILED").copied().unwrap_or(0);
        let total_cost_usd: f64 =
            conn.query_row("SELECT COALESCE(SUM(cost_usd), 0) FROM jobs", [], |row| {
                row.get(0)
            })?;
        let avg_completion_ms: Option<f64> = conn.query_row(
            "SELECT AVG(completed_at - created_at) FROM jobs
             WHERE status = 'DONE' AND completed_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(JobStats {
            total,
            by_status,
            total_cost_usd,
            avg_completion_ms,
            failure_rate: if total > 0 {
                failed as f64 / total as f64
            } else {
                0.0
            },
        })
    }
}

fn guard_owner<'a>(guard: LeaseGuard<'a>) -> Option<&'a str> {
    match guard {
        LeaseGuard::Admin => None,
        LeaseGuard::Owner(o) | LeaseGuard::OwnerKeep(o) => Some(o),
    }
}

fn check_guard(job: &Job, guard: LeaseGuard<'_>, now: i64) -> Result<(), StoreError> {
    let Some(owner) = guard_owner(guard) else {
        return Ok(());
    };
    let held = job.lease_owner.as_deref() == Some(owner)
        && job.lease_until.map_or(false, |until| until > now);
    if held {
        Ok(())
    } else {
        Err(StoreError::LeaseLost {
            id: job.id.clone(),
            owner: owner.to_string(),
        })
    }
}

/// Persist a validated transition plan. Returns affected row count so the
/// caller can detect a lease lost between read and write.
fn write_plan(
    conn: &Connection,
    job: &Job,
    plan: &TransitionPlan,
    guard: LeaseGuard<'_>,
) -> Result<usize, StoreError> {
    let merged = plan.updates.merged_into(job);
    let attempt = if plan.increment_attempt {
        job.attempt + 1
    } else {
        job.attempt
    };
    let (error_code, error_message, error_stack) = if plan.clear_error {
        (None, None, None)
    } else {
        (
            merged.error_code.map(|c| c.as_str().to_string()),
            merged.error_message.clone(),
            merged.error_stack.clone(),
        )
    };
    let completed_at = plan.completed_at.or(job.completed_at);
    let keep_lease = matches!(guard, LeaseGuard::OwnerKeep(_));
    let (lease_owner, lease_until) = if keep_lease {
        (job.lease_owner.clone(), job.lease_until)
    } else {
        (None, None)
    };

    let mut sql = String::from(
        "UPDATE jobs SET
            status = ?2, attempt = ?3,
            s3_original_key = ?4, s3_cutout_key = ?5, s3_mask_key = ?6,
            s3_bg_keys = ?7, s3_composite_keys = ?8, s3_derivative_keys = ?9,
            s3_manifest_key = ?10, shopify_media_ids = ?11, shopify_product_id = ?12,
            provider_job_id = ?13, error_code = ?14, error_message = ?15,
            error_stack = ?16, step_durations_ms = ?17, updated_at = ?18,
            completed_at = ?19, lease_owner = ?20, lease_until = ?21
         WHERE id = ?1",
    );
    if guard_owner(guard).is_some() {
        sql.push_str(" AND lease_owner = ?22");
    }

    let mut values: Vec<rusqlite::types::Value> = vec![
        job.id.clone().into(),
        plan.target.as_str().to_string().into(),
        i64::from(attempt).into(),
        merged.s3_original_key.clone().into(),
        merged.s3_cutout_key.clone().into(),
        merged.s3_mask_key.clone().into(),
        serde_json::to_string(&merged.s3_bg_keys)?.into(),
        serde_json::to_string(&merged.s3_composite_keys)?.into(),
        serde_json::to_string(&merged.s3_derivative_keys)?.into(),
        merged.s3_manifest_key.clone().into(),
        serde_json::to_string(&merged.shopify_media_ids)?.into(),
        merged.shopify_product_id.clone().into(),
        merged.provider_job_id.clone().into(),
        error_code.into(),
        error_message.into(),
        error_stack.into(),
        serde_json::to_string(&merged.step_durations_ms)?.into(),
        plan.updated_at.into(),
        completed_at.into(),
        lease_owner.into(),
        lease_until.into(),
    ];
    if let Some(owner) = guard_owner(guard) {
        values.push(owner.to_string().into());
    }
    let affected = conn.execute(&sql, params_from_iter(values))?;
    Ok(affected)
}

struct RawJob {
    id: String,
    sku: String,
    image_hash: String,
    theme: String,
    status: String,
    attempt: i64,
    source_url: String,
    s3_original_key: Option<String>,
    s3_cutout_key: Option<String>,
    s3_mask_key: Option<String>,
    s3_bg_keys: String,
    s3_composite_keys: String,
    s3_derivative_keys: String,
    s3_manifest_key: Option<String>,
    shopify_media_ids: String,
    shopify_product_id: Option<String>,
    provider_job_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    error_stack: Option<String>,
    cost_usd: f64,
    step_durations_ms: String,
    created_at: i64,
    updated_at: i64,
    completed_at: Option<i64>,
    lease_until: Option<i64>,
    lease_owner: Option<String>,
}

fn raw_from_row(row: &Row<'_>) -> rusqlite::Result<RawJob> {
    Ok(RawJob {
        id: row.get(0)?,
        sku: row.get(1)?,
        image_hash: row.get(2)?,
        theme: row.get(3)?,
        status: row.get(4)?,
        attempt: row.get(5)?,
        source_url: row.get(6)?,
        s3_original_key: row.get(7)?,
        s3_cutout_key: row.get(8)?,
        s3_mask_key: row.get(9)?,
        s3_bg_keys: row.get(10)?,
        s3_composite_keys: row.get(11)?,
        s3_derivative_keys: row.get(12)?,
        s3_manifest_key: row.get(13)?,
        shopify_media_ids: row.get(14)?,
        shopify_product_id: row.get(15)?,
        provider_job_id: row.get(16)?,
        error_code: row.get(17)?,
        error_message: row.get(18)?,
        error_stack: row.get(19)?,
        cost_usd: row.get(20)?,
        step_durations_ms: row.get(21)?,
        created_at: row.get(22)?,
        updated_at: row.get(23)?,
        completed_at: row.get(24)?,
        lease_until: row.get(25)?,
        lease_owner: row.get(26)?,
    })
}

impl RawJob {
    /// Validate stored shapes at the read boundary. A row that no longer
    /// parses surfaces as a typed Corrupt error instead of a panic or a
    /// raw serde error.
    fn finish(self) -> Result<Job, StoreError> {
        let corrupt = |detail: String| StoreError::Corrupt {
            id: self.id.clone(),
            detail,
        };
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status {:?}", self.status)))?;
        let error_code = match &self.error_code {
            Some(s) => Some(
                ErrorCode::parse(s).ok_or_else(|| corrupt(format!("unknown error code {:?}", s)))?,
            ),
            None => None,
        };
        let parse_list = |field: &str, raw: &str| -> Result<Vec<String>, StoreError> {
            serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
                id: self.id.clone(),
                detail: format!("{} is not a JSON string array: {}", field, e),
            })
        };
        let step_durations_ms: BTreeMap<String, i64> =
            serde_json::from_str(&self.step_durations_ms).unwrap_or_default();

        Ok(Job {
            s3_bg_keys: parse_list("s3_bg_keys", &self.s3_bg_keys)?,
            s3_composite_keys: parse_list("s3_composite_keys", &self.s3_composite_keys)?,
            s3_derivative_keys: parse_list("s3_derivative_keys", &self.s3_derivative_keys)?,
            shopify_media_ids: parse_list("shopify_media_ids", &self.shopify_media_ids)?,
            id: self.id,
            sku: self.sku,
            image_hash: self.image_hash,
            theme: self.theme,
            status,
            attempt: self.attempt.max(0) as u32,
            source_url: self.source_url,
            s3_original_key: self.s3_original_key,
            s3_cutout_key: self.s3_cutout_key,
            s3_mask_key: self.s3_mask_key,
            s3_manifest_key: self.s3_manifest_key,
            shopify_product_id: self.shopify_product_id,
            provider_job_id: self.provider_job_id,
            error_code,
            error_message: self.error_message,
            error_stack: self.error_stack,
            cost_usd: self.cost_usd,
            step_durations_ms,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
            lease_until: self.lease_until,
            lease_owner: self.lease_owner,
        })
    }
}

fn query_one(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Job>, StoreError> {
    let raw = conn.query_row(sql, params, raw_from_row).optional()?;
    raw.map(RawJob::finish).transpose()
}
