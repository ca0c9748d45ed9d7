//! Job lifecycle state machine.
//!
//! Pure decision logic, no I/O: legal states and edges, the
//! required-fields gate for entering each state, retry eligibility, and
//! the resume target for re-queued failures. The store delegates every
//! status change here and persists exactly what the returned plan says.

use crate::errors::{ErrorCode, TransitionError};
use crate::models::{Job, JobUpdate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline states. The primary chain runs NEW through DONE; the legacy
/// chain (QUEUED..COMPOSITING) is recognized so historical records always
/// parse and validate, but new jobs never enter it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "NEW")]
    New,
    #[serde(rename = "BG_REMOVED")]
    BgRemoved,
    #[serde(rename = "BACKGROUND_READY")]
    BackgroundReady,
    #[serde(rename = "COMPOSITED")]
    Composited,
    #[serde(rename = "DERIVATIVES")]
    Derivatives,
    #[serde(rename = "SHOPIFY_PUSH")]
    ShopifyPush,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "FAILED")]
    Failed,
    // Legacy chain, kept for historical records.
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "SEGMENTING")]
    Segmenting,
    #[serde(rename = "BG_GENERATING")]
    BgGenerating,
    #[serde(rename = "COMPOSITING")]
    Compositing,
}

/// States the processor will lease and dispatch. Legacy states are
/// migrated onto the primary chain at startup, so they are not listed.
pub const RUNNABLE_STATUSES: [JobStatus; 6] = [
    JobStatus::New,
    JobStatus::BgRemoved,
    JobStatus::BackgroundReady,
    JobStatus::Composited,
    JobStatus::Derivatives,
    JobStatus::ShopifyPush,
];

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::BgRemoved => "BG_REMOVED",
            Self::BackgroundReady => "BACKGROUND_READY",
            Self::Composited => "COMPOSITED",
            Self::Derivatives => "DERIVATIVES",
            Self::ShopifyPush => "SHOPIFY_PUSH",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
            Self::Queued => "QUEUED",
            Self::Segmenting => "SEGMENTING",
            Self::BgGenerating => "BG_GENERATING",
            Self::Compositing => "COMPOSITING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEW" => Some(Self::New),
            "BG_REMOVED" => Some(Self::BgRemoved),
            "BACKGROUND_READY" => Some(Self::BackgroundReady),
            "COMPOSITED" => Some(Self::Composited),
            "DERIVATIVES" => Some(Self::Derivatives),
            "SHOPIFY_PUSH" => Some(Self::ShopifyPush),
            "DONE" => Some(Self::Done),
            "FAILED" => Some(Self::Failed),
            "QUEUED" => Some(Self::Queued),
            "SEGMENTING" => Some(Self::Segmenting),
            "BG_GENERATING" => Some(Self::BgGenerating),
            "COMPOSITING" => Some(Self::Compositing),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Segmenting | Self::BgGenerating | Self::Compositing
        )
    }

    /// Explicit forward edges. FAILED is additionally reachable from any
    /// non-terminal state; that edge is handled in `can_transition`.
    pub fn successors(&self) -> &'static [JobStatus] {
        match self {
            Self::New => &[JobStatus::BgRemoved],
            Self::BgRemoved => &[JobStatus::BackgroundReady],
            Self::BackgroundReady => &[JobStatus::Composited],
            Self::Composited => &[JobStatus::Derivatives],
            Self::Derivatives => &[JobStatus::ShopifyPush],
            Self::ShopifyPush => &[JobStatus::Done],
            Self::Done | Self::Failed => &[],
            Self::Queued => &[JobStatus::Segmenting],
            Self::Segmenting => &[JobStatus::BgGenerating],
            Self::BgGenerating => &[JobStatus::Compositing],
            Self::Compositing => &[JobStatus::ShopifyPush],
        }
    }

    pub fn can_transition(&self, target: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if target == JobStatus::Failed {
            return true;
        }
        self.successors().contains(&target)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the store needs to persist for one validated transition.
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub target: JobStatus,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    /// Retry path: wipe error_code/message/stack.
    pub clear_error: bool,
    /// Retry path: attempt = attempt + 1 in the same statement.
    pub increment_attempt: bool,
    pub updates: JobUpdate,
}

/// Validate `target` against the job snapshot with `updates` merged in.
///
/// Total over all inputs: returns either the update set to persist or a
/// typed error. `now_ms` is injected so callers (and tests) control time.
pub fn plan_transition(
    job: &Job,
    target: JobStatus,
    updates: JobUpdate,
    now_ms: i64,
) -> Result<TransitionPlan, TransitionError> {
    if !job.status.can_transition(target) {
        return Err(TransitionError::InvalidTransition {
            from: job.status.as_str(),
            to: target.as_str(),
        });
    }

    let merged = updates.merged_into(job);
    let missing = missing_required_fields(target, &merged);
    if !missing.is_empty() {
        return Err(TransitionError::MissingRequiredFields {
            state: target.as_str(),
            fields: missing,
        });
    }

    Ok(TransitionPlan {
        target,
        updated_at: now_ms,
        completed_at: target.is_terminal().then_some(now_ms),
        clear_error: false,
        increment_attempt: false,
        updates,
    })
}

/// Fields a job must carry to sit in `state`. List-valued fields must be
/// parsed and non-empty. Legacy mid-pipeline states predate the gate and
/// carry no artifact requirements.
fn missing_required_fields(state: JobStatus, job: &Job) -> Vec<&'static str> {
    let mut missing = Vec::new();
    match state {
        JobStatus::New | JobStatus::Queued => {
            if job.sku.is_empty() {
                missing.push("sku");
            }
            if job.image_hash.len() != 64 {
                missing.push("image_hash");
            }
            if job.theme.is_empty() {
                missing.push("theme");
            }
        }
        JobStatus::BgRemoved => {
            if job.s3_original_key.is_none() {
                missing.push("s3_original_key");
            }
            if job.s3_cutout_key.is_none() {
                missing.push("s3_cutout_key");
            }
            if job.s3_mask_key.is_none() {
                missing.push("s3_mask_key");
            }
        }
        JobStatus::BackgroundReady => {
            if job.s3_bg_keys.is_empty() {
                missing.push("s3_bg_keys");
            }
        }
        JobStatus::Composited => {
            if job.s3_composite_keys.is_empty() {
                missing.push("s3_composite_keys");
            }
        }
        JobStatus::Derivatives => {
            if job.s3_derivative_keys.is_empty() {
                missing.push("s3_derivative_keys");
            }
            if job.s3_manifest_key.is_none() {
                missing.push("s3_manifest_key");
            }
        }
        JobStatus::ShopifyPush => {
            if job.shopify_media_ids.is_empty() {
                missing.push("shopify_media_ids");
            }
        }
        JobStatus::Done => {
            if job.s3_manifest_key.is_none() {
                missing.push("s3_manifest_key");
            }
        }
        JobStatus::Failed => {
            if job.error_code.is_none() {
                missing.push("error_code");
            }
            if job.error_message.is_none() {
                missing.push("error_message");
            }
        }
        JobStatus::Segmenting | JobStatus::BgGenerating | JobStatus::Compositing => {}
    }
    missing
}

/// Exponential backoff with a 2 s base: 2000 * 2^attempt ms.
pub fn retry_delay_ms(attempt: u32) -> u64 {
    2000u64.saturating_mul(1u64 << attempt.min(20))
}

/// Why a failed job cannot be re-queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryIneligible {
    NotFailed(JobStatus),
    AttemptsExhausted { attempt: u32, max: u32 },
    NonRetryableCode(ErrorCode),
    MissingErrorCode,
}

impl fmt::Display for RetryIneligible {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFailed(s) => write!(f, "job is {}, not FAILED", s),
            Self::AttemptsExhausted { attempt, max } => {
                write!(f, "attempt {} reached the limit of {}", attempt, max)
            }
            Self::NonRetryableCode(c) => write!(f, "error code {} is not retryable", c),
            Self::MissingErrorCode => f.write_str("job has no error code"),
        }
    }
}

pub fn can_retry(job: &Job, max_attempts: u32) -> bool {
    check_retry(job, max_attempts).is_ok()
}

pub fn check_retry(job: &Job, max_attempts: u32) -> Result<(), RetryIneligible> {
    if job.status != JobStatus::Failed {
        return Err(RetryIneligible::NotFailed(job.status));
    }
    if job.attempt >= max_attempts {
        return Err(RetryIneligible::AttemptsExhausted {
            attempt: job.attempt,
            max: max_attempts,
        });
    }
    match job.error_code {
        Some(code) if code.is_retryable(job.attempt) => Ok(()),
        Some(code) => Err(RetryIneligible::NonRetryableCode(code)),
        None => Err(RetryIneligible::MissingErrorCode),
    }
}

/// The furthest primary-chain state whose required artifacts the job
/// already carries. Re-queued failures resume here, so finished steps are
/// never repeated.
pub fn resume_state(job: &Job) -> JobStatus {
    if !job.s3_derivative_keys.is_empty() && job.s3_manifest_key.is_some() {
        JobStatus::Derivatives
    } else if !job.s3_composite_keys.is_empty() {
        JobStatus::Composited
    } else if !job.s3_bg_keys.is_empty() {
        JobStatus::BackgroundReady
    } else if job.has_segmentation_artifacts() {
        JobStatus::BgRemoved
    } else {
        JobStatus::New
    }
}

/// The retry re-queue: FAILED back to `resume_state`, clearing the error
/// and consuming an attempt. This is the only edge out of FAILED and it
/// exists solely through this function.
pub fn plan_retry(
    job: &Job,
    max_attempts: u32,
    now_ms: i64,
) -> Result<TransitionPlan, RetryIneligible> {
    check_retry(job, max_attempts)?;
    Ok(TransitionPlan {
        target: resume_state(job),
        updated_at: now_ms,
        completed_at: None,
        clear_error: true,
        increment_attempt: true,
        updates: JobUpdate::default(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::collections::BTreeMap;

    /// Bare NEW-state job for state machine and store tests.
    pub fn job(status: JobStatus) -> Job {
        Job {
            id: "job-1".to_string(),
            sku: "SKU-1".to_string(),
            image_hash: "a".repeat(64),
            theme: "default".to_string(),
            status,
            attempt: 0,
            source_url: "https://example.com/i.jpg".to_string(),
            s3_original_key: None,
            s3_cutout_key: None,
            s3_mask_key: None,
            s3_bg_keys: Vec::new(),
            s3_composite_keys: Vec::new(),
            s3_derivative_keys: Vec::new(),
            s3_manifest_key: None,
            shopify_media_ids: Vec::new(),
            shopify_product_id: None,
            provider_job_id: None,
            error_code: None,
            error_message: None,
            error_stack: None,
            cost_usd: 0.0,
            step_durations_ms: BTreeMap::new(),
            created_at: 1_700_000_000_000,
            updated_at: 1_700_000_000_000,
            completed_at: None,
            lease_until: None,
            lease_owner: None,
        }
    }

    /// Job carrying every artifact up to and including `status`'s gate.
    pub fn job_with_artifacts(status: JobStatus) -> Job {
        let mut j = job(status);
        let rank = |s: JobStatus| match s {
            JobStatus::New => 0,
            JobStatus::BgRemoved => 1,
            JobStatus::BackgroundReady => 2,
            JobStatus::Composited => 3,
            JobStatus::Derivatives => 4,
            JobStatus::ShopifyPush => 5,
            JobStatus::Done => 6,
            _ => 0,
        };
        let r = rank(status);
        if r >= 1 {
            j.s3_original_key = Some("originals/SKU-1/h.jpg".into());
            j.s3_cutout_key = Some("cutouts/SKU-1/h.png".into());
            j.s3_mask_key = Some("masks/SKU-1/h.png".into());
        }
        if r >= 2 {
            j.s3_bg_keys = vec!["backgrounds/SKU-1/h/default/v1.jpg".into()];
        }
        if r >= 3 {
            j.s3_composite_keys = vec!["composites/SKU-1/h/default/1x1/v1/sharp.jpg".into()];
        }
        if r >= 4 {
            j.s3_derivative_keys = vec!["derivatives/SKU-1/h/default/1x1/1024x1024.jpg".into()];
            j.s3_manifest_key = Some("manifests/SKU-1/h/default.json".into());
        }
        if r >= 5 {
            j.shopify_media_ids = vec!["gid://shopify/MediaImage/1".into()];
        }
        j
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{job, job_with_artifacts};
    use super::*;

    const NOW: i64 = 1_700_000_100_000;

    #[test]
    fn primary_chain_edges() {
        let chain = [
            JobStatus::New,
            JobStatus::BgRemoved,
            JobStatus::BackgroundReady,
            JobStatus::Composited,
            JobStatus::Derivatives,
            JobStatus::ShopifyPush,
            JobStatus::Done,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        // No skipping.
        assert!(!JobStatus::New.can_transition(JobStatus::BackgroundReady));
        assert!(!JobStatus::BgRemoved.can_transition(JobStatus::Composited));
        assert!(!JobStatus::Derivatives.can_transition(JobStatus::Done));
        // No going backwards.
        assert!(!JobStatus::Composited.can_transition(JobStatus::BgRemoved));
    }

    #[test]
    fn legacy_chain_edges() {
        assert!(JobStatus::Queued.can_transition(JobStatus::Segmenting));
        assert!(JobStatus::Segmenting.can_transition(JobStatus::BgGenerating));
        assert!(JobStatus::BgGenerating.can_transition(JobStatus::Compositing));
        assert!(JobStatus::Compositing.can_transition(JobStatus::ShopifyPush));
        // The chains do not cross.
        assert!(!JobStatus::Queued.can_transition(JobStatus::BgRemoved));
        assert!(!JobStatus::New.can_transition(JobStatus::Segmenting));
    }

    #[test]
    fn any_non_terminal_can_fail() {
        for s in [
            JobStatus::New,
            JobStatus::BgRemoved,
            JobStatus::BackgroundReady,
            JobStatus::Composited,
            JobStatus::Derivatives,
            JobStatus::ShopifyPush,
            JobStatus::Queued,
            JobStatus::Segmenting,
            JobStatus::BgGenerating,
            JobStatus::Compositing,
        ] {
            assert!(s.can_transition(JobStatus::Failed), "{} -> FAILED", s);
        }
    }

    #[test]
    fn terminal_states_forbid_everything() {
        for s in [JobStatus::Done, JobStatus::Failed] {
            for t in [
                JobStatus::New,
                JobStatus::BgRemoved,
                JobStatus::Done,
                JobStatus::Failed,
            ] {
                assert!(!s.can_transition(t), "{} -> {}", s, t);
            }
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [
            JobStatus::New,
            JobStatus::BgRemoved,
            JobStatus::BackgroundReady,
            JobStatus::Composited,
            JobStatus::Derivatives,
            JobStatus::ShopifyPush,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Queued,
            JobStatus::Segmenting,
            JobStatus::BgGenerating,
            JobStatus::Compositing,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(JobStatus::parse("RUNNING"), None);
    }

    #[test]
    fn transition_requires_artifacts() {
        let j = job(JobStatus::New);
        let err = plan_transition(&j, JobStatus::BgRemoved, JobUpdate::default(), NOW)
            .expect_err("gate should reject");
        match err {
            TransitionError::MissingRequiredFields { state, fields } => {
                assert_eq!(state, "BG_REMOVED");
                assert_eq!(
                    fields,
                    vec!["s3_original_key", "s3_cutout_key", "s3_mask_key"]
                );
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn transition_accepts_merged_updates() {
        let j = job(JobStatus::New);
        let updates = JobUpdate {
            s3_original_key: Some("originals/SKU-1/h.jpg".into()),
            s3_cutout_key: Some("cutouts/SKU-1/h.png".into()),
            s3_mask_key: Some("masks/SKU-1/h.png".into()),
            ..Default::default()
        };
        let plan = plan_transition(&j, JobStatus::BgRemoved, updates, NOW).expect("legal");
        assert_eq!(plan.target, JobStatus::BgRemoved);
        assert_eq!(plan.updated_at, NOW);
        assert_eq!(plan.completed_at, None);
    }

    #[test]
    fn empty_list_fails_the_gate() {
        let mut j = job_with_artifacts(JobStatus::BgRemoved);
        j.s3_bg_keys.clear();
        let err = plan_transition(&j, JobStatus::BackgroundReady, JobUpdate::default(), NOW)
            .expect_err("empty list");
        assert_eq!(err.code(), ErrorCode::MissingRequiredFields);
    }

    #[test]
    fn terminal_transitions_stamp_completed_at() {
        let j = job_with_artifacts(JobStatus::ShopifyPush);
        let plan = plan_transition(&j, JobStatus::Done, JobUpdate::default(), NOW).expect("legal");
        assert_eq!(plan.completed_at, Some(NOW));

        let j = job(JobStatus::New);
        let updates = JobUpdate {
            error_code: Some(ErrorCode::SegmentFailed),
            error_message: Some("provider 502".into()),
            ..Default::default()
        };
        let plan = plan_transition(&j, JobStatus::Failed, updates, NOW).expect("legal");
        assert_eq!(plan.completed_at, Some(NOW));
    }

    #[test]
    fn failed_requires_code_and_message() {
        let j = job(JobStatus::New);
        let err = plan_transition(&j, JobStatus::Failed, JobUpdate::default(), NOW)
            .expect_err("missing error fields");
        assert_eq!(err.code(), ErrorCode::MissingRequiredFields);
    }

    #[test]
    fn illegal_edge_is_typed() {
        let j = job_with_artifacts(JobStatus::Done);
        let err = plan_transition(&j, JobStatus::New, JobUpdate::default(), NOW)
            .expect_err("terminal");
        assert_eq!(err.code(), ErrorCode::InvalidTransition);
    }

    #[test]
    fn retry_delay_doubles_from_two_seconds() {
        assert_eq!(retry_delay_ms(0), 2_000);
        assert_eq!(retry_delay_ms(1), 4_000);
        assert_eq!(retry_delay_ms(2), 8_000);
        assert_eq!(retry_delay_ms(3), 16_000);
    }

    #[test]
    fn retry_eligibility() {
        let mut j = job(JobStatus::Failed);
        j.error_code = Some(ErrorCode::SegmentFailed);
        j.error_message = Some("boom".into());
        assert!(can_retry(&j, 3));

        j.attempt = 3;
        assert!(!can_retry(&j, 3));

        j.attempt = 0;
        j.error_code = Some(ErrorCode::InvalidImage);
        assert!(!can_retry(&j, 3));

        j.error_code = Some(ErrorCode::ProductNotFound);
        assert!(!can_retry(&j, 3));

        let running = job(JobStatus::Composited);
        assert!(!can_retry(&running, 3));
    }

    #[test]
    fn resume_state_follows_artifacts() {
        let j = job(JobStatus::Failed);
        assert_eq!(resume_state(&j), JobStatus::New);

        let mut j = job_with_artifacts(JobStatus::BgRemoved);
        j.status = JobStatus::Failed;
        assert_eq!(resume_state(&j), JobStatus::BgRemoved);

        let mut j = job_with_artifacts(JobStatus::Composited);
        j.status = JobStatus::Failed;
        assert_eq!(resume_state(&j), JobStatus::Composited);

        let mut j = job_with_artifacts(JobStatus::Derivatives);
        j.status = JobStatus::Failed;
        assert_eq!(resume_state(&j), JobStatus::Derivatives);
    }

    #[test]
    fn retry_plan_clears_error_and_consumes_attempt() {
        let mut j = job_with_artifacts(JobStatus::BgRemoved);
        j.status = JobStatus::Failed;
        j.error_code = Some(ErrorCode::BackgroundFailed);
        j.error_message = Some("timeout upstream".into());
        j.attempt = 1;

        let plan = plan_retry(&j, 3, NOW).expect("eligible");
        assert_eq!(plan.target, JobStatus::BgRemoved);
        assert!(plan.clear_error);
        assert!(plan.increment_attempt);
        assert_eq!(plan.completed_at, None);
    }

    #[test]
    fn retry_plan_rejects_non_retryable() {
        let mut j = job(JobStatus::Failed);
        j.error_code = Some(ErrorCode::InvalidImage);
        j.error_message = Some("hash mismatch".into());
        assert_eq!(
            plan_retry(&j, 3, NOW).expect_err("non-retryable"),
            RetryIneligible::NonRetryableCode(ErrorCode::InvalidImage)
        );
    }
}
