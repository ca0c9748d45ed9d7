//! Pipeline error taxonomy and store error types.
//!
//! Every failure a job can carry is one of the fixed `ErrorCode` variants;
//! the code decides retry eligibility. Store-level failures get their own
//! enum so callers can tell a lost lease from a bad transition.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed failure taxonomy. Codes surface verbatim in job records and HTTP
/// error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ProductNotFound,
    SegmentFailed,
    BackgroundFailed,
    CompositeFailed,
    StorefrontUploadFailed,
    StorageFailed,
    Timeout,
    InvalidImage,
    QualityCheckFailed,
    MaxRetriesExceeded,
    InvalidTransition,
    MissingRequiredFields,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProductNotFound => "ProductNotFound",
            Self::SegmentFailed => "SegmentFailed",
            Self::BackgroundFailed => "BackgroundFailed",
            Self::CompositeFailed => "CompositeFailed",
            Self::StorefrontUploadFailed => "StorefrontUploadFailed",
            Self::StorageFailed => "StorageFailed",
            Self::Timeout => "Timeout",
            Self::InvalidImage => "InvalidImage",
            Self::QualityCheckFailed => "QualityCheckFailed",
            Self::MaxRetriesExceeded => "MaxRetriesExceeded",
            Self::InvalidTransition => "InvalidTransition",
            Self::MissingRequiredFields => "MissingRequiredFields",
            Self::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ProductNotFound" => Some(Self::ProductNotFound),
            "SegmentFailed" => Some(Self::SegmentFailed),
            "BackgroundFailed" => Some(Self::BackgroundFailed),
            "CompositeFailed" => Some(Self::CompositeFailed),
            "StorefrontUploadFailed" => Some(Self::StorefrontUploadFailed),
            "StorageFailed" => Some(Self::StorageFailed),
            "Timeout" => Some(Self::Timeout),
            "InvalidImage" => Some(Self::InvalidImage),
            "QualityCheckFailed" => Some(Self::QualityCheckFailed),
            "MaxRetriesExceeded" => Some(Self::MaxRetriesExceeded),
            "InvalidTransition" => Some(Self::InvalidTransition),
            "MissingRequiredFields" => Some(Self::MissingRequiredFields),
            "Unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Whether a job failed with this code may be re-queued. `attempt` is
    /// the number of retries already consumed; `QualityCheckFailed` gets a
    /// single retry and is terminal after that.
    pub fn is_retryable(&self, attempt: u32) -> bool {
        match self {
            Self::InvalidImage
            | Self::ProductNotFound
            | Self::MaxRetriesExceeded
            | Self::InvalidTransition
            | Self::MissingRequiredFields => false,
            Self::QualityCheckFailed => attempt == 0,
            _ => true,
        }
    }

    /// Codes that are only ever HTTP responses. The store refuses to
    /// persist these on a job record.
    pub fn is_persistable(&self) -> bool {
        !matches!(self, Self::InvalidTransition | Self::MissingRequiredFields)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by the persistence layer.
#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    NotFound(String),
    /// A stored row no longer parses (bad status string, malformed JSON
    /// list). Classified as `Unknown` at the API boundary.
    Corrupt { id: String, detail: String },
    Transition(TransitionError),
    /// The caller's lease no longer covers the job.
    LeaseLost { id: String, owner: String },
    RetryNotEligible { id: String, reason: String },
    InvalidInput(String),
    Migration(String),
    Io(std::io::Error),
}

/// Typed outcome of an illegal state-machine request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    MissingRequiredFields {
        state: &'static str,
        fields: Vec<&'static str>,
    },
}

impl TransitionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::MissingRequiredFields { .. } => ErrorCode::MissingRequiredFields,
        }
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, to } => {
                write!(f, "illegal transition {} -> {}", from, to)
            }
            Self::MissingRequiredFields { state, fields } => {
                write!(f, "state {} requires fields: {}", state, fields.join(", "))
            }
        }
    }
}

impl std::error::Error for TransitionError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "SQLite error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::NotFound(id) => write!(f, "Job not found: {}", id),
            Self::Corrupt { id, detail } => write!(f, "Corrupt record {}: {}", id, detail),
            Self::Transition(e) => write!(f, "{}", e),
            Self::LeaseLost { id, owner } => {
                write!(f, "Lease on {} no longer held by {}", id, owner)
            }
            Self::RetryNotEligible { id, reason } => {
                write!(f, "Job {} not eligible for retry: {}", id, reason)
            }
            Self::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            Self::Migration(msg) => write!(f, "Migration error: {}", msg),
            Self::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

impl From<TransitionError> for StoreError {
    fn from(e: TransitionError) -> Self {
        Self::Transition(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
