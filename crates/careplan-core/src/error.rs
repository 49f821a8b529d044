//! Error taxonomy returned by the ledger and the suggestion workflow.

use uuid::Uuid;

use careplan_db::StoreError;
use careplan_db::models::{SafetyCheckResult, SuggestionStatus};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Malformed input or plan content that fails the schema.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} already exists for {id}")]
    AlreadyExists { entity: &'static str, id: Uuid },

    /// The classifier refused generation. Carries the verdict so the
    /// reviewer can see what was flagged.
    #[error("generation blocked by safety check (risk level {})", .0.risk_level)]
    SafetyBlocked(SafetyCheckResult),

    #[error("suggestion {id} has already been reviewed (status {status})")]
    AlreadyReviewed { id: Uuid, status: SuggestionStatus },

    #[error("version conflict on treatment plan {treatment_plan_id} (expected {expected:?}, found {found:?})")]
    VersionConflict {
        treatment_plan_id: Uuid,
        expected: Option<i32>,
        found: Option<i32>,
    },

    /// The classifier or generator call failed, timed out, or returned an
    /// object that does not match the schema.
    #[error("upstream generation failed: {0}")]
    UpstreamGeneration(String),

    #[error("analysis was cancelled before completion")]
    Cancelled,

    #[error("persistence failure: {0}")]
    Persistence(#[source] StoreError),
}

impl WorkflowError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Short machine-readable tag, used in logs and HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::SafetyBlocked(_) => "safety_blocked",
            Self::AlreadyReviewed { .. } => "already_reviewed",
            Self::VersionConflict { .. } => "version_conflict",
            Self::UpstreamGeneration(_) => "upstream_generation",
            Self::Cancelled => "cancelled",
            Self::Persistence(_) => "persistence",
        }
    }
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::AlreadyExists { entity, id } => Self::AlreadyExists { entity, id },
            StoreError::AlreadyReviewed { id, status } => Self::AlreadyReviewed { id, status },
            StoreError::VersionConflict {
                treatment_plan_id,
                expected,
                found,
            } => Self::VersionConflict {
                treatment_plan_id,
                expected,
                found,
            },
            StoreError::Content(e) => Self::Validation(e.to_string()),
            other => Self::Persistence(other),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;
