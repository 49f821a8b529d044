//! Typed errors surfaced by the persistence layer.
//!
//! The workflow layer needs to tell a lost version race from a missing row
//! from a broken connection, so queries that participate in the plan ledger
//! return [`StoreError`] instead of an opaque `anyhow::Error`.

use uuid::Uuid;

use crate::content::ContentError;
use crate::models::SuggestionStatus;

/// Name of the unique constraint guarding `(treatment_plan_id, version)`.
pub const VERSION_UNIQUE_CONSTRAINT: &str = "plan_versions_plan_version_key";
/// Name of the unique constraint allowing one treatment plan per patient.
pub const PLAN_PATIENT_UNIQUE_CONSTRAINT: &str = "treatment_plans_patient_id_key";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{entity} already exists for {id}")]
    AlreadyExists { entity: &'static str, id: Uuid },

    #[error("suggestion {id} has already been reviewed (status {status})")]
    AlreadyReviewed { id: Uuid, status: SuggestionStatus },

    #[error(
        "version conflict on treatment plan {treatment_plan_id}: expected current version {expected:?}, found {found:?}"
    )]
    VersionConflict {
        treatment_plan_id: Uuid,
        expected: Option<i32>,
        found: Option<i32>,
    },

    #[error("stored row {id} is inconsistent: {message}")]
    InvalidRow { id: Uuid, message: String },

    #[error("stored plan content is invalid: {0}")]
    Content(#[from] ContentError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn invalid_row(id: Uuid, message: impl Into<String>) -> Self {
        Self::InvalidRow {
            id,
            message: message.into(),
        }
    }
}

/// Name of the constraint a unique-violation error tripped, if any.
pub fn violated_unique_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            db.constraint().map(str::to_owned)
        }
        _ => None,
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
