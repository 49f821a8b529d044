//! Storage seam for the ledger and the suggestion workflow.
//!
//! [`PlanStore`] is the explicit handle the workflow operates through. The
//! Postgres implementation runs every multi-row write in its own
//! transaction; the in-memory implementation holds one lock for the same
//! span, so tests exercise the same atomicity guarantees without a
//! database.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use careplan_db::models::{PlanSuggestion, PlanVersion, Session, TreatmentPlan};
use careplan_db::queries::plans::NewVersion;
use careplan_db::queries::suggestions::NewSuggestion;
use careplan_db::{PlanContent, StoreResult};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Outcome of inserting a pending suggestion.
#[derive(Debug, Clone, PartialEq)]
pub enum SuggestionInsert {
    Created(PlanSuggestion),
    /// The session already had a pending suggestion; it is returned as-is.
    Existing(PlanSuggestion),
}

impl SuggestionInsert {
    pub fn into_inner(self) -> PlanSuggestion {
        match self {
            Self::Created(s) | Self::Existing(s) => s,
        }
    }
}

/// Result of a successful approval: the suggestion in its approved state
/// and the version it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Approval {
    pub suggestion: PlanSuggestion,
    pub version: PlanVersion,
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    // -- sessions (read-only; owned by an external collaborator) --

    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>>;

    /// Most recent transcribed session of the patient recorded before
    /// `session_id`.
    async fn latest_prior_session(
        &self,
        patient_id: Uuid,
        session_id: Uuid,
    ) -> StoreResult<Option<Session>>;

    // -- plans and versions --

    async fn get_plan(&self, id: Uuid) -> StoreResult<Option<TreatmentPlan>>;

    async fn get_plan_for_patient(&self, patient_id: Uuid) -> StoreResult<Option<TreatmentPlan>>;

    async fn current_version(&self, treatment_plan_id: Uuid) -> StoreResult<Option<PlanVersion>>;

    /// All versions, ascending.
    async fn list_versions(&self, treatment_plan_id: Uuid) -> StoreResult<Vec<PlanVersion>>;

    /// Create the patient's plan and version 1 atomically.
    async fn create_initial(
        &self,
        patient_id: Uuid,
        content: &PlanContent,
        created_by: Option<&str>,
    ) -> StoreResult<PlanVersion>;

    /// Append `max(version) + 1`. Fails with `VersionConflict` rather than
    /// reuse a version number.
    async fn commit_version(&self, new: &NewVersion<'_>) -> StoreResult<PlanVersion>;

    // -- suggestions --

    async fn get_suggestion(&self, id: Uuid) -> StoreResult<Option<PlanSuggestion>>;

    async fn pending_suggestion_for_session(
        &self,
        session_id: Uuid,
    ) -> StoreResult<Option<PlanSuggestion>>;

    async fn insert_pending_suggestion(
        &self,
        new: &NewSuggestion<'_>,
    ) -> StoreResult<SuggestionInsert>;

    /// Commit the suggestion's content as a new `SESSION_UPDATE` version and
    /// mark it approved, all or nothing.
    async fn approve_suggestion(
        &self,
        id: Uuid,
        reviewer: &str,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<Approval>;

    /// Mark a pending suggestion rejected. Never touches plan versions.
    async fn reject_suggestion(
        &self,
        id: Uuid,
        reviewer: &str,
        reason: &str,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<PlanSuggestion>;
}

// Compile-time assertion: PlanStore must be usable as `dyn PlanStore`.
const _: () = {
    fn _assert_object_safe(_: &dyn PlanStore) {}
};

/// The version row an approval appends for `suggestion`.
pub(crate) fn approval_version<'a>(
    suggestion: &'a PlanSuggestion,
    reviewer: &'a str,
) -> NewVersion<'a> {
    NewVersion {
        treatment_plan_id: suggestion.treatment_plan_id,
        content: &suggestion.suggested_changes,
        change_type: careplan_db::models::ChangeType::SessionUpdate,
        change_reason: Some("Approved session suggestion"),
        change_summary: Some(&suggestion.session_summary),
        suggestion_id: Some(suggestion.id),
        created_by: Some(reviewer),
        expected_version: None,
    }
}
