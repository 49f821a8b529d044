//! Database query functions for the `plan_suggestions` table.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::content::PlanContent;
use crate::error::{StoreError, StoreResult};
use crate::models::{PlanSuggestion, SafetyCheckResult, SuggestionRow};

/// Parameters for inserting a pending suggestion.
#[derive(Debug, Clone)]
pub struct NewSuggestion<'a> {
    pub treatment_plan_id: Uuid,
    pub session_id: Uuid,
    pub session_summary: &'a str,
    pub progress_notes: Option<&'a str>,
    pub suggested_changes: &'a PlanContent,
    pub safety: &'a SafetyCheckResult,
    pub transcript_sha256: &'a str,
}

/// Insert a pending suggestion unless the session already has one.
///
/// Returns `None` when the partial unique index on pending suggestions
/// rejected the row; the caller should then read the existing one with
/// [`get_pending_for_session`].
pub async fn insert_pending<'e>(
    executor: impl PgExecutor<'e>,
    new: &NewSuggestion<'_>,
) -> StoreResult<Option<PlanSuggestion>> {
    new.suggested_changes.validate()?;

    let row = sqlx::query_as::<_, SuggestionRow>(
        "INSERT INTO plan_suggestions \
         (treatment_plan_id, session_id, session_summary, progress_notes, suggested_changes, \
          safety_risk_level, safety_flags, safety_reasoning, transcript_sha256) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         ON CONFLICT (session_id) WHERE status = 'pending' DO NOTHING \
         RETURNING *",
    )
    .bind(new.treatment_plan_id)
    .bind(new.session_id)
    .bind(new.session_summary)
    .bind(new.progress_notes)
    .bind(Json(new.suggested_changes))
    .bind(new.safety.risk_level)
    .bind(Json(&new.safety.risk_flags))
    .bind(new.safety.reasoning.as_deref())
    .bind(new.transcript_sha256)
    .fetch_optional(executor)
    .await?;

    row.map(PlanSuggestion::try_from).transpose()
}

/// Fetch a suggestion by ID.
pub async fn get_suggestion<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> StoreResult<Option<PlanSuggestion>> {
    let row = sqlx::query_as::<_, SuggestionRow>("SELECT * FROM plan_suggestions WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    row.map(PlanSuggestion::try_from).transpose()
}

/// Fetch a suggestion and lock its row until the transaction ends.
pub async fn get_suggestion_for_update(
    conn: &mut PgConnection,
    id: Uuid,
) -> StoreResult<Option<PlanSuggestion>> {
    let row = sqlx::query_as::<_, SuggestionRow>(
        "SELECT * FROM plan_suggestions WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(PlanSuggestion::try_from).transpose()
}

/// The pending suggestion for a session, if one exists.
pub async fn get_pending_for_session<'e>(
    executor: impl PgExecutor<'e>,
    session_id: Uuid,
) -> StoreResult<Option<PlanSuggestion>> {
    let row = sqlx::query_as::<_, SuggestionRow>(
        "SELECT * FROM plan_suggestions WHERE session_id = $1 AND status = 'pending'",
    )
    .bind(session_id)
    .fetch_optional(executor)
    .await?;

    row.map(PlanSuggestion::try_from).transpose()
}

/// Transition `pending -> approved`.
///
/// Returns `None` if no pending row matched; the caller distinguishes a
/// missing suggestion from an already-reviewed one.
pub async fn mark_approved(
    conn: &mut PgConnection,
    id: Uuid,
    reviewer: &str,
    reviewed_at: DateTime<Utc>,
) -> StoreResult<Option<PlanSuggestion>> {
    let row = sqlx::query_as::<_, SuggestionRow>(
        "UPDATE plan_suggestions \
         SET status = 'approved', reviewed_at = $2, reviewed_by = $3 \
         WHERE id = $1 AND status = 'pending' \
         RETURNING *",
    )
    .bind(id)
    .bind(reviewed_at)
    .bind(reviewer)
    .fetch_optional(conn)
    .await?;

    row.map(PlanSuggestion::try_from).transpose()
}

/// Transition `pending -> rejected`, recording the reason as therapist notes.
///
/// Fails with [`StoreError::NotFound`] or [`StoreError::AlreadyReviewed`]
/// when the guard does not match.
pub async fn mark_rejected(
    conn: &mut PgConnection,
    id: Uuid,
    reviewer: &str,
    reason: &str,
    reviewed_at: DateTime<Utc>,
) -> StoreResult<PlanSuggestion> {
    let row = sqlx::query_as::<_, SuggestionRow>(
        "UPDATE plan_suggestions \
         SET status = 'rejected', reviewed_at = $2, reviewed_by = $3, therapist_notes = $4 \
         WHERE id = $1 AND status = 'pending' \
         RETURNING *",
    )
    .bind(id)
    .bind(reviewed_at)
    .bind(reviewer)
    .bind(reason)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => PlanSuggestion::try_from(row),
        None => Err(review_guard_error(conn, id).await),
    }
}

/// Explain why a `WHERE status = 'pending'` update matched nothing.
pub async fn review_guard_error(conn: &mut PgConnection, id: Uuid) -> StoreError {
    match get_suggestion(conn, id).await {
        Ok(None) => StoreError::not_found("suggestion", id),
        Ok(Some(existing)) => StoreError::AlreadyReviewed {
            id,
            status: existing.status(),
        },
        Err(e) => e,
    }
}
