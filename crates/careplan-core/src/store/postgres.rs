//! [`PlanStore`] over a Postgres pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use careplan_db::models::{PlanSuggestion, PlanVersion, Session, TreatmentPlan};
use careplan_db::queries::plans::{self, NewVersion};
use careplan_db::queries::suggestions::{self, NewSuggestion};
use careplan_db::queries::sessions;
use careplan_db::{PlanContent, StoreError, StoreResult};

use super::{Approval, PlanStore, SuggestionInsert, approval_version};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl PlanStore for PgStore {
    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        sessions::get_session(&self.pool, id).await
    }

    async fn latest_prior_session(
        &self,
        patient_id: Uuid,
        session_id: Uuid,
    ) -> StoreResult<Option<Session>> {
        sessions::latest_prior_session(&self.pool, patient_id, session_id).await
    }

    async fn get_plan(&self, id: Uuid) -> StoreResult<Option<TreatmentPlan>> {
        plans::get_plan(&self.pool, id).await
    }

    async fn get_plan_for_patient(&self, patient_id: Uuid) -> StoreResult<Option<TreatmentPlan>> {
        plans::get_plan_for_patient(&self.pool, patient_id).await
    }

    async fn current_version(&self, treatment_plan_id: Uuid) -> StoreResult<Option<PlanVersion>> {
        plans::current_version(&self.pool, treatment_plan_id).await
    }

    async fn list_versions(&self, treatment_plan_id: Uuid) -> StoreResult<Vec<PlanVersion>> {
        plans::list_versions(&self.pool, treatment_plan_id).await
    }

    async fn create_initial(
        &self,
        patient_id: Uuid,
        content: &PlanContent,
        created_by: Option<&str>,
    ) -> StoreResult<PlanVersion> {
        let mut tx = self.pool.begin().await?;
        let version = plans::create_initial(&mut *tx, patient_id, content, created_by).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn commit_version(&self, new: &NewVersion<'_>) -> StoreResult<PlanVersion> {
        let mut tx = self.pool.begin().await?;
        let version = plans::commit_version(&mut *tx, new).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn get_suggestion(&self, id: Uuid) -> StoreResult<Option<PlanSuggestion>> {
        suggestions::get_suggestion(&self.pool, id).await
    }

    async fn pending_suggestion_for_session(
        &self,
        session_id: Uuid,
    ) -> StoreResult<Option<PlanSuggestion>> {
        suggestions::get_pending_for_session(&self.pool, session_id).await
    }

    async fn insert_pending_suggestion(
        &self,
        new: &NewSuggestion<'_>,
    ) -> StoreResult<SuggestionInsert> {
        if let Some(created) = suggestions::insert_pending(&self.pool, new).await? {
            return Ok(SuggestionInsert::Created(created));
        }
        // Lost the race to a concurrent analysis of the same session.
        match suggestions::get_pending_for_session(&self.pool, new.session_id).await? {
            Some(existing) => Ok(SuggestionInsert::Existing(existing)),
            // The winner was reviewed between our insert and this read.
            None => Err(StoreError::AlreadyExists {
                entity: "pending suggestion",
                id: new.session_id,
            }),
        }
    }

    async fn approve_suggestion(
        &self,
        id: Uuid,
        reviewer: &str,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<Approval> {
        // Suggestion lock, then plan lock inside commit_version. Every
        // approval takes them in this order.
        let mut tx = self.pool.begin().await?;

        let suggestion = suggestions::get_suggestion_for_update(&mut *tx, id)
            .await?
            .ok_or_else(|| StoreError::not_found("suggestion", id))?;
        if !suggestion.review.is_pending() {
            return Err(StoreError::AlreadyReviewed {
                id,
                status: suggestion.status(),
            });
        }

        let version = plans::commit_version(&mut *tx, &approval_version(&suggestion, reviewer)).await?;

        let suggestion = match suggestions::mark_approved(&mut *tx, id, reviewer, reviewed_at).await? {
            Some(s) => s,
            None => return Err(suggestions::review_guard_error(&mut *tx, id).await),
        };

        tx.commit().await?;
        debug!(suggestion_id = %id, version = version.version, "approval committed");

        Ok(Approval {
            suggestion,
            version,
        })
    }

    async fn reject_suggestion(
        &self,
        id: Uuid,
        reviewer: &str,
        reason: &str,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<PlanSuggestion> {
        let mut conn = self.pool.acquire().await?;
        suggestions::mark_rejected(&mut *conn, id, reviewer, reason, reviewed_at).await
    }
}
