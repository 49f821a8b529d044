//! In-memory [`PlanStore`] for tests and local experiments.
//!
//! Mirrors the Postgres semantics: the same validation, the same
//! version-number rules, the same one-pending-suggestion-per-session rule.
//! A single async mutex plays the part of the transaction, so an approval
//! appends its version and flips the suggestion under one critical section.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use careplan_db::models::{
    ChangeType, Patient, PlanSuggestion, PlanVersion, ReviewState, Session, TreatmentPlan,
};
use careplan_db::queries::plans::NewVersion;
use careplan_db::queries::suggestions::NewSuggestion;
use careplan_db::{PlanContent, StoreError, StoreResult};

use super::{Approval, PlanStore, SuggestionInsert, approval_version};

#[derive(Debug, Default)]
struct State {
    patients: HashMap<Uuid, Patient>,
    sessions: HashMap<Uuid, Session>,
    plans: HashMap<Uuid, TreatmentPlan>,
    /// Versions per plan, ascending.
    versions: HashMap<Uuid, Vec<PlanVersion>>,
    suggestions: HashMap<Uuid, PlanSuggestion>,
}

impl State {
    fn current(&self, treatment_plan_id: Uuid) -> Option<&PlanVersion> {
        self.versions.get(&treatment_plan_id).and_then(|v| v.last())
    }

    fn commit(&mut self, new: &NewVersion<'_>) -> StoreResult<PlanVersion> {
        new.content.validate()?;
        if !self.plans.contains_key(&new.treatment_plan_id) {
            return Err(StoreError::not_found("treatment plan", new.treatment_plan_id));
        }

        let current = self.current(new.treatment_plan_id).map(|v| v.version);
        let conflict = StoreError::VersionConflict {
            treatment_plan_id: new.treatment_plan_id,
            expected: new.expected_version,
            found: current,
        };
        if new.expected_version.is_some() && new.expected_version != current {
            return Err(conflict);
        }
        if (new.change_type == ChangeType::Initial) != current.is_none() {
            return Err(conflict);
        }

        let version = PlanVersion {
            id: Uuid::new_v4(),
            treatment_plan_id: new.treatment_plan_id,
            version: current.unwrap_or(0) + 1,
            content: new.content.clone(),
            change_type: new.change_type,
            change_reason: new.change_reason.map(str::to_owned),
            change_summary: new.change_summary.map(str::to_owned),
            suggestion_id: new.suggestion_id,
            created_by: new.created_by.map(str::to_owned),
            created_at: Utc::now(),
        };
        self.versions
            .entry(new.treatment_plan_id)
            .or_default()
            .push(version.clone());
        Ok(version)
    }

    fn review_guard_error(&self, id: Uuid) -> StoreError {
        match self.suggestions.get(&id) {
            None => StoreError::not_found("suggestion", id),
            Some(s) => StoreError::AlreadyReviewed {
                id,
                status: s.status(),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_patient(&self, display_name: &str) -> Patient {
        let patient = Patient {
            id: Uuid::new_v4(),
            display_name: display_name.to_owned(),
            created_at: Utc::now(),
        };
        self.state
            .lock()
            .await
            .patients
            .insert(patient.id, patient.clone());
        patient
    }

    pub async fn insert_session(&self, patient_id: Option<Uuid>, transcript: Option<&str>) -> Session {
        self.insert_session_at(patient_id, transcript, Utc::now()).await
    }

    pub async fn insert_session_at(
        &self,
        patient_id: Option<Uuid>,
        transcript: Option<&str>,
        recorded_at: DateTime<Utc>,
    ) -> Session {
        let session = Session {
            id: Uuid::new_v4(),
            patient_id,
            transcript: transcript.map(str::to_owned),
            recorded_at,
        };
        self.state
            .lock()
            .await
            .sessions
            .insert(session.id, session.clone());
        session
    }

    /// Number of suggestions recorded for a session, in any state.
    pub async fn suggestion_count(&self, session_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .suggestions
            .values()
            .filter(|s| s.session_id == session_id)
            .count()
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn get_session(&self, id: Uuid) -> StoreResult<Option<Session>> {
        Ok(self.state.lock().await.sessions.get(&id).cloned())
    }

    async fn latest_prior_session(
        &self,
        patient_id: Uuid,
        session_id: Uuid,
    ) -> StoreResult<Option<Session>> {
        let state = self.state.lock().await;
        let Some(anchor) = state.sessions.get(&session_id) else {
            return Ok(None);
        };
        Ok(state
            .sessions
            .values()
            .filter(|s| {
                s.patient_id == Some(patient_id)
                    && s.id != session_id
                    && s.usable_transcript().is_some()
                    && s.recorded_at <= anchor.recorded_at
            })
            .max_by_key(|s| s.recorded_at)
            .cloned())
    }

    async fn get_plan(&self, id: Uuid) -> StoreResult<Option<TreatmentPlan>> {
        Ok(self.state.lock().await.plans.get(&id).cloned())
    }

    async fn get_plan_for_patient(&self, patient_id: Uuid) -> StoreResult<Option<TreatmentPlan>> {
        Ok(self
            .state
            .lock()
            .await
            .plans
            .values()
            .find(|p| p.patient_id == patient_id)
            .cloned())
    }

    async fn current_version(&self, treatment_plan_id: Uuid) -> StoreResult<Option<PlanVersion>> {
        Ok(self.state.lock().await.current(treatment_plan_id).cloned())
    }

    async fn list_versions(&self, treatment_plan_id: Uuid) -> StoreResult<Vec<PlanVersion>> {
        Ok(self
            .state
            .lock()
            .await
            .versions
            .get(&treatment_plan_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_initial(
        &self,
        patient_id: Uuid,
        content: &PlanContent,
        created_by: Option<&str>,
    ) -> StoreResult<PlanVersion> {
        content.validate()?;
        let mut state = self.state.lock().await;
        if !state.patients.contains_key(&patient_id) {
            return Err(StoreError::not_found("patient", patient_id));
        }
        if state.plans.values().any(|p| p.patient_id == patient_id) {
            return Err(StoreError::AlreadyExists {
                entity: "treatment plan",
                id: patient_id,
            });
        }

        let plan = TreatmentPlan {
            id: Uuid::new_v4(),
            patient_id,
            created_at: Utc::now(),
        };
        state.plans.insert(plan.id, plan.clone());

        let result = state.commit(&NewVersion {
            treatment_plan_id: plan.id,
            content,
            change_type: ChangeType::Initial,
            change_reason: Some("Initial treatment plan"),
            change_summary: None,
            suggestion_id: None,
            created_by,
            expected_version: None,
        });
        if result.is_err() {
            state.plans.remove(&plan.id);
        }
        result
    }

    async fn commit_version(&self, new: &NewVersion<'_>) -> StoreResult<PlanVersion> {
        self.state.lock().await.commit(new)
    }

    async fn get_suggestion(&self, id: Uuid) -> StoreResult<Option<PlanSuggestion>> {
        Ok(self.state.lock().await.suggestions.get(&id).cloned())
    }

    async fn pending_suggestion_for_session(
        &self,
        session_id: Uuid,
    ) -> StoreResult<Option<PlanSuggestion>> {
        Ok(self
            .state
            .lock()
            .await
            .suggestions
            .values()
            .find(|s| s.session_id == session_id && s.review.is_pending())
            .cloned())
    }

    async fn insert_pending_suggestion(
        &self,
        new: &NewSuggestion<'_>,
    ) -> StoreResult<SuggestionInsert> {
        new.suggested_changes.validate()?;
        let mut state = self.state.lock().await;
        if !state.plans.contains_key(&new.treatment_plan_id) {
            return Err(StoreError::not_found("treatment plan", new.treatment_plan_id));
        }
        if !state.sessions.contains_key(&new.session_id) {
            return Err(StoreError::not_found("session", new.session_id));
        }
        if let Some(existing) = state
            .suggestions
            .values()
            .find(|s| s.session_id == new.session_id && s.review.is_pending())
        {
            return Ok(SuggestionInsert::Existing(existing.clone()));
        }

        let suggestion = PlanSuggestion {
            id: Uuid::new_v4(),
            treatment_plan_id: new.treatment_plan_id,
            session_id: new.session_id,
            session_summary: new.session_summary.to_owned(),
            progress_notes: new.progress_notes.map(str::to_owned),
            suggested_changes: new.suggested_changes.clone(),
            review: ReviewState::Pending,
            safety: new.safety.clone(),
            transcript_sha256: new.transcript_sha256.to_owned(),
            created_at: Utc::now(),
        };
        state.suggestions.insert(suggestion.id, suggestion.clone());
        Ok(SuggestionInsert::Created(suggestion))
    }

    async fn approve_suggestion(
        &self,
        id: Uuid,
        reviewer: &str,
        reviewed_at: DateTime<Utc>,
    ) -> StoreResult<Approval> {
        let mut state = self.state.lock().await;
        let suggestion = state
            .suggestions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("suggestion", id))?;
        let review = suggestion
            .review
            .approve(reviewer, reviewed_at)
            .map_err(|_| state.review_guard_error(id))?;

        let version = state.commit(&approval_version(&suggestion, reviewer))?;

        let approved = PlanSuggestion {
            review,
            ..suggestion
        };
        state.suggestions.insert(id, approved.clone());

        Ok(Approval {
            suggestion: approved,
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
        let mut state = self.state.lock().await;
        let suggestion = state
            .suggestions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("suggestion", id))?;
        let review = suggestion
            .review
            .reject(reviewer, reason, reviewed_at)
            .map_err(|_| state.review_guard_error(id))?;

        let rejected = PlanSuggestion {
            review,
            ..suggestion
        };
        state.suggestions.insert(id, rejected.clone());
        Ok(rejected)
    }
}
