//! classify -> generate -> persist as pending -> review.
//!
//! Nothing is written until classification and generation have both
//! finished, and the suggestion is written in one statement. A blocked,
//! failed, or cancelled analysis therefore leaves no rows behind.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use careplan_db::models::{PlanSuggestion, SafetyCheckResult};
use careplan_db::queries::suggestions::NewSuggestion;

use crate::config::WorkflowConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::generate::{PatientHistory, SuggestionGenerator};
use crate::safety::SafetyClassifier;
use crate::store::{Approval, PlanStore, SuggestionInsert};
use crate::transcript;

/// Result of [`SuggestionWorkflow::create_suggestion`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedSuggestion {
    pub suggestion_id: Uuid,
    pub suggestion: PlanSuggestion,
    pub safety_result: SafetyCheckResult,
    /// `false` when an existing pending suggestion was returned.
    pub created: bool,
}

impl CreatedSuggestion {
    fn from_suggestion(suggestion: PlanSuggestion, created: bool) -> Self {
        Self {
            suggestion_id: suggestion.id,
            safety_result: suggestion.safety.clone(),
            suggestion,
            created,
        }
    }
}

pub struct SuggestionWorkflow {
    store: Arc<dyn PlanStore>,
    classifier: Arc<dyn SafetyClassifier>,
    generator: Arc<dyn SuggestionGenerator>,
    config: WorkflowConfig,
}

impl SuggestionWorkflow {
    pub fn new(
        store: Arc<dyn PlanStore>,
        classifier: Arc<dyn SafetyClassifier>,
        generator: Arc<dyn SuggestionGenerator>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            generator,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn PlanStore> {
        &self.store
    }

    /// Analyse a session and persist a pending suggestion, or return the
    /// session's existing pending suggestion.
    pub async fn create_suggestion(
        &self,
        session_id: Uuid,
        requested_by: &str,
    ) -> WorkflowResult<CreatedSuggestion> {
        self.create_suggestion_cancellable(session_id, requested_by, CancellationToken::new())
            .await
    }

    /// Like [`create_suggestion`](Self::create_suggestion), abandoning the
    /// classifier or generator call when `cancel` fires.
    pub async fn create_suggestion_cancellable(
        &self,
        session_id: Uuid,
        requested_by: &str,
        cancel: CancellationToken,
    ) -> WorkflowResult<CreatedSuggestion> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("session", session_id))?;

        if let Some(existing) = self.store.pending_suggestion_for_session(session_id).await? {
            info!(
                session_id = %session_id,
                suggestion_id = %existing.id,
                "returning existing pending suggestion"
            );
            return Ok(CreatedSuggestion::from_suggestion(existing, false));
        }

        let patient_id = session.patient_id.ok_or_else(|| {
            WorkflowError::validation(format!("session {session_id} is not linked to a patient"))
        })?;
        let transcript = session.usable_transcript().ok_or_else(|| {
            WorkflowError::validation(format!("session {session_id} has no transcript"))
        })?;
        let plan = self
            .store
            .get_plan_for_patient(patient_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("treatment plan for patient", patient_id))?;
        let digest = transcript::digest(transcript);

        info!(
            session_id = %session_id,
            treatment_plan_id = %plan.id,
            requested_by,
            transcript_sha256 = %digest,
            "analysing session"
        );

        let safety = until_cancelled(&cancel, self.classifier.classify(transcript)).await?;
        if !safety.safe_to_generate {
            warn!(
                session_id = %session_id,
                risk_level = %safety.risk_level,
                flags = ?safety.risk_flags,
                "suggestion generation blocked by safety check"
            );
            return Err(WorkflowError::SafetyBlocked(safety));
        }

        let current = self.store.current_version(plan.id).await?;
        let prior = self
            .store
            .latest_prior_session(patient_id, session_id)
            .await?;
        let history = PatientHistory {
            current_version: current.as_ref().map(|v| v.version),
            prior_transcript: prior.and_then(|s| s.transcript),
        };
        let has_history = history.current_version.is_some() || history.prior_transcript.is_some();

        let generated = until_cancelled(
            &cancel,
            self.generator.generate(
                transcript,
                current.as_ref().map(|v| &v.content),
                has_history.then_some(&history),
            ),
        )
        .await?
        .map_err(|e| {
            warn!(session_id = %session_id, error = %e, "suggestion generation failed");
            WorkflowError::UpstreamGeneration(e.to_string())
        })?;

        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        let inserted = self
            .store
            .insert_pending_suggestion(&NewSuggestion {
                treatment_plan_id: plan.id,
                session_id,
                session_summary: &generated.session_summary,
                progress_notes: generated.progress_notes.as_deref(),
                suggested_changes: &generated.suggested_changes,
                safety: &safety,
                transcript_sha256: &digest,
            })
            .await?;

        let result = match inserted {
            SuggestionInsert::Created(s) => {
                info!(
                    session_id = %session_id,
                    suggestion_id = %s.id,
                    risk_level = %safety.risk_level,
                    "pending suggestion created"
                );
                CreatedSuggestion::from_suggestion(s, true)
            }
            SuggestionInsert::Existing(s) => {
                info!(
                    session_id = %session_id,
                    suggestion_id = %s.id,
                    "concurrent analysis already created a pending suggestion"
                );
                CreatedSuggestion::from_suggestion(s, false)
            }
        };
        Ok(result)
    }

    /// The session's pending suggestion, if any.
    pub async fn get_pending_suggestion(&self, session_id: Uuid) -> WorkflowResult<Option<PlanSuggestion>> {
        Ok(self.store.pending_suggestion_for_session(session_id).await?)
    }

    pub async fn get_suggestion(&self, suggestion_id: Uuid) -> WorkflowResult<PlanSuggestion> {
        self.store
            .get_suggestion(suggestion_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("suggestion", suggestion_id))
    }

    /// Approve a pending suggestion, committing its content as the next
    /// plan version in the same transaction.
    pub async fn approve(&self, suggestion_id: Uuid, reviewer: &str) -> WorkflowResult<Approval> {
        require_reviewer(reviewer)?;

        let mut attempt = 0;
        loop {
            match self
                .store
                .approve_suggestion(suggestion_id, reviewer, Utc::now())
                .await
                .map_err(WorkflowError::from)
            {
                Ok(approval) => {
                    info!(
                        suggestion_id = %suggestion_id,
                        treatment_plan_id = %approval.version.treatment_plan_id,
                        version = approval.version.version,
                        reviewer,
                        "suggestion approved"
                    );
                    return Ok(approval);
                }
                Err(WorkflowError::VersionConflict { .. }) if attempt < self.config.max_commit_retries => {
                    attempt += 1;
                    warn!(suggestion_id = %suggestion_id, attempt, "version conflict on approval; retrying");
                }
                Err(e) => {
                    warn!(suggestion_id = %suggestion_id, reviewer, error = %e, "approval failed");
                    return Err(e);
                }
            }
        }
    }

    /// Reject a pending suggestion. `reason` is recorded as the therapist
    /// notes and must not be blank.
    pub async fn reject(
        &self,
        suggestion_id: Uuid,
        reviewer: &str,
        reason: &str,
    ) -> WorkflowResult<PlanSuggestion> {
        require_reviewer(reviewer)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WorkflowError::validation("a rejection reason is required"));
        }

        let rejected = self
            .store
            .reject_suggestion(suggestion_id, reviewer, reason, Utc::now())
            .await
            .map_err(|e| {
                let e = WorkflowError::from(e);
                warn!(suggestion_id = %suggestion_id, reviewer, error = %e, "rejection failed");
                e
            })?;
        info!(suggestion_id = %suggestion_id, reviewer, "suggestion rejected");
        Ok(rejected)
    }
}

fn require_reviewer(reviewer: &str) -> WorkflowResult<()> {
    if reviewer.trim().is_empty() {
        return Err(WorkflowError::validation("reviewer identity is required"));
    }
    Ok(())
}

async fn until_cancelled<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> WorkflowResult<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
        out = fut => Ok(out),
    }
}
