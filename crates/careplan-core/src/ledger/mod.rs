//! The per-patient plan version ledger.
//!
//! Versions for a plan form the gapless sequence `1..=N`; version `N` is the
//! current content. Rows are only ever appended.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use careplan_db::PlanContent;
use careplan_db::models::{ChangeType, PlanVersion, TreatmentPlan};
use careplan_db::queries::plans::NewVersion;

use crate::error::{WorkflowError, WorkflowResult};
use crate::store::PlanStore;

/// A version commit request.
#[derive(Debug, Clone)]
pub struct Commit<'a> {
    pub content: &'a PlanContent,
    pub change_type: ChangeType,
    pub change_reason: Option<&'a str>,
    pub change_summary: Option<&'a str>,
    pub suggestion_id: Option<Uuid>,
    pub created_by: Option<&'a str>,
}

pub struct PlanLedger {
    store: Arc<dyn PlanStore>,
    max_retries: u32,
}

impl PlanLedger {
    pub fn new(store: Arc<dyn PlanStore>, max_retries: u32) -> Self {
        Self { store, max_retries }
    }

    /// The highest-numbered version, or `None` for an uninitialised plan.
    pub async fn current_version(&self, treatment_plan_id: Uuid) -> WorkflowResult<Option<PlanVersion>> {
        self.require_plan(treatment_plan_id).await?;
        Ok(self.store.current_version(treatment_plan_id).await?)
    }

    /// Every version of the plan, ascending.
    pub async fn history(&self, treatment_plan_id: Uuid) -> WorkflowResult<Vec<PlanVersion>> {
        self.require_plan(treatment_plan_id).await?;
        Ok(self.store.list_versions(treatment_plan_id).await?)
    }

    pub async fn plan_for_patient(&self, patient_id: Uuid) -> WorkflowResult<TreatmentPlan> {
        self.store
            .get_plan_for_patient(patient_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("treatment plan for patient", patient_id))
    }

    /// Create the patient's plan with `version = 1, changeType = INITIAL`.
    pub async fn create_initial(
        &self,
        patient_id: Uuid,
        content: &PlanContent,
        created_by: Option<&str>,
    ) -> WorkflowResult<PlanVersion> {
        content
            .validate()
            .map_err(|e| WorkflowError::validation(e.to_string()))?;

        let version = self
            .store
            .create_initial(patient_id, content, created_by)
            .await?;
        info!(
            patient_id = %patient_id,
            treatment_plan_id = %version.treatment_plan_id,
            "treatment plan created"
        );
        Ok(version)
    }

    /// Append `current + 1`, retrying when a concurrent writer took the
    /// number first.
    pub async fn commit(&self, treatment_plan_id: Uuid, commit: &Commit<'_>) -> WorkflowResult<PlanVersion> {
        if commit.change_type == ChangeType::Initial {
            return Err(WorkflowError::validation(
                "INITIAL versions are created with create_initial",
            ));
        }
        commit
            .content
            .validate()
            .map_err(|e| WorkflowError::validation(e.to_string()))?;

        let new = NewVersion {
            treatment_plan_id,
            content: commit.content,
            change_type: commit.change_type,
            change_reason: commit.change_reason,
            change_summary: commit.change_summary,
            suggestion_id: commit.suggestion_id,
            created_by: commit.created_by,
            expected_version: None,
        };

        let mut attempt = 0;
        loop {
            match self.store.commit_version(&new).await {
                Ok(version) => {
                    info!(
                        treatment_plan_id = %treatment_plan_id,
                        version = version.version,
                        change_type = %version.change_type,
                        "plan version committed"
                    );
                    return Ok(version);
                }
                Err(e) => {
                    let err = WorkflowError::from(e);
                    if matches!(err, WorkflowError::VersionConflict { .. }) && attempt < self.max_retries {
                        attempt += 1;
                        warn!(treatment_plan_id = %treatment_plan_id, attempt, "version conflict; retrying commit");
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Append a `MANUAL_EDIT` version based on `base_version`.
    ///
    /// Fails with `VersionConflict` if another version landed since the
    /// editor loaded `base_version`; the editor must reload and reapply.
    pub async fn commit_manual_edit(
        &self,
        treatment_plan_id: Uuid,
        content: &PlanContent,
        base_version: i32,
        editor: &str,
        reason: Option<&str>,
    ) -> WorkflowResult<PlanVersion> {
        content
            .validate()
            .map_err(|e| WorkflowError::validation(e.to_string()))?;
        if editor.trim().is_empty() {
            return Err(WorkflowError::validation("editor must not be blank"));
        }

        let version = self
            .store
            .commit_version(&NewVersion {
                treatment_plan_id,
                content,
                change_type: ChangeType::ManualEdit,
                change_reason: reason,
                change_summary: None,
                suggestion_id: None,
                created_by: Some(editor),
                expected_version: Some(base_version),
            })
            .await?;
        info!(
            treatment_plan_id = %treatment_plan_id,
            version = version.version,
            editor,
            "manual plan edit committed"
        );
        Ok(version)
    }

    async fn require_plan(&self, treatment_plan_id: Uuid) -> WorkflowResult<TreatmentPlan> {
        self.store
            .get_plan(treatment_plan_id)
            .await?
            .ok_or_else(|| WorkflowError::not_found("treatment plan", treatment_plan_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::store::MemoryStore;

    use super::*;

    async fn ledger_with_plan() -> (PlanLedger, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let patient = store.insert_patient("Alex").await;
        let ledger = PlanLedger::new(store, 3);
        let v1 = ledger
            .create_initial(patient.id, &PlanContent::default(), Some("dr-lee"))
            .await
            .unwrap();
        (ledger, v1.treatment_plan_id)
    }

    fn homework(text: &str) -> PlanContent {
        PlanContent {
            homework: Some(text.to_string()),
            ..PlanContent::default()
        }
    }

    #[tokio::test]
    async fn commits_are_sequential() {
        let (ledger, plan_id) = ledger_with_plan().await;
        for i in 0..3 {
            let content = homework(&format!("step {i}"));
            ledger
                .commit(
                    plan_id,
                    &Commit {
                        content: &content,
                        change_type: ChangeType::SessionUpdate,
                        change_reason: None,
                        change_summary: None,
                        suggestion_id: None,
                        created_by: None,
                    },
                )
                .await
                .unwrap();
        }
        let versions: Vec<i32> = ledger
            .history(plan_id)
            .await
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 3, 4]);
        let current = ledger.current_version(plan_id).await.unwrap().unwrap();
        assert_eq!(current.content.homework.as_deref(), Some("step 2"));
    }

    #[tokio::test]
    async fn initial_change_type_is_refused_by_commit() {
        let (ledger, plan_id) = ledger_with_plan().await;
        let content = PlanContent::default();
        let err = ledger
            .commit(
                plan_id,
                &Commit {
                    content: &content,
                    change_type: ChangeType::Initial,
                    change_reason: None,
                    change_summary: None,
                    suggestion_id: None,
                    created_by: None,
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[tokio::test]
    async fn stale_manual_edit_conflicts() {
        let (ledger, plan_id) = ledger_with_plan().await;
        let v2 = ledger
            .commit_manual_edit(plan_id, &homework("journal"), 1, "dr-lee", Some("update"))
            .await
            .unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(v2.change_type, ChangeType::ManualEdit);

        let err = ledger
            .commit_manual_edit(plan_id, &homework("walk"), 1, "dr-kim", None)
            .await
            .unwrap_err();
        match err {
            WorkflowError::VersionConflict {
                expected, found, ..
            } => {
                assert_eq!(expected, Some(1));
                assert_eq!(found, Some(2));
            }
            other => panic!("expected VersionConflict, got {other:?}"),
        }
        assert_eq!(ledger.history(plan_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_content_is_rejected_before_storage() {
        let (ledger, plan_id) = ledger_with_plan().await;
        let content = PlanContent {
            risk_score: Some(42),
            ..PlanContent::default()
        };
        let err = ledger
            .commit_manual_edit(plan_id, &content, 1, "dr-lee", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert_eq!(ledger.history(plan_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_plan_is_not_found() {
        let (ledger, _) = ledger_with_plan().await;
        let err = ledger.history(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
