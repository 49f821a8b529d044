//! Database query functions for the `treatment_plans` and `plan_versions`
//! tables.
//!
//! Writers take a `&mut PgConnection` so callers run them inside their own
//! transaction; readers accept any executor.

use sqlx::types::Json;
use sqlx::{PgConnection, PgExecutor};
use uuid::Uuid;

use crate::content::PlanContent;
use crate::error::{
    PLAN_PATIENT_UNIQUE_CONSTRAINT, StoreError, StoreResult, VERSION_UNIQUE_CONSTRAINT,
    violated_unique_constraint,
};
use crate::models::{ChangeType, PlanVersion, TreatmentPlan};
use crate::queries::patients;

/// Parameters for appending a plan version.
#[derive(Debug, Clone)]
pub struct NewVersion<'a> {
    pub treatment_plan_id: Uuid,
    pub content: &'a PlanContent,
    pub change_type: ChangeType,
    pub change_reason: Option<&'a str>,
    pub change_summary: Option<&'a str>,
    pub suggestion_id: Option<Uuid>,
    pub created_by: Option<&'a str>,
    /// When set, the commit fails with [`StoreError::VersionConflict`]
    /// unless this is still the plan's current version.
    pub expected_version: Option<i32>,
}

/// Fetch a treatment plan by ID.
pub async fn get_plan<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> StoreResult<Option<TreatmentPlan>> {
    let plan = sqlx::query_as::<_, TreatmentPlan>("SELECT * FROM treatment_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(plan)
}

/// Fetch the treatment plan owned by a patient.
pub async fn get_plan_for_patient<'e>(
    executor: impl PgExecutor<'e>,
    patient_id: Uuid,
) -> StoreResult<Option<TreatmentPlan>> {
    let plan = sqlx::query_as::<_, TreatmentPlan>(
        "SELECT * FROM treatment_plans WHERE patient_id = $1",
    )
    .bind(patient_id)
    .fetch_optional(executor)
    .await?;

    Ok(plan)
}

/// The version with the highest number for a plan, if any.
pub async fn current_version<'e>(
    executor: impl PgExecutor<'e>,
    treatment_plan_id: Uuid,
) -> StoreResult<Option<PlanVersion>> {
    let version = sqlx::query_as::<_, PlanVersion>(
        "SELECT * FROM plan_versions \
         WHERE treatment_plan_id = $1 \
         ORDER BY version DESC \
         LIMIT 1",
    )
    .bind(treatment_plan_id)
    .fetch_optional(executor)
    .await?;

    Ok(version)
}

/// All versions of a plan in ascending order.
pub async fn list_versions<'e>(
    executor: impl PgExecutor<'e>,
    treatment_plan_id: Uuid,
) -> StoreResult<Vec<PlanVersion>> {
    let versions = sqlx::query_as::<_, PlanVersion>(
        "SELECT * FROM plan_versions WHERE treatment_plan_id = $1 ORDER BY version ASC",
    )
    .bind(treatment_plan_id)
    .fetch_all(executor)
    .await?;

    Ok(versions)
}

/// Create a patient's treatment plan together with version 1.
///
/// Must run inside a transaction: the plan row and its first version are
/// only meaningful together.
pub async fn create_initial(
    conn: &mut PgConnection,
    patient_id: Uuid,
    content: &PlanContent,
    created_by: Option<&str>,
) -> StoreResult<PlanVersion> {
    if patients::get_patient(&mut *conn, patient_id).await?.is_none() {
        return Err(StoreError::not_found("patient", patient_id));
    }

    let plan = sqlx::query_as::<_, TreatmentPlan>(
        "INSERT INTO treatment_plans (patient_id) VALUES ($1) RETURNING *",
    )
    .bind(patient_id)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match violated_unique_constraint(&e).as_deref() {
        Some(PLAN_PATIENT_UNIQUE_CONSTRAINT) => StoreError::AlreadyExists {
            entity: "treatment plan",
            id: patient_id,
        },
        _ => StoreError::Database(e),
    })?;

    commit_version(
        conn,
        &NewVersion {
            treatment_plan_id: plan.id,
            content,
            change_type: ChangeType::Initial,
            change_reason: Some("Initial treatment plan"),
            change_summary: None,
            suggestion_id: None,
            created_by,
            expected_version: None,
        },
    )
    .await
}

/// Append `max(version) + 1` for a plan.
///
/// Takes a row lock on the parent `treatment_plans` row first, so two
/// transactions committing to the same plan serialize on the lock and the
/// second one reads the first one's version. The unique constraint on
/// `(treatment_plan_id, version)` backs this up: a collision surfaces as
/// [`StoreError::VersionConflict`], never as an overwrite.
pub async fn commit_version(
    conn: &mut PgConnection,
    new: &NewVersion<'_>,
) -> StoreResult<PlanVersion> {
    new.content.validate()?;

    let locked: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM treatment_plans WHERE id = $1 FOR UPDATE")
            .bind(new.treatment_plan_id)
            .fetch_optional(&mut *conn)
            .await?;
    if locked.is_none() {
        return Err(StoreError::not_found("treatment plan", new.treatment_plan_id));
    }

    let current: Option<i32> =
        sqlx::query_scalar("SELECT MAX(version) FROM plan_versions WHERE treatment_plan_id = $1")
            .bind(new.treatment_plan_id)
            .fetch_one(&mut *conn)
            .await?;

    let conflict = || StoreError::VersionConflict {
        treatment_plan_id: new.treatment_plan_id,
        expected: new.expected_version,
        found: current,
    };

    if new.expected_version.is_some() && new.expected_version != current {
        return Err(conflict());
    }
    // INITIAL is reserved for version 1.
    if (new.change_type == ChangeType::Initial) != current.is_none() {
        return Err(conflict());
    }

    let next = current.unwrap_or(0) + 1;

    let version = sqlx::query_as::<_, PlanVersion>(
        "INSERT INTO plan_versions \
         (treatment_plan_id, version, content, change_type, change_reason, change_summary, suggestion_id, created_by) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(new.treatment_plan_id)
    .bind(next)
    .bind(Json(new.content))
    .bind(new.change_type)
    .bind(new.change_reason)
    .bind(new.change_summary)
    .bind(new.suggestion_id)
    .bind(new.created_by)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| match violated_unique_constraint(&e).as_deref() {
        Some(VERSION_UNIQUE_CONSTRAINT) => conflict(),
        _ => StoreError::Database(e),
    })?;

    tracing::debug!(
        treatment_plan_id = %version.treatment_plan_id,
        version = version.version,
        change_type = %version.change_type,
        "plan version committed"
    );

    Ok(version)
}
