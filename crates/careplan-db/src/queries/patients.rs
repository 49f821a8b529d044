//! Database query functions for the `patients` table.
//!
//! Patients are owned by an external collaborator; these helpers exist so
//! the CLI and tests can seed rows the plan workflow depends on.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::Patient;

/// Insert a new patient row.
pub async fn insert_patient<'e>(
    executor: impl PgExecutor<'e>,
    display_name: &str,
) -> StoreResult<Patient> {
    let patient = sqlx::query_as::<_, Patient>(
        "INSERT INTO patients (display_name) VALUES ($1) RETURNING *",
    )
    .bind(display_name)
    .fetch_one(executor)
    .await?;

    Ok(patient)
}

/// Fetch a patient by ID.
pub async fn get_patient<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> StoreResult<Option<Patient>> {
    let patient = sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(patient)
}
