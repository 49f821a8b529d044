//! Database query functions for the `sessions` table.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::Session;

/// Insert a session row. `patient_id` and `transcript` may both be absent.
pub async fn insert_session<'e>(
    executor: impl PgExecutor<'e>,
    patient_id: Option<Uuid>,
    transcript: Option<&str>,
) -> StoreResult<Session> {
    let session = sqlx::query_as::<_, Session>(
        "INSERT INTO sessions (patient_id, transcript) VALUES ($1, $2) RETURNING *",
    )
    .bind(patient_id)
    .bind(transcript)
    .fetch_one(executor)
    .await?;

    Ok(session)
}

/// Fetch a session by ID.
pub async fn get_session<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> StoreResult<Option<Session>> {
    let session = sqlx::query_as::<_, Session>("SELECT * FROM sessions WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await?;

    Ok(session)
}

/// The most recent transcribed session for `patient_id` recorded before
/// `session_id`, excluding `session_id` itself.
pub async fn latest_prior_session<'e>(
    executor: impl PgExecutor<'e>,
    patient_id: Uuid,
    session_id: Uuid,
) -> StoreResult<Option<Session>> {
    let session = sqlx::query_as::<_, Session>(
        "SELECT s.* FROM sessions s \
         WHERE s.patient_id = $1 \
           AND s.id <> $2 \
           AND s.transcript IS NOT NULL \
           AND btrim(s.transcript) <> '' \
           AND s.recorded_at <= (SELECT recorded_at FROM sessions WHERE id = $2) \
         ORDER BY s.recorded_at DESC \
         LIMIT 1",
    )
    .bind(patient_id)
    .bind(session_id)
    .fetch_optional(executor)
    .await?;

    Ok(session)
}
