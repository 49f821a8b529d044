//! Integration tests for the plan ledger and suggestion queries.
//!
//! These tests need PostgreSQL: either `CAREPLAN_TEST_PG_URL` pointing at a
//! server, or Docker for a testcontainers instance.
//!
//! Each test gets its own freshly migrated database.

use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use careplan_db::models::{ChangeType, SafetyCheckResult, SuggestionStatus};
use careplan_db::queries::plans::{self, NewVersion};
use careplan_db::queries::suggestions::{self, NewSuggestion};
use careplan_db::queries::{patients, sessions};
use careplan_db::{PlanContent, StoreError};

use careplan_test_utils::TestDb;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn homework(text: &str) -> PlanContent {
    PlanContent {
        homework: Some(text.to_string()),
        ..PlanContent::default()
    }
}

async fn create_plan(pool: &PgPool, patient_id: Uuid) -> Uuid {
    let mut tx = pool.begin().await.unwrap();
    let v1 = plans::create_initial(&mut *tx, patient_id, &PlanContent::default(), Some("dr-lee"))
        .await
        .expect("create initial plan");
    tx.commit().await.unwrap();
    v1.treatment_plan_id
}

async fn commit(pool: &PgPool, plan_id: Uuid, content: &PlanContent, expected: Option<i32>) -> Result<i32, StoreError> {
    let mut tx = pool.begin().await?;
    let version = plans::commit_version(
        &mut *tx,
        &NewVersion {
            treatment_plan_id: plan_id,
            content,
            change_type: ChangeType::ManualEdit,
            change_reason: None,
            change_summary: None,
            suggestion_id: None,
            created_by: Some("dr-lee"),
            expected_version: expected,
        },
    )
    .await?;
    tx.commit().await?;
    Ok(version.version)
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn initial_plan_is_unique_per_patient() {
    let db = TestDb::create().await;
    let (patient, _) = db.seed_patient_session("hello").await;

    let plan_id = create_plan(&db.pool, patient.id).await;
    let current = plans::current_version(&db.pool, plan_id).await.unwrap().unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.change_type, ChangeType::Initial);

    let mut tx = db.pool.begin().await.unwrap();
    let err = plans::create_initial(&mut *tx, patient.id, &PlanContent::default(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }), "got {err:?}");
    drop(tx);

    db.drop_db().await;
}

#[tokio::test]
async fn concurrent_commits_serialize_without_gaps() {
    let db = TestDb::create().await;
    let (patient, _) = db.seed_patient_session("hello").await;
    let plan_id = create_plan(&db.pool, patient.id).await;

    let content = homework("Practice breathing");
    let results = futures::future::join_all(
        (0..8).map(|_| commit(&db.pool, plan_id, &content, None)),
    )
    .await;
    let mut numbers: Vec<i32> = results.into_iter().map(|r| r.expect("commit")).collect();
    numbers.sort();
    assert_eq!(numbers, (2..=9).collect::<Vec<_>>());

    let versions = plans::list_versions(&db.pool, plan_id).await.unwrap();
    let seq: Vec<i32> = versions.iter().map(|v| v.version).collect();
    assert_eq!(seq, (1..=9).collect::<Vec<_>>());

    db.drop_db().await;
}

#[tokio::test]
async fn stale_expected_version_conflicts() {
    let db = TestDb::create().await;
    let (patient, _) = db.seed_patient_session("hello").await;
    let plan_id = create_plan(&db.pool, patient.id).await;

    assert_eq!(commit(&db.pool, plan_id, &homework("a"), Some(1)).await.unwrap(), 2);
    let err = commit(&db.pool, plan_id, &homework("b"), Some(1)).await.unwrap_err();
    assert!(
        matches!(
            err,
            StoreError::VersionConflict {
                expected: Some(1),
                found: Some(2),
                ..
            }
        ),
        "got {err:?}"
    );

    db.drop_db().await;
}

#[tokio::test]
async fn versions_are_immutable() {
    let db = TestDb::create().await;
    let (patient, _) = db.seed_patient_session("hello").await;
    let plan_id = create_plan(&db.pool, patient.id).await;

    let update = sqlx::query("UPDATE plan_versions SET change_reason = 'edited' WHERE treatment_plan_id = $1")
        .bind(plan_id)
        .execute(&db.pool)
        .await;
    assert!(update.is_err());
    let delete = sqlx::query("DELETE FROM plan_versions WHERE treatment_plan_id = $1")
        .bind(plan_id)
        .execute(&db.pool)
        .await;
    assert!(delete.is_err());

    db.drop_db().await;
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_pending_suggestion_per_session() {
    let db = TestDb::create().await;
    let (patient, session) = db.seed_patient_session("hello").await;
    let plan_id = create_plan(&db.pool, patient.id).await;
    let content = homework("Practice breathing");
    let safety = SafetyCheckResult::low();
    let new = NewSuggestion {
        treatment_plan_id: plan_id,
        session_id: session.id,
        session_summary: "summary",
        progress_notes: None,
        suggested_changes: &content,
        safety: &safety,
        transcript_sha256: "ab",
    };

    let first = suggestions::insert_pending(&db.pool, &new).await.unwrap();
    assert!(first.is_some());
    let second = suggestions::insert_pending(&db.pool, &new).await.unwrap();
    assert!(second.is_none());

    let first = first.unwrap();
    let mut conn = db.pool.acquire().await.unwrap();
    let rejected = suggestions::mark_rejected(&mut *conn, first.id, "dr-lee", "Not clinically relevant", Utc::now())
        .await
        .unwrap();
    assert_eq!(rejected.status(), SuggestionStatus::Rejected);

    let err = suggestions::mark_rejected(&mut *conn, first.id, "dr-lee", "again", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::AlreadyReviewed { .. }), "got {err:?}");
    drop(conn);

    // Reviewed suggestions no longer block a new analysis.
    assert!(suggestions::insert_pending(&db.pool, &new).await.unwrap().is_some());

    db.drop_db().await;
}

#[tokio::test]
async fn prior_session_lookup_skips_untranscribed() {
    let db = TestDb::create().await;
    let (patient, first) = db.seed_patient_session("first session").await;
    sessions::insert_session(&db.pool, Some(patient.id), None).await.unwrap();
    let latest = sessions::insert_session(&db.pool, Some(patient.id), Some("latest"))
        .await
        .unwrap();

    let prior = sessions::latest_prior_session(&db.pool, patient.id, latest.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(prior.id, first.id);

    let other = patients::insert_patient(&db.pool, "Other").await.unwrap();
    assert!(
        sessions::latest_prior_session(&db.pool, other.id, latest.id)
            .await
            .unwrap()
            .is_none()
    );

    db.drop_db().await;
}
