//! Integration tests for the embedded migrations.
//!
//! These tests need PostgreSQL: either `CAREPLAN_TEST_PG_URL` pointing at a
//! server, or Docker for a testcontainers instance.

use careplan_db::pool;

use careplan_test_utils::TestDb;

#[tokio::test]
async fn fresh_database_has_every_ledger_table_empty() {
    let db = TestDb::create().await;

    let counts = pool::table_counts(&db.pool).await.unwrap();
    let names: Vec<&str> = counts.iter().map(|(name, _)| *name).collect();
    assert_eq!(names, pool::LEDGER_TABLES);
    assert!(counts.iter().all(|(_, n)| *n == 0), "got {counts:?}");

    db.seed_patient_session("hello").await;
    let counts = pool::table_counts(&db.pool).await.unwrap();
    assert!(counts.contains(&("patients", 1)));
    assert!(counts.contains(&("sessions", 1)));

    db.drop_db().await;
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let db = TestDb::create().await;
    pool::run_migrations(&db.pool).await.unwrap();
    db.drop_db().await;
}
