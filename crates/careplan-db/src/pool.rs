use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Migrations embedded at compile time from `crates/careplan-db/migrations/`.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();

/// Tables created by the migrations, in dependency order.
pub const LEDGER_TABLES: [&str; 5] = [
    "patients",
    "sessions",
    "treatment_plans",
    "plan_suggestions",
    "plan_versions",
];

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

async fn connect(url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect(url)
        .await
        .with_context(|| format!("failed to connect to database at {url}"))
}

pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    connect(&config.database_url, config.max_connections).await
}

pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("failed to run database migrations")?;
    info!("migrations applied");
    Ok(())
}

/// `CREATE DATABASE` takes no bind parameters, so the name is spliced in
/// and must be a plain identifier.
fn is_plain_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Create the configured database through the `postgres` maintenance
/// database if it is missing. Returns whether it was created.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<bool> {
    let db_name = config
        .database_name()
        .context("could not determine database name from URL")?;
    if !is_plain_identifier(db_name) {
        anyhow::bail!("database name {db_name:?} must be letters, digits and underscores");
    }

    let maint_pool = connect(&config.maintenance_url(), 1).await?;
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(db_name)
            .fetch_one(&maint_pool)
            .await
            .context("failed to query pg_database")?;

    if !exists {
        maint_pool
            .execute(format!("CREATE DATABASE {db_name}").as_str())
            .await
            .with_context(|| format!("failed to create database {db_name}"))?;
        info!(db = db_name, "database created");
    }
    maint_pool.close().await;
    Ok(!exists)
}

/// Row count of every ledger table, for the `db-init` report.
pub async fn table_counts(pool: &PgPool) -> Result<Vec<(&'static str, i64)>> {
    let mut counts = Vec::with_capacity(LEDGER_TABLES.len());
    for table in LEDGER_TABLES {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .with_context(|| format!("failed to count rows in {table}"))?;
        counts.push((table, count));
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_plain_identifiers_are_created() {
        assert!(is_plain_identifier("careplan_dev"));
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("care-plan"));
        assert!(!is_plain_identifier("x; DROP TABLE patients"));
    }
}
