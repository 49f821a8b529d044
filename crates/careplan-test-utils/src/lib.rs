//! PostgreSQL fixtures for careplan integration tests.
//!
//! One server is shared per test binary and every test gets a fresh
//! database inside it, migrated to the current schema.
//!
//! The server comes from `CAREPLAN_TEST_PG_URL` when set (for CI jobs that
//! start Postgres themselves), otherwise from a testcontainers instance
//! started on first use.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;
use uuid::Uuid;

use careplan_db::models::{Patient, Session};
use careplan_db::pool;
use careplan_db::queries::{patients, sessions};

struct Server {
    base_url: String,
    _container: Option<ContainerAsync<Postgres>>,
}

static SERVER: OnceCell<Server> = OnceCell::const_new();

async fn start_server() -> Server {
    if let Ok(base_url) = std::env::var("CAREPLAN_TEST_PG_URL") {
        return Server {
            base_url,
            _container: None,
        };
    }

    let container = Postgres::default()
        .with_tag("17")
        .start()
        .await
        .expect("failed to start PostgreSQL container");
    let host = container.get_host().await.expect("container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("container port");

    Server {
        base_url: format!("postgresql://postgres:postgres@{host}:{port}"),
        _container: Some(container),
    }
}

async fn admin_pool() -> PgPool {
    let server = SERVER.get_or_init(start_server).await;
    PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&format!("{}/postgres", server.base_url))
        .await
        .expect("failed to connect to maintenance database")
}

/// A migrated, uniquely-named database. Call [`TestDb::drop_db`] when done.
pub struct TestDb {
    pub pool: PgPool,
    pub name: String,
}

impl TestDb {
    /// Create and migrate a fresh database.
    pub async fn create() -> Self {
        let name = format!("careplan_test_{}", Uuid::new_v4().simple());
        let admin = admin_pool().await;
        admin
            .execute(format!("CREATE DATABASE {name}").as_str())
            .await
            .unwrap_or_else(|e| panic!("failed to create database {name}: {e}"));
        admin.close().await;

        let base_url = &SERVER.get().expect("server initialised").base_url;
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!("{base_url}/{name}"))
            .await
            .unwrap_or_else(|e| panic!("failed to connect to database {name}: {e}"));

        pool::run_migrations(&pool)
            .await
            .expect("migrations should apply");

        Self { pool, name }
    }

    /// Close the pool and drop the database.
    pub async fn drop_db(self) {
        self.pool.close().await;
        let admin = admin_pool().await;
        let _ = admin
            .execute(
                format!(
                    "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
                     WHERE datname = '{}' AND pid <> pg_backend_pid()",
                    self.name
                )
                .as_str(),
            )
            .await;
        let _ = admin
            .execute(format!("DROP DATABASE IF EXISTS {}", self.name).as_str())
            .await;
        admin.close().await;
    }

    /// Insert a patient with one transcribed session.
    pub async fn seed_patient_session(&self, transcript: &str) -> (Patient, Session) {
        let patient = patients::insert_patient(&self.pool, "Test Patient")
            .await
            .expect("insert patient");
        let session = sessions::insert_session(&self.pool, Some(patient.id), Some(transcript))
            .await
            .expect("insert session");
        (patient, session)
    }
}
