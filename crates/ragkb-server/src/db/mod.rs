//! Postgres pool setup and error classification

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

use crate::config::DatabaseConfig;
use crate::queue::QueueConfig;

/// Database operation errors with contextual information
#[derive(Error, Debug)]
pub enum DbError {
    /// SQL query or connection error
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Stored value does not map onto a domain type
    #[error("Invalid stored value: {0}")]
    Corrupt(String),

    /// Requested record does not exist
    #[error("{0}")]
    NotFound(String),
}

impl DbError {
    pub fn not_found(resource_type: &str, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}' not found", resource_type, identifier))
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DbError::Sqlx(e) => is_transient(e),
            DbError::Corrupt(_) | DbError::NotFound(_) => false,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

pub async fn create_pool(config: &DatabaseConfig) -> DbResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .connect(&config.url)
        .await?;

    tracing::info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Database connection pool created"
    );

    Ok(pool)
}

/// Pool for the job queue: the main pool unless `QUEUE_DATABASE_URL` points
/// elsewhere, in which case a second pool with the same limits is opened and
/// migrated.
pub async fn create_queue_pool(
    config: &DatabaseConfig,
    queue: &QueueConfig,
    main: &PgPool,
) -> anyhow::Result<PgPool> {
    let Some(url) = queue.database_url.as_ref().filter(|url| **url != config.url) else {
        return Ok(main.clone());
    };

    let pool = create_pool(&DatabaseConfig {
        url: url.clone(),
        ..config.clone()
    })
    .await?;
    run_migrations(&pool).await?;
    tracing::info!("Job queue uses a separate database");

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations")
        .run(pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations completed");
    Ok(())
}

pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(DbError::from)
}

/// Connection-level failures, serialization conflicts and admin shutdowns are
/// transient; constraint violations and SQL errors are not.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db.code().is_some_and(|code| is_transient_sqlstate(&code)),
        _ => false,
    }
}

fn is_transient_sqlstate(code: &str) -> bool {
    // 08xxx connection exception, 40001 serialization failure, 40P01 deadlock,
    // 57P01 admin shutdown, 53300 too many connections
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "57P01" | "53300")
}
