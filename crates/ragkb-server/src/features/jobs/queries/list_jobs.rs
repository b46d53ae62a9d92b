//! List jobs query

use chrono::{DateTime, Utc};
use mediator::Request;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::api::response::PaginationMeta;
use crate::queue::{JobId, JobStatus};

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

/// Query to list queue jobs, newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by status (`pending`, `running`, `done`, `dead`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Filter by job kind (e.g. `document:process`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// Job list item; the payload is left out
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobListItem {
    pub id: JobId,
    pub queue: String,
    pub kind: String,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobListItem>,
    pub pagination: PaginationMeta,
}

#[derive(Debug, thiserror::Error)]
pub enum ListJobsError {
    #[error("Unknown job status '{0}'")]
    InvalidStatus(String),
    #[error("Limit must be positive")]
    InvalidLimit,
    #[error("Offset must not be negative")]
    InvalidOffset,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Request<Result<ListJobsResponse, ListJobsError>> for ListJobsQuery {}

/// Validated paging and filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub kind: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl ListJobsQuery {
    pub fn validate(&self) -> Result<JobFilter, ListJobsError> {
        let status = match self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(s) => Some(
                s.to_ascii_lowercase()
                    .parse::<JobStatus>()
                    .map_err(|_| ListJobsError::InvalidStatus(s.to_string()))?,
            ),
            None => None,
        };

        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if limit <= 0 {
            return Err(ListJobsError::InvalidLimit);
        }
        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ListJobsError::InvalidOffset);
        }

        Ok(JobFilter {
            status,
            kind: self.kind.clone().filter(|k| !k.trim().is_empty()),
            limit: limit.min(MAX_LIMIT),
            offset,
        })
    }
}

#[tracing::instrument(skip(pool))]
pub async fn handle(pool: PgPool, query: ListJobsQuery) -> Result<ListJobsResponse, ListJobsError> {
    let filter = query.validate()?;
    let status = filter.status.map(|s| s.as_str());

    let jobs = sqlx::query_as::<_, JobListItem>(
        r#"
        SELECT id, queue, kind, status, attempts, max_attempts,
               run_at, locked_by, last_error, created_at, completed_at
        FROM ingest_jobs
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::text IS NULL OR kind = $2)
        ORDER BY created_at DESC, id
        LIMIT $3 OFFSET $4
        "#,
    )
    .bind(status)
    .bind(&filter.kind)
    .bind(filter.limit)
    .bind(filter.offset)
    .fetch_all(&pool)
    .await?;

    let (total,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM ingest_jobs
        WHERE ($1::text IS NULL OR status = $1)
          AND ($2::text IS NULL OR kind = $2)
        "#,
    )
    .bind(status)
    .bind(&filter.kind)
    .fetch_one(&pool)
    .await?;

    Ok(ListJobsResponse {
        jobs,
        pagination: PaginationMeta::new(filter.limit, filter.offset, total),
    })
}
