//! Durable job queue
//!
//! Jobs live in the `ingest_jobs` table and are claimed with
//! `FOR UPDATE SKIP LOCKED`, so any number of worker processes can share one
//! queue. Delivery is at-least-once: a job whose worker stops heartbeating is
//! handed out again once its lease expires.
//!
//! ```text
//! pending ──claim──▶ running ──ack──────────▶ done
//!    ▲                  │
//!    └──retry/release───┤
//!                       └──dead_letter──────▶ dead
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub mod config;
pub mod postgres;
pub mod worker;

pub use config::QueueConfig;
pub use postgres::PgJobQueue;
pub use worker::{JobContext, JobError, JobHandler, WorkerPool, WorkerPoolConfig};

pub type JobId = Uuid;

pub const DEFAULT_QUEUE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Done,
    Dead,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Dead => "dead",
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "dead" => Ok(JobStatus::Dead),
            other => Err(QueueError::Invalid(format!("unknown job status {:?}", other))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job to be enqueued.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    /// While a job with this key is pending or running, enqueueing another one
    /// with the same key returns the existing job instead.
    pub dedup_key: Option<String>,
    pub max_attempts: i32,
}

impl NewJob {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            kind: kind.into(),
            payload,
            dedup_key: None,
            max_attempts: config::DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// A claimed job handed to a worker.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Delivery {
    pub id: JobId,
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    /// Attempt number of this delivery, starting at 1.
    pub attempts: i32,
    pub max_attempts: i32,
}

impl Delivery {
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Full job row, for inspection endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobRecord {
    pub id: JobId,
    pub queue: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub dedup_key: Option<String>,
    pub status: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub run_at: DateTime<Utc>,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Result of a lease sweep.
#[derive(Debug, Default)]
pub struct ReapOutcome {
    /// Jobs put back to pending.
    pub requeued: u64,
    /// Jobs that had no attempts left and were dead-lettered.
    pub dead: Vec<Delivery>,
}

#[derive(Error, Debug)]
pub enum QueueError {
    /// The broker could not be reached; the operation may succeed later.
    #[error("Job broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Job {0} is not running")]
    NotRunning(JobId),

    #[error("Invalid job: {0}")]
    Invalid(String),

    #[error("Job queue database error: {0}")]
    Database(sqlx::Error),
}

impl QueueError {
    pub fn is_transient(&self) -> bool {
        matches!(self, QueueError::BrokerUnavailable(_))
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        if crate::db::is_transient(&err) {
            QueueError::BrokerUnavailable(err.to_string())
        } else {
            QueueError::Database(err)
        }
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> QueueResult<JobId>;

    /// Claim the oldest ready job on any of `queues`, incrementing its attempt
    /// counter.
    async fn dequeue(&self, queues: &[String], worker_id: &str) -> QueueResult<Option<Delivery>>;

    async fn ack(&self, id: JobId) -> QueueResult<()>;

    /// Put a running job back to pending, runnable after `delay`.
    async fn retry(&self, id: JobId, delay: Duration, error: &str) -> QueueResult<()>;

    /// Put a running job back without counting the interrupted attempt.
    async fn release(&self, id: JobId) -> QueueResult<()>;

    async fn dead_letter(&self, id: JobId, error: &str) -> QueueResult<()>;

    /// Extend the lease of a running job.
    async fn heartbeat(&self, id: JobId) -> QueueResult<()>;

    /// Recover running jobs whose last heartbeat is older than `lease`.
    async fn requeue_expired(&self, lease: Duration) -> QueueResult<ReapOutcome>;
}
