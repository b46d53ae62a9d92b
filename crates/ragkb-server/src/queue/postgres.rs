//! Postgres-backed [`JobQueue`]

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{
    Delivery, JobId, JobQueue, JobRecord, JobStatus, NewJob, QueueError, QueueResult, ReapOutcome,
};

/// Message stored on jobs recovered from a dead worker.
const LEASE_EXPIRED: &str = "lease expired: worker stopped heartbeating";

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ReapedRow {
    id: Uuid,
    queue: String,
    kind: String,
    payload: serde_json::Value,
    attempts: i32,
    max_attempts: i32,
    status: String,
}

impl PgJobQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn get(&self, id: JobId) -> QueueResult<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>("SELECT * FROM ingest_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn insert(&self, id: Uuid, job: &NewJob) -> QueueResult<Option<JobId>> {
        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO ingest_jobs (id, queue, kind, payload, dedup_key, max_attempts)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (dedup_key) WHERE status IN ('pending', 'running') DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&job.queue)
        .bind(&job.kind)
        .bind(&job.payload)
        .bind(&job.dedup_key)
        .bind(job.max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        Ok(inserted.map(|(id,)| id))
    }

    async fn outstanding(&self, dedup_key: &str) -> QueueResult<Option<JobId>> {
        let existing: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM ingest_jobs
            WHERE dedup_key = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(dedup_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(existing.map(|(id,)| id))
    }

    /// Apply a state transition to a job that must still be running.
    async fn transition(&self, id: JobId, sql: &str, error: Option<&str>, delay: Option<f64>) -> QueueResult<()> {
        let mut query = sqlx::query(sql).bind(id);
        if let Some(error) = error {
            query = query.bind(error);
        }
        if let Some(delay) = delay {
            query = query.bind(delay);
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(QueueError::NotRunning(id));
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    #[instrument(skip(self, job), fields(kind = %job.kind, queue = %job.queue, dedup_key = ?job.dedup_key))]
    async fn enqueue(&self, job: NewJob) -> QueueResult<JobId> {
        if job.kind.is_empty() || job.queue.is_empty() {
            return Err(QueueError::Invalid("job kind and queue are required".to_string()));
        }

        // An outstanding duplicate can finish between the insert and the lookup;
        // the next insert then succeeds.
        for _ in 0..3 {
            let id = Uuid::new_v4();
            if let Some(id) = self.insert(id, &job).await? {
                debug!(job_id = %id, "Job enqueued");
                return Ok(id);
            }

            if let Some(key) = job.dedup_key.as_deref() {
                if let Some(existing) = self.outstanding(key).await? {
                    debug!(job_id = %existing, "Job already outstanding for dedup key");
                    return Ok(existing);
                }
            }
        }

        Err(QueueError::Invalid(format!(
            "could not enqueue job with dedup key {:?}",
            job.dedup_key
        )))
    }

    async fn dequeue(&self, queues: &[String], worker_id: &str) -> QueueResult<Option<Delivery>> {
        let delivery = sqlx::query_as::<_, Delivery>(
            r#"
            UPDATE ingest_jobs
            SET status = 'running',
                attempts = attempts + 1,
                locked_by = $2,
                locked_at = NOW(),
                heartbeat_at = NOW(),
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM ingest_jobs
                WHERE status = 'pending'
                  AND queue = ANY($1)
                  AND run_at <= NOW()
                ORDER BY run_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, queue, kind, payload, attempts, max_attempts
            "#,
        )
        .bind(queues)
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(delivery)
    }

    async fn ack(&self, id: JobId) -> QueueResult<()> {
        self.transition(
            id,
            r#"
            UPDATE ingest_jobs
            SET status = 'done', completed_at = NOW(), updated_at = NOW(),
                locked_by = NULL, locked_at = NULL, heartbeat_at = NULL
            WHERE id = $1 AND status = 'running'
            "#,
            None,
            None,
        )
        .await
    }

    async fn retry(&self, id: JobId, delay: Duration, error: &str) -> QueueResult<()> {
        self.transition(
            id,
            r#"
            UPDATE ingest_jobs
            SET status = 'pending',
                run_at = NOW() + make_interval(secs => $3),
                last_error = $2,
                updated_at = NOW(),
                locked_by = NULL, locked_at = NULL, heartbeat_at = NULL
            WHERE id = $1 AND status = 'running'
            "#,
            Some(error),
            Some(delay.as_secs_f64()),
        )
        .await
    }

    async fn release(&self, id: JobId) -> QueueResult<()> {
        self.transition(
            id,
            r#"
            UPDATE ingest_jobs
            SET status = 'pending',
                attempts = GREATEST(attempts - 1, 0),
                run_at = NOW(),
                updated_at = NOW(),
                locked_by = NULL, locked_at = NULL, heartbeat_at = NULL
            WHERE id = $1 AND status = 'running'
            "#,
            None,
            None,
        )
        .await
    }

    async fn dead_letter(&self, id: JobId, error: &str) -> QueueResult<()> {
        self.transition(
            id,
            r#"
            UPDATE ingest_jobs
            SET status = 'dead', last_error = $2, completed_at = NOW(), updated_at = NOW(),
                locked_by = NULL, locked_at = NULL, heartbeat_at = NULL
            WHERE id = $1 AND status = 'running'
            "#,
            Some(error),
            None,
        )
        .await
    }

    async fn heartbeat(&self, id: JobId) -> QueueResult<()> {
        self.transition(
            id,
            "UPDATE ingest_jobs SET heartbeat_at = NOW() WHERE id = $1 AND status = 'running'",
            None,
            None,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn requeue_expired(&self, lease: Duration) -> QueueResult<ReapOutcome> {
        let rows = sqlx::query_as::<_, ReapedRow>(
            r#"
            WITH expired AS (
                SELECT id FROM ingest_jobs
                WHERE status = 'running'
                  AND COALESCE(heartbeat_at, locked_at, updated_at) < NOW() - make_interval(secs => $1)
                FOR UPDATE SKIP LOCKED
            )
            UPDATE ingest_jobs j
            SET status = CASE WHEN j.attempts >= j.max_attempts THEN 'dead' ELSE 'pending' END,
                completed_at = CASE WHEN j.attempts >= j.max_attempts THEN NOW() ELSE NULL END,
                run_at = NOW(),
                last_error = $2,
                updated_at = NOW(),
                locked_by = NULL, locked_at = NULL, heartbeat_at = NULL
            FROM expired
            WHERE j.id = expired.id
            RETURNING j.id, j.queue, j.kind, j.payload, j.attempts, j.max_attempts, j.status
            "#,
        )
        .bind(lease.as_secs_f64())
        .bind(LEASE_EXPIRED)
        .fetch_all(&self.pool)
        .await?;

        let mut outcome = ReapOutcome::default();
        for row in rows {
            if row.status == JobStatus::Dead.as_str() {
                warn!(job_id = %row.id, attempts = row.attempts, "Expired job had no attempts left");
                outcome.dead.push(Delivery {
                    id: row.id,
                    queue: row.queue,
                    kind: row.kind,
                    payload: row.payload,
                    attempts: row.attempts,
                    max_attempts: row.max_attempts,
                });
            } else {
                outcome.requeued += 1;
            }
        }

        if outcome.requeued > 0 || !outcome.dead.is_empty() {
            warn!(
                requeued = outcome.requeued,
                dead = outcome.dead.len(),
                "Recovered jobs with expired leases"
            );
        }

        Ok(outcome)
    }
}
