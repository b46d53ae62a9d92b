//! Document ingestion pipeline
//!
//! Consumes `document:process` jobs. For every delivery the document row ends
//! in `processed` or `failed`, except when a transient error leaves attempts
//! for a redelivery:
//!
//! ```text
//! received ─▶ metadata fetched ─▶ strategy dispatched ─▶ processed | failed
//! ```
//!
//! Business failures (missing object, unknown type, bad CSV) are recorded on
//! the document and the job is acknowledged; they never turn into retries.

use async_trait::async_trait;
use ragkb_common::{EmbeddingStatus, FileType, IngestionJob, PROCESS_DOCUMENT_KIND};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

use super::error::IngestError;
use super::strategies::StrategyRegistry;
use crate::documents::DocumentRepository;
use crate::queue::{JobContext, JobError, JobHandler};
use crate::storage::ObjectStore;

pub struct IngestionPipeline {
    store: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentRepository>,
    strategies: StrategyRegistry,
    max_object_bytes: Option<u64>,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentRepository>,
        strategies: StrategyRegistry,
    ) -> Self {
        Self {
            store,
            documents,
            strategies,
            max_object_bytes: None,
        }
    }

    /// Fail documents whose object is larger than `limit` bytes before any of
    /// it is read.
    pub fn with_max_object_bytes(mut self, limit: u64) -> Self {
        self.max_object_bytes = Some(limit);
        self
    }

    async fn run(&self, ctx: &JobContext, job: &IngestionJob) -> Result<(), JobError> {
        let object = match self.store.stat(&job.bucket, &job.object_name).await {
            Ok(object) => object,
            Err(e) if e.is_transient() && !ctx.is_final_attempt() => {
                warn!(error = %e, "Object store unavailable");
                return Err(JobError::Retryable(e.to_string()));
            },
            Err(e) => return self.fail_document(job.document_id, &e.to_string()).await,
        };

        if let Some(limit) = self.max_object_bytes.filter(|limit| object.size > *limit) {
            let err = IngestError::ObjectTooLarge {
                size: object.size,
                limit,
            };
            return self.fail_document(job.document_id, &err.to_string()).await;
        }

        let file_type = match job.parsed_file_type() {
            Ok(file_type) => file_type,
            Err(e) => return self.fail_document(job.document_id, &e.to_string()).await,
        };

        let strategy = self.strategies.for_type(file_type);
        info!(
            strategy = strategy.name(),
            size = object.size,
            content_type = object.content_type.as_deref().unwrap_or("unknown"),
            "Dispatching document"
        );

        match strategy.ingest(job, &object).await {
            Ok(stats) => {
                self.settle(job.document_id, EmbeddingStatus::Processed).await?;
                info!(
                    rows_inserted = stats.rows_inserted,
                    rows_failed = stats.rows_failed,
                    bytes = stats.bytes_processed,
                    duration_secs = stats.duration_secs,
                    "Document processed"
                );
                Ok(())
            },
            Err(e) => self.strategy_failed(ctx, job, file_type, e).await,
        }
    }

    async fn strategy_failed(
        &self,
        ctx: &JobContext,
        job: &IngestionJob,
        file_type: FileType,
        err: IngestError,
    ) -> Result<(), JobError> {
        if err.is_transient() && !ctx.is_final_attempt() {
            warn!(file_type = %file_type, error = %err, "Transient ingestion failure");
            return Err(JobError::Retryable(err.to_string()));
        }
        self.fail_document(job.document_id, &err.to_string()).await
    }

    async fn fail_document(&self, document_id: i64, reason: &str) -> Result<(), JobError> {
        error!(error = %reason, "Document failed");
        self.settle(document_id, EmbeddingStatus::Failed).await
    }

    /// Record a terminal status. A transient database error is retried so the
    /// document does not stay `processing`.
    async fn settle(&self, document_id: i64, status: EmbeddingStatus) -> Result<(), JobError> {
        match self.documents.set_status(document_id, status).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                warn!(status = %status, "Document row no longer exists");
                Ok(())
            },
            Err(e) if e.is_transient() => Err(JobError::Retryable(format!(
                "failed to mark document {}: {}",
                status, e
            ))),
            Err(e) => Err(JobError::Fatal(format!(
                "failed to mark document {}: {}",
                status, e
            ))),
        }
    }
}

#[async_trait]
impl JobHandler for IngestionPipeline {
    fn kind(&self) -> &'static str {
        PROCESS_DOCUMENT_KIND
    }

    #[instrument(skip_all, fields(job_id = %ctx.job_id, attempt = ctx.attempt, document_id = tracing::field::Empty))]
    async fn handle(&self, ctx: &JobContext, payload: &serde_json::Value) -> Result<(), JobError> {
        let job = IngestionJob::from_payload(payload)
            .map_err(|e| JobError::Fatal(format!("malformed ingestion payload: {}", e)))?;
        tracing::Span::current().record("document_id", job.document_id);

        self.run(ctx, &job).await
    }

    async fn on_dead_letter(&self, ctx: &JobContext, payload: &serde_json::Value, reason: &str) {
        let Some(document_id) = payload.get("document_id").and_then(|v| v.as_i64()) else {
            warn!(job_id = %ctx.job_id, "Dead-lettered job has no readable document id");
            return;
        };

        match self.documents.set_status(document_id, EmbeddingStatus::Failed).await {
            Ok(_) => warn!(job_id = %ctx.job_id, document_id, reason, "Document failed after dead-letter"),
            Err(e) => error!(
                job_id = %ctx.job_id,
                document_id,
                error = %e,
                "Failed to mark dead-lettered document"
            ),
        }
    }
}
