//! Reconciliation sweep
//!
//! Finds documents whose ingestion job was never enqueued (left `pending` by a
//! failed enqueue) or was lost (`processing` for longer than the stale
//! threshold) and enqueues them again. Dedup keys keep a document that still
//! has an outstanding job from getting a second one.

use ragkb_common::{EmbeddingStatus, IngestionJob, PROCESS_DOCUMENT_KIND};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::config::ReconcileConfig;
use crate::db::DbError;
use crate::documents::{Document, DocumentRepository};
use crate::queue::{JobQueue, NewJob, QueueError};

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub enqueued: u64,
    pub skipped: u64,
}

pub struct Reconciler {
    documents: Arc<dyn DocumentRepository>,
    queue: Arc<dyn JobQueue>,
    config: ReconcileConfig,
    queue_name: String,
    max_attempts: i32,
}

impl Reconciler {
    pub fn new(
        documents: Arc<dyn DocumentRepository>,
        queue: Arc<dyn JobQueue>,
        config: ReconcileConfig,
        queue_name: impl Into<String>,
        max_attempts: i32,
    ) -> Self {
        Self {
            documents,
            queue,
            config,
            queue_name: queue_name.into(),
            max_attempts,
        }
    }

    /// Sweep every `interval` until cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.config.interval_secs,
            stale_after_secs = self.config.stale_after_secs,
            "Reconciler starting"
        );

        let mut ticker = tokio::time::interval(self.config.interval());
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {},
            }

            match self.sweep().await {
                Ok(report) if report.enqueued > 0 => {
                    info!(enqueued = report.enqueued, skipped = report.skipped, "Reconciled documents")
                },
                Ok(_) => debug!("Nothing to reconcile"),
                Err(e) => warn!(error = %e, "Reconcile sweep failed"),
            }
        }

        info!("Reconciler stopped");
    }

    /// Re-enqueue pending documents and stale processing ones.
    ///
    /// Stops at the first broker error; the next sweep picks up the rest.
    #[instrument(skip(self))]
    pub async fn sweep(&self) -> anyhow::Result<SweepReport> {
        let mut report = SweepReport::default();

        let pending = self
            .documents
            .list_stale(&[EmbeddingStatus::Pending], Duration::ZERO, self.config.batch_size)
            .await?;
        let stale = self
            .documents
            .list_stale(
                &[EmbeddingStatus::Processing],
                self.config.stale_after(),
                self.config.batch_size,
            )
            .await?;

        for document in pending.iter().chain(stale.iter()) {
            match self.requeue(document).await {
                Ok(true) => report.enqueued += 1,
                Ok(false) => report.skipped += 1,
                Err(e) if e.is_transient() => {
                    warn!(document_id = document.id, error = %e, "Broker unavailable, ending sweep");
                    break;
                },
                Err(e) => {
                    warn!(document_id = document.id, error = %e, "Failed to re-enqueue document");
                    report.skipped += 1;
                },
            }
        }

        Ok(report)
    }

    /// Claim the document by moving it to `processing`, then enqueue. Returns
    /// `false` when another writer changed the document first.
    async fn requeue(&self, document: &Document) -> Result<bool, QueueError> {
        let observed = document
            .status()
            .map_err(|e| QueueError::Invalid(e.to_string()))?;

        let claimed = self
            .documents
            .compare_and_set_status(document.id, observed, EmbeddingStatus::Processing)
            .await
            .map_err(db_error)?;
        if !claimed {
            return Ok(false);
        }

        let job = IngestionJob {
            knowledge_base_id: document.knowledge_base_id,
            document_id: document.id,
            description: document.description.clone(),
            bucket: document.bucket.clone(),
            object_name: document.object_key.clone(),
            file_type: document.file_type.clone(),
        };
        let payload = job
            .to_payload()
            .map_err(|e| QueueError::Invalid(e.to_string()))?;

        let new_job = NewJob::new(PROCESS_DOCUMENT_KIND, payload)
            .on_queue(&self.queue_name)
            .with_dedup_key(job.dedup_key())
            .with_max_attempts(self.max_attempts);

        match self.queue.enqueue(new_job).await {
            Ok(job_id) => {
                info!(document_id = document.id, job_id = %job_id, from = %observed, "Document re-enqueued");
                Ok(true)
            },
            Err(e) => {
                if let Err(revert) = self
                    .documents
                    .compare_and_set_status(
                        document.id,
                        EmbeddingStatus::Processing,
                        EmbeddingStatus::Pending,
                    )
                    .await
                {
                    warn!(document_id = document.id, error = %revert, "Failed to revert document to pending");
                }
                Err(e)
            },
        }
    }
}

/// The queue shares the database, so a transient database error ends the
/// sweep the same way a broker error does.
fn db_error(err: DbError) -> QueueError {
    if err.is_transient() {
        QueueError::BrokerUnavailable(err.to_string())
    } else {
        QueueError::Invalid(err.to_string())
    }
}
