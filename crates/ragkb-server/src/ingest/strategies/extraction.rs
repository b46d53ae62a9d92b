//! Text and graph extraction
//!
//! Extraction itself is not wired to a model yet: the strategy waits a bounded
//! time to stand in for the work and succeeds. A [`TextExtractor`] can be
//! plugged in to do real work on the object bytes.

use async_trait::async_trait;
use ragkb_common::IngestionJob;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use super::IngestionStrategy;
use crate::ingest::error::IngestError;
use crate::ingest::jobs::IngestStats;
use crate::storage::{read_to_vec, ObjectInfo, ObjectStore};

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Process the object bytes; returns the number of extracted units
    /// (chunks, nodes) for the job statistics.
    async fn extract(&self, job: &IngestionJob, data: &[u8]) -> Result<u64, IngestError>;
}

pub struct ExtractionStrategy {
    name: &'static str,
    delay: Duration,
    extractor: Option<(Arc<dyn ObjectStore>, Arc<dyn TextExtractor>)>,
}

impl ExtractionStrategy {
    pub fn new(name: &'static str, delay: Duration) -> Self {
        Self {
            name,
            delay,
            extractor: None,
        }
    }

    pub fn with_extractor(
        mut self,
        store: Arc<dyn ObjectStore>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        self.extractor = Some((store, extractor));
        self
    }
}

#[async_trait]
impl IngestionStrategy for ExtractionStrategy {
    fn name(&self) -> &'static str {
        self.name
    }

    #[instrument(skip_all, fields(strategy = self.name, document_id = job.document_id))]
    async fn ingest(&self, job: &IngestionJob, object: &ObjectInfo) -> Result<IngestStats, IngestError> {
        let mut stats = IngestStats::new();
        stats.bytes_processed = object.size;

        match &self.extractor {
            Some((store, extractor)) => {
                let reader = store.get(&job.bucket, &job.object_name).await?;
                let data = read_to_vec(reader).await?;
                let units = extractor.extract(job, &data).await?;
                stats.record_load(units, 0);
            },
            None => {
                info!(delay_ms = self.delay.as_millis() as u64, "Simulating extraction");
                tokio::time::sleep(self.delay).await;
            },
        }

        stats.complete();
        Ok(stats)
    }
}
