//! Per-file-type ingestion strategies

use async_trait::async_trait;
use ragkb_common::{FileType, IngestionJob};
use std::sync::Arc;

use super::config::IngestConfig;
use super::error::IngestError;
use super::jobs::IngestStats;
use super::tables::TableStore;
use crate::storage::{ObjectInfo, ObjectStore};

pub mod extraction;
pub mod tabular;

pub use extraction::{ExtractionStrategy, TextExtractor};
pub use tabular::TabularStrategy;

#[async_trait]
pub trait IngestionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Turn the stored object into derived artifacts.
    ///
    /// Must be safe to run again for the same job.
    async fn ingest(&self, job: &IngestionJob, object: &ObjectInfo) -> Result<IngestStats, IngestError>;
}

/// One strategy per [`FileType`].
#[derive(Clone)]
pub struct StrategyRegistry {
    tabular: Arc<dyn IngestionStrategy>,
    document: Arc<dyn IngestionStrategy>,
    graph: Arc<dyn IngestionStrategy>,
}

impl StrategyRegistry {
    pub fn new(
        tabular: Arc<dyn IngestionStrategy>,
        document: Arc<dyn IngestionStrategy>,
        graph: Arc<dyn IngestionStrategy>,
    ) -> Self {
        Self {
            tabular,
            document,
            graph,
        }
    }

    /// CSV into tables, simulated extraction for documents and graphs.
    pub fn standard(
        store: Arc<dyn ObjectStore>,
        tables: Arc<dyn TableStore>,
        config: &IngestConfig,
    ) -> Self {
        let delay = config.extraction_delay();
        Self::new(
            Arc::new(TabularStrategy::new(store, tables)),
            Arc::new(ExtractionStrategy::new("document", delay)),
            Arc::new(ExtractionStrategy::new("graph", delay)),
        )
    }

    pub fn for_type(&self, file_type: FileType) -> &Arc<dyn IngestionStrategy> {
        match file_type {
            FileType::Csv => &self.tabular,
            FileType::Doc => &self.document,
            FileType::Graph => &self.graph,
        }
    }
}
