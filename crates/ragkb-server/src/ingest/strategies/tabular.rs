//! CSV ingestion
//!
//! The first record is the header; every following record becomes one row of
//! `kb_<knowledge_base_id>.doc_<document_id>`. Records must have as many fields
//! as the header. Records are read from the object body as the load consumes
//! them, so memory stays bounded by one record.

use async_trait::async_trait;
use csv_async::{AsyncReader, AsyncReaderBuilder, StringRecord};
use ragkb_common::IngestionJob;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{info, instrument};

use super::IngestionStrategy;
use crate::ingest::error::IngestError;
use crate::ingest::identifiers::{column_names, SafeIdent};
use crate::ingest::jobs::IngestStats;
use crate::ingest::tables::{RowSource, RowStream, TableLoad, TableStore};
use crate::storage::{ObjectInfo, ObjectStore};

pub struct TabularStrategy {
    store: Arc<dyn ObjectStore>,
    tables: Arc<dyn TableStore>,
}

impl TabularStrategy {
    pub fn new(store: Arc<dyn ObjectStore>, tables: Arc<dyn TableStore>) -> Self {
        Self { store, tables }
    }
}

/// Records of an open CSV body, after the header.
pub struct CsvRows<R> {
    reader: AsyncReader<R>,
    record: StringRecord,
}

/// Read the header row and hand back the remaining records as a row source.
pub async fn open_csv<R>(body: R) -> Result<(Vec<String>, RowSource), IngestError>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = AsyncReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .create_reader(body);

    let headers: Vec<String> = reader.headers().await?.iter().map(str::to_string).collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(IngestError::MissingHeader);
    }

    let rows = CsvRows {
        reader,
        record: StringRecord::new(),
    };
    Ok((headers, Box::new(rows)))
}

#[async_trait]
impl<R> RowStream for CsvRows<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_row(&mut self) -> Option<Result<Vec<String>, IngestError>> {
        match self.reader.read_record(&mut self.record).await {
            Ok(true) => Some(Ok(self.record.iter().map(str::to_string).collect())),
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

#[async_trait]
impl IngestionStrategy for TabularStrategy {
    fn name(&self) -> &'static str {
        "tabular"
    }

    #[instrument(skip_all, fields(document_id = job.document_id, object = %job.object_name))]
    async fn ingest(&self, job: &IngestionJob, object: &ObjectInfo) -> Result<IngestStats, IngestError> {
        let mut stats = IngestStats::new();

        let schema = SafeIdent::schema_for(job.knowledge_base_id)?;
        let table = SafeIdent::table_for(job.document_id)?;

        let body = self.store.get(&job.bucket, &job.object_name).await?;
        let (headers, rows) = open_csv(body).await?;
        let load = TableLoad {
            schema,
            table,
            columns: column_names(&headers),
            comment: Some(job.description.clone()),
        };

        let report = self.tables.load_table(&load, rows).await?;
        stats.bytes_processed = object.size;
        stats.record_load(report.inserted, report.failed);
        stats.complete();

        info!(
            table = %load.qualified_name(),
            columns = load.columns.len(),
            rows_inserted = stats.rows_inserted,
            rows_failed = stats.rows_failed,
            "CSV loaded"
        );

        Ok(stats)
    }
}
