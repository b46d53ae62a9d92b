use thiserror::Error;

use crate::storage::StorageError;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("CSV has no header row")]
    MissingHeader,

    #[error("Malformed CSV: {0}")]
    MalformedCsv(String),

    #[error("Object is {size} bytes, over the {limit} byte ingestion limit")]
    ObjectTooLarge { size: u64, limit: u64 },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),
}

impl IngestError {
    /// Whether the job should be redelivered rather than the document failed.
    pub fn is_transient(&self) -> bool {
        match self {
            IngestError::Storage(e) => e.is_transient(),
            IngestError::Database(e) => crate::db::is_transient(e),
            IngestError::MissingHeader
            | IngestError::MalformedCsv(_)
            | IngestError::ObjectTooLarge { .. }
            | IngestError::InvalidIdentifier(_)
            | IngestError::Extraction(_) => false,
        }
    }
}

impl From<csv_async::Error> for IngestError {
    fn from(err: csv_async::Error) -> Self {
        // a body read that fails mid-stream is a storage fault, not bad input
        if let csv_async::ErrorKind::Io(e) = err.kind() {
            return IngestError::Storage(StorageError::Unavailable(format!(
                "Failed to read object body: {}",
                e
            )));
        }
        IngestError::MalformedCsv(err.to_string())
    }
}
