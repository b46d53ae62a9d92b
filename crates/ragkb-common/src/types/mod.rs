//! Domain tags shared by the API and the worker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// File-type tag carried by every document.
///
/// The wire form is lowercase. `pdf` is accepted as an alias of [`FileType::Doc`]
/// since both go through the same unstructured-document extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// Delimited tabular data imported into a per-document table
    Csv,
    /// Unstructured document (doc, pdf)
    #[serde(alias = "pdf")]
    Doc,
    /// Graph data
    Graph,
}

impl FileType {
    /// Every supported tag, in registration order.
    pub const ALL: [FileType; 3] = [FileType::Csv, FileType::Doc, FileType::Graph];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Csv => "csv",
            FileType::Doc => "doc",
            FileType::Graph => "graph",
        }
    }
}

impl FromStr for FileType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(FileType::Csv),
            "doc" | "pdf" => Ok(FileType::Doc),
            "graph" => Ok(FileType::Graph),
            _ => Err(Error::UnsupportedFileType(s.to_string())),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingestion status of a document (`documents.embedding_status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    /// Stored but no ingestion job is queued yet
    Pending,
    /// A job has been enqueued or is running
    Processing,
    /// Terminal: ingestion succeeded
    Processed,
    /// Terminal: ingestion failed
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Pending => "pending",
            EmbeddingStatus::Processing => "processing",
            EmbeddingStatus::Processed => "processed",
            EmbeddingStatus::Failed => "failed",
        }
    }

    /// Whether the pipeline has finished with this document.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EmbeddingStatus::Processed | EmbeddingStatus::Failed)
    }
}

impl FromStr for EmbeddingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EmbeddingStatus::Pending),
            "processing" => Ok(EmbeddingStatus::Processing),
            "processed" => Ok(EmbeddingStatus::Processed),
            "failed" => Ok(EmbeddingStatus::Failed),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

impl fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_accepts_pdf_alias() {
        assert_eq!("pdf".parse::<FileType>().unwrap(), FileType::Doc);
        assert_eq!("CSV".parse::<FileType>().unwrap(), FileType::Csv);
        assert_eq!(" graph ".parse::<FileType>().unwrap(), FileType::Graph);
    }

    #[test]
    fn test_file_type_rejects_unknown_tag() {
        let err = "xlsx".parse::<FileType>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType(ref tag) if tag == "xlsx"));
    }

    #[test]
    fn test_file_type_serde_alias() {
        let parsed: FileType = serde_json::from_str("\"pdf\"").unwrap();
        assert_eq!(parsed, FileType::Doc);
        assert_eq!(serde_json::to_string(&FileType::Doc).unwrap(), "\"doc\"");
    }

    #[test]
    fn test_status_terminal() {
        assert!(!EmbeddingStatus::Pending.is_terminal());
        assert!(!EmbeddingStatus::Processing.is_terminal());
        assert!(EmbeddingStatus::Processed.is_terminal());
        assert!(EmbeddingStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_parse_is_exact() {
        assert_eq!("processed".parse::<EmbeddingStatus>().unwrap(), EmbeddingStatus::Processed);
        assert!("Processed".parse::<EmbeddingStatus>().is_err());
        assert!("done".parse::<EmbeddingStatus>().is_err());
    }
}
