//! Ingestion job payload
//!
//! The message the API publishes after an upload and the worker consumes.
//! It is immutable once enqueued and may be delivered more than once.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::FileType;

/// Job kind routed to the document ingestion handler.
pub const PROCESS_DOCUMENT_KIND: &str = "document:process";

/// Wire payload for one document ingestion.
///
/// `file_type` stays a plain string so that a tag this build does not know
/// still deserializes; the pipeline records such documents as failed instead of
/// treating the whole message as malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    pub knowledge_base_id: i64,
    pub document_id: i64,
    #[serde(default)]
    pub description: String,
    pub bucket: String,
    pub object_name: String,
    pub file_type: String,
}

impl IngestionJob {
    /// Serialize into the JSON value stored by the queue.
    pub fn to_payload(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse a queued payload.
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(payload.clone())?)
    }

    /// The parsed file type, if this build supports it.
    pub fn parsed_file_type(&self) -> Result<FileType> {
        self.file_type.parse()
    }

    /// Key used to keep at most one outstanding job per document.
    pub fn dedup_key(&self) -> String {
        dedup_key_for(self.document_id)
    }
}

/// Dedup key for a document's ingestion job.
pub fn dedup_key_for(document_id: i64) -> String {
    format!("document:{}", document_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_field_names() {
        let job = IngestionJob {
            knowledge_base_id: 3,
            document_id: 11,
            description: "people".to_string(),
            bucket: "documents".to_string(),
            object_name: "kb_3/people.csv".to_string(),
            file_type: "csv".to_string(),
        };

        let payload = job.to_payload().unwrap();
        assert_eq!(
            payload,
            json!({
                "knowledge_base_id": 3,
                "document_id": 11,
                "description": "people",
                "bucket": "documents",
                "object_name": "kb_3/people.csv",
                "file_type": "csv"
            })
        );
    }

    #[test]
    fn test_unknown_file_type_still_deserializes() {
        let payload = json!({
            "knowledge_base_id": 1,
            "document_id": 2,
            "bucket": "documents",
            "object_name": "kb_1/a.bin",
            "file_type": "spreadsheet"
        });

        let job = IngestionJob::from_payload(&payload).unwrap();
        assert_eq!(job.description, "");
        assert!(job.parsed_file_type().is_err());
    }

    #[test]
    fn test_missing_document_id_is_malformed() {
        let payload = json!({ "knowledge_base_id": 1, "bucket": "b" });
        assert!(IngestionJob::from_payload(&payload).is_err());
    }

    #[test]
    fn test_dedup_key() {
        assert_eq!(dedup_key_for(42), "document:42");
    }
}
