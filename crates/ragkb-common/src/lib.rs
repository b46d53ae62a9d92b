//! RAGKB Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging, and error handling for the RAGKB workspace.
//!
//! # Overview
//!
//! Both halves of the ingestion hand-off depend on this crate:
//!
//! - **Types**: file-type tags and document status values
//! - **Job payload**: the JSON message the API enqueues and the worker consumes
//! - **Logging**: `tracing` subscriber setup shared by every binary
//! - **Error Handling**: common error and result types
//!
//! # Example
//!
//! ```no_run
//! use ragkb_common::{FileType, IngestionJob};
//!
//! let job = IngestionJob {
//!     knowledge_base_id: 7,
//!     document_id: 42,
//!     description: "quarterly numbers".to_string(),
//!     bucket: "documents".to_string(),
//!     object_name: "kb_7/report.csv".to_string(),
//!     file_type: FileType::Csv.to_string(),
//! };
//! let payload = job.to_payload().unwrap();
//! assert_eq!(IngestionJob::from_payload(&payload).unwrap(), job);
//! ```

pub mod error;
pub mod job;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use job::{IngestionJob, PROCESS_DOCUMENT_KIND};
pub use types::{EmbeddingStatus, FileType};
