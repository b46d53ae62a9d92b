//! Object storage
//!
//! Uploaded documents live in an object store addressed by `(bucket, key)`.
//! Two backends share the [`ObjectStore`] contract: an S3-compatible client
//! (MinIO or AWS) and a local directory tree used in development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncRead;
use uuid::Uuid;

pub mod config;
pub mod local;
pub mod s3;

pub use config::{StorageBackend, StorageConfig};
pub use local::LocalObjectStore;
pub use s3::S3ObjectStore;

/// Streaming object body.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// Metadata returned by [`ObjectStore::stat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub size: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("Invalid object location: {0}")]
    InvalidLocation(String),

    /// Network, timeout or 5xx failure; the call may succeed if repeated.
    #[error("Object store unavailable: {0}")]
    Unavailable(String),

    #[error("Object store error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn not_found(bucket: &str, key: &str) -> Self {
        Self::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create the bucket if it does not exist yet.
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> StorageResult<()>;

    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo>;

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader>;
}

/// Build the configured backend.
pub async fn from_config(config: &StorageConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match config.backend {
        StorageBackend::S3 => Arc::new(S3ObjectStore::new(config)?),
        StorageBackend::Local => Arc::new(LocalObjectStore::new(&config.local_root).await?),
    };

    tracing::info!(backend = ?config.backend, bucket = %config.bucket, "Object store initialized");
    Ok(store)
}

/// Read a whole object into memory.
pub async fn read_to_vec(mut reader: ObjectReader) -> StorageResult<Vec<u8>> {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    reader
        .read_to_end(&mut buf)
        .await
        .map_err(|e| StorageError::Unavailable(format!("Failed to read object body: {}", e)))?;
    Ok(buf)
}

/// Final path component of a client-supplied file name, or `None` when nothing
/// usable is left.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace('\0', "");
    let base = base.trim();

    if base.is_empty() || base == "." || base == ".." {
        None
    } else {
        Some(base.to_string())
    }
}

/// Object key for a document upload: `kb_<id>/<uuid>/<file name>`.
///
/// The random segment keeps re-uploads of the same file name from overwriting
/// the object a queued job still points at.
pub fn document_key(knowledge_base_id: i64, file_name: &str) -> String {
    format!("kb_{}/{}/{}", knowledge_base_id, Uuid::new_v4(), file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_file_name("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize_file_name("C:\\users\\me\\data.csv").as_deref(), Some("data.csv"));
        assert_eq!(sanitize_file_name("report.csv").as_deref(), Some("report.csv"));
    }

    #[test]
    fn test_sanitize_rejects_empty_names() {
        assert_eq!(sanitize_file_name(""), None);
        assert_eq!(sanitize_file_name("dir/"), None);
        assert_eq!(sanitize_file_name(".."), None);
        assert_eq!(sanitize_file_name("  "), None);
    }

    #[test]
    fn test_document_key_layout() {
        let key = document_key(12, "people.csv");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "kb_12");
        assert!(Uuid::parse_str(parts[1]).is_ok());
        assert_eq!(parts[2], "people.csv");
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(StorageError::Unavailable("timeout".into()).is_transient());
        assert!(!StorageError::not_found("b", "k").is_transient());
        assert!(!StorageError::Backend("403".into()).is_transient());
    }
}
