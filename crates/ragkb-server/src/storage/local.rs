//! Local filesystem backend
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<bucket>/<key>                 object bytes
//! <root>/.meta/<bucket>/<key>.json      content type sidecar
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{ObjectInfo, ObjectReader, ObjectStore, StorageError, StorageResult};

const META_DIR: &str = ".meta";

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: Option<String>,
}

impl LocalObjectStore {
    pub async fn new(root: impl AsRef<Path>) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> StorageResult<PathBuf> {
        validate_bucket(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let relative = validate_key(key)?;
        Ok(self.bucket_dir(bucket)?.join(relative))
    }

    fn sidecar_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        let relative = validate_key(key)?;
        validate_bucket(bucket)?;
        let mut path = self.root.join(META_DIR).join(bucket).join(relative);
        let name = format!(
            "{}.json",
            path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
        );
        path.set_file_name(name);
        Ok(path)
    }

    async fn ensure_bucket_exists(&self, bucket: &str) -> StorageResult<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => Ok(dir),
            Ok(_) => Err(StorageError::InvalidLocation(format!("{} is not a bucket", bucket))),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::Backend(format!(
                "bucket {} does not exist",
                bucket
            ))),
            Err(e) => Err(io_error(e, bucket)),
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    #[instrument(skip(self))]
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        let dir = self.bucket_dir(bucket)?;
        fs::create_dir_all(&dir).await.map_err(|e| io_error(e, bucket))
    }

    #[instrument(skip(self, data), fields(size = data.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> StorageResult<()> {
        self.ensure_bucket_exists(bucket).await?;
        let path = self.object_path(bucket, key)?;
        write_atomic(&path, &data).await.map_err(|e| io_error(e, key))?;

        let sidecar = Sidecar {
            content_type: content_type.map(str::to_string),
        };
        let sidecar_bytes = serde_json::to_vec(&sidecar)
            .map_err(|e| StorageError::Backend(format!("sidecar for {}: {}", key, e)))?;
        write_atomic(&self.sidecar_path(bucket, key)?, &sidecar_bytes)
            .await
            .map_err(|e| io_error(e, key))?;

        debug!(path = %path.display(), "Stored object");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stat(&self, bucket: &str, key: &str) -> StorageResult<ObjectInfo> {
        let path = self.object_path(bucket, key)?;
        let meta = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => return Err(StorageError::not_found(bucket, key)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::not_found(bucket, key))
            },
            Err(e) => return Err(io_error(e, key)),
        };

        let last_modified: Option<DateTime<Utc>> = meta.modified().ok().map(DateTime::from);
        let etag = last_modified.map(|t| {
            format!("{:x}-{:x}", meta.len(), t.timestamp_nanos_opt().unwrap_or_default())
        });

        let content_type = match fs::read(self.sidecar_path(bucket, key)?).await {
            Ok(bytes) => serde_json::from_slice::<Sidecar>(&bytes)
                .ok()
                .and_then(|s| s.content_type),
            Err(_) => None,
        };

        Ok(ObjectInfo {
            size: meta.len(),
            content_type,
            etag,
            last_modified,
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<ObjectReader> {
        let path = self.object_path(bucket, key)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found(bucket, key)),
            Err(e) => Err(io_error(e, key)),
        }
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    fs::write(&tmp, data).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}

fn io_error(err: std::io::Error, what: &str) -> StorageError {
    match err.kind() {
        ErrorKind::PermissionDenied => StorageError::Backend(format!("{}: {}", what, err)),
        _ => StorageError::Unavailable(format!("{}: {}", what, err)),
    }
}

fn validate_bucket(bucket: &str) -> StorageResult<()> {
    let valid = !bucket.is_empty()
        && bucket.len() <= 63
        && !bucket.starts_with('.')
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidLocation(format!("invalid bucket name {:?}", bucket)))
    }
}

/// Keys are `/`-separated relative paths; anything that could resolve outside
/// the bucket directory is rejected.
fn validate_key(key: &str) -> StorageResult<PathBuf> {
    let invalid = || StorageError::InvalidLocation(format!("invalid object key {:?}", key));

    if key.is_empty() || key.contains('\0') || key.contains('\\') || key.ends_with('/') {
        return Err(invalid());
    }

    let path = PathBuf::from(key);
    let mut depth = 0usize;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid())
            },
        }
    }

    if depth == 0 {
        return Err(invalid());
    }
    Ok(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::read_to_vec;

    async fn store() -> (tempfile::TempDir, LocalObjectStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_put_stat_get() {
        let (_dir, store) = store().await;
        store.ensure_bucket("documents").await.unwrap();
        store
            .put("documents", "kb_1/a/people.csv", b"name\nada\n".to_vec(), Some("text/csv"))
            .await
            .unwrap();

        let info = store.stat("documents", "kb_1/a/people.csv").await.unwrap();
        assert_eq!(info.size, 9);
        assert_eq!(info.content_type.as_deref(), Some("text/csv"));
        assert!(info.etag.is_some());
        assert!(info.last_modified.is_some());

        let body = read_to_vec(store.get("documents", "kb_1/a/people.csv").await.unwrap())
            .await
            .unwrap();
        assert_eq!(body, b"name\nada\n");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let (_dir, store) = store().await;
        store.ensure_bucket("documents").await.unwrap();

        let err = store.stat("documents", "kb_1/missing.csv").await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.get("documents", "kb_1/missing.csv").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_ensure_bucket_is_idempotent() {
        let (_dir, store) = store().await;
        store.ensure_bucket("documents").await.unwrap();
        store.ensure_bucket("documents").await.unwrap();
        assert!(store.root().join("documents").is_dir());
    }

    #[tokio::test]
    async fn test_put_requires_bucket() {
        let (_dir, store) = store().await;
        let err = store.put("nope", "a.csv", vec![1], None).await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let (_dir, store) = store().await;
        store.ensure_bucket("b").await.unwrap();
        store.put("b", "k.txt", b"first".to_vec(), None).await.unwrap();
        store.put("b", "k.txt", b"second!".to_vec(), None).await.unwrap();

        let info = store.stat("b", "k.txt").await.unwrap();
        assert_eq!(info.size, 7);
        assert_eq!(info.content_type, None);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let (_dir, store) = store().await;
        store.ensure_bucket("b").await.unwrap();

        for key in ["../outside.csv", "/etc/passwd", "a/../../x", "", "dir/", "a\\b"] {
            let err = store.put("b", key, vec![1], None).await.unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidLocation(_)),
                "key {:?} should be rejected",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_rejects_bad_bucket_names() {
        let (_dir, store) = store().await;
        for bucket in ["", ".meta", "a/b", ".."] {
            assert!(store.ensure_bucket(bucket).await.is_err(), "bucket {:?}", bucket);
        }
    }
}
