use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_BUCKET: &str = "documents";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MINIO_ENDPOINT: &str = "localhost:9008";
pub const DEFAULT_LOCAL_ROOT: &str = "./data/objects";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    S3,
    Local,
}

impl std::str::FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "s3" | "minio" => Ok(StorageBackend::S3),
            "local" | "fs" => Ok(StorageBackend::Local),
            other => Err(anyhow::anyhow!("Invalid STORAGE_BACKEND: {}", other)),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Full endpoint URL including scheme; `None` means AWS.
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub path_style: bool,
    pub local_root: PathBuf,
}

impl std::fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("path_style", &self.path_style)
            .field("local_root", &self.local_root)
            .finish()
    }
}

impl StorageConfig {
    /// Read `STORAGE_BACKEND` and `S3_*` variables, falling back to the
    /// `MINIO_*` names used by existing deployments.
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match env::var("STORAGE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => StorageBackend::S3,
        };

        let use_ssl = first_var(&["S3_USE_SSL", "MINIO_USE_SSL"])
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(false);

        let endpoint = match first_var(&["S3_ENDPOINT", "MINIO_ENDPOINT"]) {
            Some(endpoint) => Some(endpoint_url(&endpoint, use_ssl)),
            None if env::var("AWS_REGION").is_ok() => None,
            None => Some(endpoint_url(DEFAULT_MINIO_ENDPOINT, use_ssl)),
        };

        let config = Self {
            backend,
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(endpoint.is_some()),
            endpoint,
            region: first_var(&["S3_REGION", "AWS_REGION"])
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            bucket: first_var(&["S3_BUCKET", "MINIO_BUCKET"])
                .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            access_key: first_var(&["S3_ACCESS_KEY", "MINIO_ACCESS_KEY", "AWS_ACCESS_KEY_ID"])
                .unwrap_or_else(|| "minioadmin".to_string()),
            secret_key: first_var(&["S3_SECRET_KEY", "MINIO_SECRET_KEY", "AWS_SECRET_ACCESS_KEY"])
                .unwrap_or_else(|| "minioadmin".to_string()),
            local_root: env::var("LOCAL_STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOCAL_ROOT)),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::S3,
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            bucket: bucket.into(),
            access_key: "minioadmin".to_string(),
            secret_key: "minioadmin".to_string(),
            path_style: true,
            local_root: PathBuf::from(DEFAULT_LOCAL_ROOT),
        }
    }

    pub fn for_local(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            backend: StorageBackend::Local,
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            bucket: bucket.into(),
            access_key: String::new(),
            secret_key: String::new(),
            path_style: false,
            local_root: root.into(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bucket.trim().is_empty() {
            anyhow::bail!("Storage bucket cannot be empty");
        }
        if self.backend == StorageBackend::S3 && self.access_key.is_empty() {
            anyhow::bail!("S3 access key cannot be empty");
        }
        Ok(())
    }
}

fn first_var(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// MinIO-style endpoints are configured as `host:port`; add a scheme from the
/// TLS flag unless one is already present.
fn endpoint_url(endpoint: &str, use_ssl: bool) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else if use_ssl {
        format!("https://{}", endpoint)
    } else {
        format!("http://{}", endpoint)
    }
}
