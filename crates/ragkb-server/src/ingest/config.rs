//! Ingestion worker configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::env_parse;

/// Jobs processed concurrently by one worker process.
pub const DEFAULT_WORKER_CONCURRENCY: usize = 10;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 300;
/// Simulated latency for document and graph extraction.
pub const DEFAULT_EXTRACTION_DELAY_SECS: u64 = 5;
/// Larger objects fail the document without being read.
pub const DEFAULT_MAX_OBJECT_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_RECONCILE_STALE_AFTER_SECS: u64 = 900;
pub const DEFAULT_RECONCILE_BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub worker_concurrency: usize,
    pub job_timeout_secs: u64,
    pub extraction_delay_secs: u64,
    pub max_object_bytes: u64,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// A `processing` document untouched for this long is re-enqueued.
    pub stale_after_secs: u64,
    pub batch_size: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            worker_concurrency: DEFAULT_WORKER_CONCURRENCY,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            extraction_delay_secs: DEFAULT_EXTRACTION_DELAY_SECS,
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
            reconcile: ReconcileConfig::default(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            stale_after_secs: DEFAULT_RECONCILE_STALE_AFTER_SECS,
            batch_size: DEFAULT_RECONCILE_BATCH_SIZE,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            worker_concurrency: env_parse("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY),
            job_timeout_secs: env_parse("WORKER_JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS),
            extraction_delay_secs: env_parse(
                "INGEST_EXTRACTION_DELAY_SECS",
                DEFAULT_EXTRACTION_DELAY_SECS,
            ),
            max_object_bytes: env_parse("INGEST_MAX_OBJECT_BYTES", DEFAULT_MAX_OBJECT_BYTES),
            reconcile: ReconcileConfig {
                enabled: env_parse("RECONCILE_ENABLED", true),
                interval_secs: env_parse("RECONCILE_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL_SECS),
                stale_after_secs: env_parse(
                    "RECONCILE_STALE_AFTER_SECS",
                    DEFAULT_RECONCILE_STALE_AFTER_SECS,
                ),
                batch_size: env_parse("RECONCILE_BATCH_SIZE", DEFAULT_RECONCILE_BATCH_SIZE),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.worker_concurrency == 0 {
            anyhow::bail!("WORKER_CONCURRENCY must be at least 1");
        }
        if self.job_timeout_secs == 0 {
            anyhow::bail!("WORKER_JOB_TIMEOUT_SECS must be greater than 0");
        }
        if self.max_object_bytes == 0 {
            anyhow::bail!("INGEST_MAX_OBJECT_BYTES must be greater than 0");
        }
        if self.extraction_delay_secs >= self.job_timeout_secs {
            anyhow::bail!(
                "INGEST_EXTRACTION_DELAY_SECS ({}) must be shorter than WORKER_JOB_TIMEOUT_SECS ({})",
                self.extraction_delay_secs,
                self.job_timeout_secs
            );
        }
        if self.reconcile.enabled {
            if self.reconcile.interval_secs == 0 {
                anyhow::bail!("RECONCILE_INTERVAL_SECS must be greater than 0");
            }
            if self.reconcile.batch_size <= 0 {
                anyhow::bail!("RECONCILE_BATCH_SIZE must be positive");
            }
            if self.reconcile.stale_after_secs <= self.job_timeout_secs {
                tracing::warn!(
                    stale_after_secs = self.reconcile.stale_after_secs,
                    job_timeout_secs = self.job_timeout_secs,
                    "Reconcile threshold is not longer than the job timeout; running jobs may be re-enqueued"
                );
            }
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn extraction_delay(&self) -> Duration {
        Duration::from_secs(self.extraction_delay_secs)
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}
