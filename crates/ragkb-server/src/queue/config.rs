//! Queue configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::env_parse;

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 5;
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_LEASE_SECS: u64 = 60;
pub const DEFAULT_HEARTBEAT_SECS: u64 = 15;
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Broker address. `None` shares the application database.
    pub database_url: Option<String>,
    pub queue_name: String,
    pub max_attempts: i32,
    pub backoff_base_secs: u64,
    pub backoff_max_secs: u64,
    pub poll_interval_ms: u64,
    pub lease_secs: u64,
    pub heartbeat_secs: u64,
    pub reap_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            queue_name: super::DEFAULT_QUEUE.to_string(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            lease_secs: DEFAULT_LEASE_SECS,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            reap_interval_secs: DEFAULT_REAP_INTERVAL_SECS,
        }
    }
}

impl QueueConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            database_url: std::env::var("QUEUE_DATABASE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            queue_name: std::env::var("QUEUE_NAME").unwrap_or(defaults.queue_name),
            max_attempts: env_parse("QUEUE_MAX_ATTEMPTS", defaults.max_attempts),
            backoff_base_secs: env_parse("QUEUE_BACKOFF_BASE_SECS", defaults.backoff_base_secs),
            backoff_max_secs: env_parse("QUEUE_BACKOFF_MAX_SECS", defaults.backoff_max_secs),
            poll_interval_ms: env_parse("QUEUE_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            lease_secs: env_parse("QUEUE_LEASE_SECS", defaults.lease_secs),
            heartbeat_secs: env_parse("QUEUE_HEARTBEAT_SECS", defaults.heartbeat_secs),
            reap_interval_secs: env_parse("QUEUE_REAP_INTERVAL_SECS", defaults.reap_interval_secs),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue_name.trim().is_empty() {
            anyhow::bail!("QUEUE_NAME cannot be empty");
        }
        if self.max_attempts < 1 {
            anyhow::bail!("QUEUE_MAX_ATTEMPTS must be at least 1");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("QUEUE_POLL_INTERVAL_MS must be greater than 0");
        }
        if self.heartbeat_secs == 0 || self.heartbeat_secs >= self.lease_secs {
            anyhow::bail!(
                "QUEUE_HEARTBEAT_SECS ({}) must be positive and shorter than QUEUE_LEASE_SECS ({})",
                self.heartbeat_secs,
                self.lease_secs
            );
        }
        if self.backoff_base_secs > self.backoff_max_secs {
            anyhow::bail!("QUEUE_BACKOFF_BASE_SECS cannot exceed QUEUE_BACKOFF_MAX_SECS");
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at the configured maximum.
    pub fn backoff(&self, attempt: i32) -> Duration {
        backoff_delay(
            Duration::from_secs(self.backoff_base_secs),
            Duration::from_secs(self.backoff_max_secs),
            attempt,
        )
    }
}

pub fn backoff_delay(base: Duration, max: Duration, attempt: i32) -> Duration {
    let exponent = (attempt.max(1) - 1).min(30) as u32;
    base.saturating_mul(1u32 << exponent).min(max)
}
