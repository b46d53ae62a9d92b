//! RAGKB Server Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Knowledge-base backend: document upload API plus the asynchronous ingestion
//! pipeline that turns uploaded objects into queryable artifacts.
//!
//! # Overview
//!
//! Two processes share this library:
//!
//! - **API** (`ragkb-server`): accepts uploads, stores the object, records a
//!   `documents` row and enqueues an ingestion job
//! - **Worker** (`ragkb-worker`): a bounded pool that dequeues jobs, dispatches
//!   them to a per-file-type strategy and settles the document status
//!
//! ## Delivery model
//!
//! The queue is Postgres-backed (`ingest_jobs`) with at-least-once delivery.
//! Handlers are idempotent: tabular loads replace the table contents inside a
//! single transaction, so a redelivered job never duplicates rows.
//!
//! ## Framework Stack
//!
//! - **Axum** for the HTTP surface
//! - **SQLx** for Postgres (documents, queue, derived tables)
//! - **aws-sdk-s3** for S3-compatible object storage, or the local filesystem
//!
//! # Example
//!
//! ```no_run
//! use ragkb_server::{config::Config, db, storage::{self, StorageConfig}};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let pool = db::create_pool(&config.database).await?;
//!     let store = storage::from_config(&StorageConfig::from_env()?).await?;
//!     store.ensure_bucket("documents").await?;
//!     db::health_check(&pool).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod queue;
pub mod shutdown;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use error::AppError;
