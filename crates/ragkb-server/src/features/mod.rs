//! Feature slices
//!
//! Each feature is a vertical slice with `commands/` (writes), `queries/`
//! (reads) and a `routes.rs` wiring them to Axum handlers. Commands and queries
//! are plain data types marked as `mediator` requests, handled by standalone
//! async functions.
//!
//! - **documents**: upload into a knowledge base (the enqueue gateway) and
//!   status polling
//! - **jobs**: read-only inspection of the ingestion queue

pub mod documents;
pub mod jobs;

use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;

use crate::documents::DocumentRepository;
use crate::queue::JobQueue;
use crate::storage::ObjectStore;

/// Shared state for feature routes.
#[derive(Clone)]
pub struct FeatureState {
    pub db: PgPool,
    /// Pool holding the `ingest_jobs` table; the same as `db` unless the queue
    /// lives in its own database.
    pub queue_db: PgPool,
    pub documents: Arc<dyn DocumentRepository>,
    pub store: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn JobQueue>,
    pub bucket: String,
    pub queue_name: String,
    pub max_attempts: i32,
}

/// Feature routes, mounted under `/api/v1`.
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .merge(documents::documents_routes().with_state(state.clone()))
        .nest("/jobs", jobs::jobs_routes().with_state(state.queue_db.clone()))
}
