//! Jobs feature module
//!
//! Read-only inspection of the ingestion queue, dead-lettered jobs included.
//! Jobs cannot be created or retried through these routes.

pub mod queries;
pub mod routes;

pub use routes::jobs_routes;
