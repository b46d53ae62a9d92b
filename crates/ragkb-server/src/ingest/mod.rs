//! Document ingestion
//!
//! The worker side of the upload hand-off: the [`IngestionPipeline`] job
//! handler, the per-file-type strategies it dispatches to, the derived-table
//! writer used for CSV, and the [`Reconciler`] that re-enqueues documents whose
//! job went missing.

pub mod config;
pub mod error;
pub mod identifiers;
pub mod jobs;
pub mod pipeline;
pub mod reconciler;
pub mod strategies;
pub mod tables;

pub use config::{IngestConfig, ReconcileConfig};
pub use error::IngestError;
pub use identifiers::{ColumnName, SafeIdent};
pub use jobs::IngestStats;
pub use pipeline::IngestionPipeline;
pub use reconciler::{Reconciler, SweepReport};
pub use strategies::{
    ExtractionStrategy, IngestionStrategy, StrategyRegistry, TabularStrategy, TextExtractor,
};
pub use tables::{LoadReport, PgTableStore, TableLoad, TableStore};
