//! Per-job ingestion statistics

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics collected while ingesting one document
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct IngestStats {
    /// Rows read from the source
    pub rows_total: u64,
    /// Rows written to the derived table
    pub rows_inserted: u64,
    /// Rows skipped because their insert failed
    pub rows_failed: u64,
    /// Size of the source object
    pub bytes_processed: u64,
    pub duration_secs: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestStats {
    pub fn new() -> Self {
        Self {
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
        if let (Some(start), Some(end)) = (self.started_at, self.completed_at) {
            self.duration_secs = (end - start).num_milliseconds() as f64 / 1000.0;
        }
    }

    pub fn record_load(&mut self, inserted: u64, failed: u64) {
        self.rows_inserted += inserted;
        self.rows_failed += failed;
        self.rows_total += inserted + failed;
    }

    /// Fraction of rows that were inserted, 1.0 when there were none.
    pub fn success_rate(&self) -> f64 {
        if self.rows_total == 0 {
            1.0
        } else {
            self.rows_inserted as f64 / self.rows_total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_load() {
        let mut stats = IngestStats::new();
        stats.record_load(8, 2);
        stats.record_load(0, 0);
        assert_eq!(stats.rows_total, 10);
        assert_eq!(stats.rows_failed, 2);
        assert!((stats.success_rate() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_complete_sets_duration() {
        let mut stats = IngestStats::new();
        stats.complete();
        assert!(stats.completed_at.is_some());
        assert!(stats.duration_secs >= 0.0);
    }

    #[test]
    fn test_empty_success_rate() {
        assert_eq!(IngestStats::default().success_rate(), 1.0);
    }
}
