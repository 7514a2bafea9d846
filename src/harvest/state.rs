//! Run counters

use crate::harvest::task::RunStatus;
use serde::Serialize;
use std::time::Duration;

/// Counters for one run.
///
/// Owned and mutated by the pipeline; everyone else reads copies.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionState {
    /// Current run state
    pub status: RunStatus,
    /// Postal codes in the run's sequence
    pub postal_codes_total: usize,
    /// Postal codes that reached a terminal state
    pub postal_codes_processed: usize,
    /// Postal codes that ended `FAILED`
    pub postal_codes_failed: usize,
    /// Raw records returned by searches
    pub records_found: u64,
    /// Records appended to the store
    pub records_kept: u64,
    /// Records dropped as duplicates
    pub records_duplicate: u64,
    /// Records dropped by validation
    pub records_rejected: u64,
    /// Search calls issued, retries included
    pub search_calls: u64,
    /// Details calls issued, retries included
    pub detail_calls: u64,
    /// Retries after transient or quota failures
    pub retries: u64,
    /// Wall time since the run started
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Postal code most recently started
    pub current_postal_code: Option<String>,
}

impl IngestionState {
    /// Fresh state for a run over `postal_codes_total` codes
    pub fn new(postal_codes_total: usize) -> Self {
        Self {
            status: RunStatus::Running,
            postal_codes_total,
            postal_codes_processed: 0,
            postal_codes_failed: 0,
            records_found: 0,
            records_kept: 0,
            records_duplicate: 0,
            records_rejected: 0,
            search_calls: 0,
            detail_calls: 0,
            retries: 0,
            elapsed: Duration::ZERO,
            current_postal_code: None,
        }
    }

    /// Total provider calls
    pub fn api_calls(&self) -> u64 {
        self.search_calls + self.detail_calls
    }

    /// Share of postal codes processed, 0-100
    pub fn percent_complete(&self) -> f64 {
        if self.postal_codes_total == 0 {
            return 100.0;
        }
        self.postal_codes_processed as f64 / self.postal_codes_total as f64 * 100.0
    }
}

impl Default for IngestionState {
    fn default() -> Self {
        Self::new(0)
    }
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
