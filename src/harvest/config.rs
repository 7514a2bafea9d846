//! Harvest configuration and retry constants

use crate::output::OutputPaths;
use std::path::PathBuf;
use std::time::Duration;

/// Maximum number of retries for a transient provider failure.
pub const MAX_RETRIES: u32 = 5;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000;

/// Default output directory
pub const DEFAULT_OUTPUT_DIR: &str = "output";
/// Default CSV file name inside the output directory
pub const DEFAULT_CSV_FILE: &str = "leads.csv";
/// Default XLSX file name inside the output directory
pub const DEFAULT_XLSX_FILE: &str = "leads.xlsx";

/// Calculate exponential backoff delay
pub fn calculate_backoff(retry_count: u32) -> Duration {
    let delay_ms = INITIAL_BACKOFF_MS.saturating_mul(2u64.saturating_pow(retry_count));
    let delay_ms = delay_ms.min(MAX_BACKOFF_MS);
    Duration::from_millis(delay_ms)
}

/// Tunables for one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Lower bound of the jitter slept after each rate-limit slot
    pub min_delay: Duration,
    /// Upper bound of the jitter slept after each rate-limit slot
    pub max_delay: Duration,
    /// Provider calls allowed in any rolling 60-second window
    pub max_requests_per_minute: u32,
    /// Search radius around the postal code centroid, in metres
    pub radius_m: u32,
    /// Results kept per postal code
    pub max_results_per_location: usize,
    /// Directory holding the CSV and XLSX files
    pub output_dir: PathBuf,
    /// CSV file name
    pub csv_file: String,
    /// XLSX file name
    pub xlsx_file: String,
    /// Retries per provider call before giving up
    pub max_retries: u32,
    /// Run postal codes through a worker pool
    pub parallel: bool,
    /// Worker pool size in parallel mode
    pub workers: usize,
    /// Enrich each search result with a details lookup
    pub detailed: bool,
    /// Regenerate the XLSX every N completed postal codes (0 disables)
    pub xlsx_refresh_every: usize,
    /// Consecutive geocode failures after which the run is aborted
    pub max_consecutive_geocode_failures: u32,
    /// Timeout for a single provider HTTP request
    pub request_timeout: Duration,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
            max_requests_per_minute: 100,
            radius_m: 5000,
            max_results_per_location: 60,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            csv_file: DEFAULT_CSV_FILE.to_string(),
            xlsx_file: DEFAULT_XLSX_FILE.to_string(),
            max_retries: MAX_RETRIES,
            parallel: false,
            workers: 3,
            detailed: true,
            xlsx_refresh_every: 10,
            max_consecutive_geocode_failures: 5,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl HarvestConfig {
    /// Check the configuration for values the pipeline cannot run with.
    ///
    /// # Errors
    /// Returns [`ConfigError`] naming the offending setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_delay > self.max_delay {
            return Err(ConfigError::InvertedDelay {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        if self.max_requests_per_minute == 0 {
            return Err(ConfigError::Zero("max_requests_per_minute"));
        }
        if self.max_results_per_location == 0 {
            return Err(ConfigError::Zero("max_results_per_location"));
        }
        if self.radius_m == 0 {
            return Err(ConfigError::Zero("radius_m"));
        }
        if self.parallel && self.workers == 0 {
            return Err(ConfigError::Zero("workers"));
        }
        if self.max_consecutive_geocode_failures == 0 {
            return Err(ConfigError::Zero("max_consecutive_geocode_failures"));
        }
        if self.csv_file.trim().is_empty() || self.xlsx_file.trim().is_empty() {
            return Err(ConfigError::EmptyFileName);
        }
        Ok(())
    }

    /// Resolved CSV and XLSX paths
    pub fn output_paths(&self) -> OutputPaths {
        OutputPaths {
            csv: self.output_dir.join(&self.csv_file),
            xlsx: self.output_dir.join(&self.xlsx_file),
        }
    }
}

/// Invalid configuration values
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Jitter lower bound above upper bound
    #[error("min delay {min:?} exceeds max delay {max:?}")]
    InvertedDelay {
        /// Configured lower bound
        min: Duration,
        /// Configured upper bound
        max: Duration,
    },

    /// A budget or size that must be positive is zero
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Output file name empty
    #[error("output file names must not be empty")]
    EmptyFileName,
}
