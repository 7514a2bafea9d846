//! Persistent lead output

use std::path::PathBuf;

pub mod csv;
pub mod store;
pub mod xlsx;

pub use store::{IncrementalStore, StoreStatistics};

/// Output errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV read/write error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Spreadsheet generation error
    #[error("XLSX error: {0}")]
    XlsxError(String),

    /// The store's writer task has shut down
    #[error("store is closed")]
    StoreClosed,
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Locations of the CSV file and its XLSX mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Append-only CSV file
    pub csv: PathBuf,
    /// Spreadsheet regenerated from the CSV records
    pub xlsx: PathBuf,
}

impl OutputPaths {
    /// Paths for `csv_file` and `xlsx_file` inside `dir`
    pub fn in_dir(dir: impl Into<PathBuf>, csv_file: &str, xlsx_file: &str) -> Self {
        let dir = dir.into();
        Self {
            csv: dir.join(csv_file),
            xlsx: dir.join(xlsx_file),
        }
    }
}
