//! Append-only CSV lead file
//!
//! Every appended record is flushed to the file before `append` returns, so
//! an interrupted run loses at most the record being written. Reopening an
//! existing file truncates a trailing partial row and keeps appending under
//! the original header.

use crate::LeadRecord;
use chrono::NaiveDateTime;
use csv::{Reader, Writer, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, info, warn};

use super::{OutputError, OutputResult};

/// Column order of the CSV file
pub const COLUMNS: [&str; 16] = [
    "name",
    "address",
    "phone",
    "website",
    "rating",
    "review_count",
    "business_status",
    "primary_type",
    "all_types",
    "opening_hours",
    "latitude",
    "longitude",
    "place_id",
    "search_query",
    "search_location",
    "scraped_at",
];

/// Timestamp format of the `scraped_at` column (UTC)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const TYPES_SEPARATOR: &str = ", ";
const HOURS_SEPARATOR: &str = "; ";

/// One CSV row, field order matching [`COLUMNS`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LeadRow {
    pub name: String,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub business_status: Option<String>,
    pub primary_type: String,
    pub all_types: String,
    pub opening_hours: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub place_id: Option<String>,
    pub search_query: String,
    pub search_location: String,
    pub scraped_at: String,
}

impl From<&LeadRecord> for LeadRow {
    fn from(lead: &LeadRecord) -> Self {
        Self {
            name: lead.name.clone(),
            address: lead.address.clone(),
            phone: lead.phone.clone(),
            website: lead.website.clone(),
            rating: lead.rating,
            review_count: lead.review_count,
            business_status: lead.business_status.clone(),
            primary_type: lead.primary_type.clone(),
            all_types: lead.all_types.join(TYPES_SEPARATOR),
            opening_hours: lead.opening_hours.join(HOURS_SEPARATOR),
            latitude: lead.latitude,
            longitude: lead.longitude,
            place_id: lead.place_id.clone(),
            search_query: lead.search_query.clone(),
            search_location: lead.search_location.clone(),
            scraped_at: lead.scraped_at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

impl TryFrom<LeadRow> for LeadRecord {
    type Error = OutputError;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        let scraped_at = NaiveDateTime::parse_from_str(&row.scraped_at, TIMESTAMP_FORMAT)
            .map_err(|e| {
                OutputError::CsvError(format!("invalid scraped_at '{}': {}", row.scraped_at, e))
            })?
            .and_utc();
        Ok(LeadRecord {
            name: row.name,
            address: row.address,
            phone: row.phone,
            website: row.website,
            rating: row.rating,
            review_count: row.review_count,
            business_status: row.business_status,
            primary_type: row.primary_type,
            all_types: split_list(&row.all_types, TYPES_SEPARATOR),
            opening_hours: split_list(&row.opening_hours, HOURS_SEPARATOR),
            latitude: row.latitude,
            longitude: row.longitude,
            place_id: row.place_id,
            search_query: row.search_query,
            search_location: row.search_location,
            scraped_at,
        })
    }
}

fn split_list(joined: &str, separator: &str) -> Vec<String> {
    joined
        .split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Append-only CSV writer for leads.
pub struct CsvLeadWriter {
    writer: Writer<File>,
    records_written: u64,
}

impl CsvLeadWriter {
    /// Open `path` for appending, creating it (with header) if needed.
    ///
    /// A trailing partial row from an interrupted run is removed first.
    pub fn open<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        let path = path.as_ref();
        info!("Opening CSV lead file: path={}", path.display());

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| OutputError::IoError(format!("Failed to create directory: {}", e)))?;
        }

        let repaired = repair_trailing_partial_row(path)?;
        if repaired > 0 {
            warn!(
                path = %path.display(),
                bytes_removed = repaired,
                "Truncated partial trailing row left by an interrupted run"
            );
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open file: {}", e)))?;
        let is_empty = file
            .metadata()
            .map_err(|e| OutputError::IoError(format!("Failed to stat file: {}", e)))?
            .len()
            == 0;

        let mut writer = WriterBuilder::new().has_headers(false).from_writer(file);
        if is_empty {
            writer
                .write_record(COLUMNS)
                .map_err(|e| OutputError::CsvError(format!("Failed to write header: {}", e)))?;
            writer
                .flush()
                .map_err(|e| OutputError::IoError(format!("Failed to flush header: {}", e)))?;
            debug!("Wrote CSV header to new file");
        }

        Ok(Self {
            writer,
            records_written: 0,
        })
    }

    /// Write one lead and flush it to the file
    pub fn append(&mut self, lead: &LeadRecord) -> OutputResult<()> {
        self.writer
            .serialize(LeadRow::from(lead))
            .map_err(|e| OutputError::CsvError(format!("Failed to write lead: {}", e)))?;
        self.flush()?;
        self.records_written += 1;
        Ok(())
    }

    /// Flush buffered bytes to the file
    pub fn flush(&mut self) -> OutputResult<()> {
        self.writer
            .flush()
            .map_err(|e| OutputError::IoError(format!("Failed to flush: {}", e)))
    }

    /// Records appended through this writer
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush, sync to disk and close
    pub fn close(mut self) -> OutputResult<()> {
        self.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| OutputError::IoError(format!("Failed to get file handle: {}", e)))?;
        file.sync_all()
            .map_err(|e| OutputError::IoError(format!("Failed to sync file: {}", e)))?;
        info!(
            "CSV lead file closed: {} records written this session",
            self.records_written
        );
        Ok(())
    }
}

/// Truncate anything after the last newline. Returns the bytes removed.
pub fn repair_trailing_partial_row<P: AsRef<Path>>(path: P) -> OutputResult<u64> {
    let path = path.as_ref();
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(OutputError::IoError(format!("Failed to open file: {}", e))),
    };

    let len = file
        .metadata()
        .map_err(|e| OutputError::IoError(format!("Failed to stat file: {}", e)))?
        .len();
    if len == 0 {
        return Ok(0);
    }

    let mut last = [0u8; 1];
    file.seek(SeekFrom::End(-1))
        .and_then(|_| file.read_exact(&mut last))
        .map_err(|e| OutputError::IoError(format!("Failed to read file tail: {}", e)))?;
    if last[0] == b'\n' {
        return Ok(0);
    }

    let mut contents = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.read_to_end(&mut contents))
        .map_err(|e| OutputError::IoError(format!("Failed to read file: {}", e)))?;
    let keep = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|i| i as u64 + 1)
        .unwrap_or(0);

    file.set_len(keep)
        .map_err(|e| OutputError::IoError(format!("Failed to truncate file: {}", e)))?;
    Ok(len - keep)
}

/// Leads loaded from an existing CSV file
#[derive(Debug, Default)]
pub struct LoadedLeads {
    /// Rows that parsed into leads, in file order
    pub records: Vec<LeadRecord>,
    /// Rows skipped as malformed
    pub skipped: usize,
}

/// Read every well-formed lead from `path`. A missing file yields no leads.
pub fn read_leads<P: AsRef<Path>>(path: P) -> OutputResult<LoadedLeads> {
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(LoadedLeads::default()),
        Err(e) => return Err(OutputError::IoError(format!("Failed to open file: {}", e))),
    };

    let mut reader = Reader::from_reader(file);
    let mut loaded = LoadedLeads::default();
    for (index, row) in reader.deserialize::<LeadRow>().enumerate() {
        let parsed = row
            .map_err(|e| OutputError::CsvError(e.to_string()))
            .and_then(LeadRecord::try_from);
        match parsed {
            Ok(lead) => loaded.records.push(lead),
            Err(e) => {
                loaded.skipped += 1;
                warn!(path = %path.display(), row = index + 2, error = %e, "Skipping malformed CSV row");
            }
        }
    }

    debug!(
        path = %path.display(),
        records = loaded.records.len(),
        skipped = loaded.skipped,
        "Loaded existing leads"
    );
    Ok(loaded)
}
