//! Single-writer lead store
//!
//! [`IncrementalStore`] is a cheap, cloneable handle. All file access happens
//! on one writer task that receives commands over a channel, so appends from
//! parallel workers are serialized without any shared lock. Each command is
//! acknowledged once the writer has completed it.

use crate::output::csv::{read_leads, CsvLeadWriter};
use crate::output::{xlsx, OutputError, OutputPaths, OutputResult};
use crate::LeadRecord;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 256;

/// Aggregate view of everything in the store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStatistics {
    /// Records in the store
    pub total_records: usize,
    /// Distinct non-empty place ids
    pub unique_place_ids: usize,
    /// Distinct names (case-insensitive)
    pub unique_names: usize,
    /// Records with a phone number
    pub with_phone: usize,
    /// Records with a website
    pub with_website: usize,
    /// Records with a rating
    pub with_rating: usize,
    /// Mean of the present ratings
    pub average_rating: Option<f64>,
    /// Record count per primary type
    pub type_distribution: BTreeMap<String, usize>,
}

impl StoreStatistics {
    /// Compute statistics over `records`
    pub fn compute(records: &[LeadRecord]) -> Self {
        let mut place_ids = HashSet::new();
        let mut names = HashSet::new();
        let mut stats = StoreStatistics {
            total_records: records.len(),
            ..Default::default()
        };
        let mut rating_sum = 0.0;

        for record in records {
            if let Some(id) = record.place_id.as_deref().filter(|id| !id.is_empty()) {
                place_ids.insert(id);
            }
            names.insert(record.name.to_lowercase());
            if record.phone.is_some() {
                stats.with_phone += 1;
            }
            if record.website.is_some() {
                stats.with_website += 1;
            }
            if let Some(rating) = record.rating {
                stats.with_rating += 1;
                rating_sum += rating;
            }
            *stats
                .type_distribution
                .entry(record.primary_type.clone())
                .or_default() += 1;
        }

        stats.unique_place_ids = place_ids.len();
        stats.unique_names = names.len();
        if stats.with_rating > 0 {
            stats.average_rating = Some(rating_sum / stats.with_rating as f64);
        }
        stats
    }
}

enum Command {
    Append(Box<LeadRecord>, oneshot::Sender<OutputResult<()>>),
    Flush(oneshot::Sender<OutputResult<()>>),
    ExportXlsx(oneshot::Sender<OutputResult<usize>>),
    Stats(oneshot::Sender<StoreStatistics>),
    Records(oneshot::Sender<Vec<LeadRecord>>),
    Close(oneshot::Sender<OutputResult<()>>),
}

/// Handle to the lead store's writer task.
#[derive(Debug, Clone)]
pub struct IncrementalStore {
    tx: mpsc::Sender<Command>,
    paths: OutputPaths,
}

impl IncrementalStore {
    /// Open the store, reloading any records already in the CSV file.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(paths: OutputPaths) -> OutputResult<Self> {
        // Opening the writer truncates any partial trailing row, so it must
        // happen before the existing rows are loaded.
        let writer = CsvLeadWriter::open(&paths.csv)?;
        let loaded = read_leads(&paths.csv)?;
        if loaded.skipped > 0 {
            warn!(
                path = %paths.csv.display(),
                skipped = loaded.skipped,
                "Some existing rows could not be parsed and were skipped"
            );
        }
        info!(
            path = %paths.csv.display(),
            existing = loaded.records.len(),
            "Lead store opened"
        );

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let worker = StoreWorker {
            writer: Some(writer),
            records: loaded.records,
            paths: paths.clone(),
        };
        tokio::spawn(worker.run(rx));

        Ok(Self { tx, paths })
    }

    /// Paths this store writes to
    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Append one record; durable in the CSV once this returns
    pub async fn append(&self, record: LeadRecord) -> OutputResult<()> {
        self.request(|ack| Command::Append(Box::new(record), ack))
            .await?
    }

    /// Flush the CSV writer
    pub async fn flush(&self) -> OutputResult<()> {
        self.request(Command::Flush).await?
    }

    /// Regenerate the spreadsheet from all records; returns the row count
    pub async fn export_xlsx(&self) -> OutputResult<usize> {
        self.request(Command::ExportXlsx).await?
    }

    /// Aggregate statistics over all records
    pub async fn stats(&self) -> OutputResult<StoreStatistics> {
        self.request(Command::Stats).await
    }

    /// Copy of every record, in append order
    pub async fn records(&self) -> OutputResult<Vec<LeadRecord>> {
        self.request(Command::Records).await
    }

    /// Flush, sync and stop the writer task. Later calls fail with
    /// [`OutputError::StoreClosed`].
    pub async fn close(&self) -> OutputResult<()> {
        self.request(Command::Close).await?
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> OutputResult<T> {
        let (ack, reply) = oneshot::channel();
        self.tx
            .send(command(ack))
            .await
            .map_err(|_| OutputError::StoreClosed)?;
        reply.await.map_err(|_| OutputError::StoreClosed)
    }
}

struct StoreWorker {
    writer: Option<CsvLeadWriter>,
    records: Vec<LeadRecord>,
    paths: OutputPaths,
}

impl StoreWorker {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Append(record, ack) => {
                    let _ = ack.send(self.append(*record));
                }
                Command::Flush(ack) => {
                    let _ = ack.send(self.flush());
                }
                Command::ExportXlsx(ack) => {
                    let _ = ack.send(self.export().await);
                }
                Command::Stats(ack) => {
                    let _ = ack.send(StoreStatistics::compute(&self.records));
                }
                Command::Records(ack) => {
                    let _ = ack.send(self.records.clone());
                }
                Command::Close(ack) => {
                    let _ = ack.send(self.close());
                    break;
                }
            }
        }

        // every handle dropped without an explicit close
        if self.writer.is_some() {
            if let Err(e) = self.close() {
                error!(error = %e, "Failed to close lead store");
            }
        }
        debug!("Lead store writer stopped");
    }

    fn append(&mut self, record: LeadRecord) -> OutputResult<()> {
        let writer = self.writer.as_mut().ok_or(OutputError::StoreClosed)?;
        writer.append(&record)?;
        self.records.push(record);
        Ok(())
    }

    fn flush(&mut self) -> OutputResult<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Err(OutputError::StoreClosed),
        }
    }

    async fn export(&self) -> OutputResult<usize> {
        let records = self.records.clone();
        let path = self.paths.xlsx.clone();
        tokio::task::spawn_blocking(move || xlsx::export(&records, path))
            .await
            .map_err(|e| OutputError::XlsxError(format!("export task failed: {e}")))?
    }

    fn close(&mut self) -> OutputResult<()> {
        match self.writer.take() {
            Some(writer) => writer.close(),
            None => Ok(()),
        }
    }
}
