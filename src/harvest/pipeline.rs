//! Ingestion pipeline
//!
//! For every postal code in the run's sequence the pipeline builds the
//! search query, calls the provider through the shared rate limiter (with
//! bounded exponential backoff on transient and quota failures), optionally
//! enriches each result with a details lookup, validates, deduplicates and
//! appends the survivors to the store.
//!
//! A failed postal code is logged and skipped. Only an authentication
//! failure, a run of consecutive geocode failures or a store failure ends the
//! run early; in every case the store is flushed and the spreadsheet
//! refreshed before returning.

use crate::dedup::{DedupOutcome, Deduplicator};
use crate::harvest::config::{ConfigError, HarvestConfig};
use crate::harvest::progress::{format_progress, ProgressState};
use crate::harvest::rate_limit::{backoff_delay, RateLimiter};
use crate::harvest::state::IngestionState;
use crate::harvest::task::{CodeStatus, RunStatus, SearchTask, TEMPLATE_PLACEHOLDER};
use crate::metrics::{self, ProviderCallMetrics};
use crate::output::{IncrementalStore, OutputError, StoreStatistics};
use crate::postal::{self, PostalCode, PostalCodeError};
use crate::provider::{PlacesProvider, ProviderError, ProviderResult};
use crate::shutdown::SharedShutdown;
use crate::validator::RecordValidator;
use crate::RawPlaceRecord;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Errors that end a run
#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    /// Query template has no `{}` placeholder
    #[error("query template must contain a '{{}}' placeholder for the postal code: '{0}'")]
    InvalidTemplate(String),

    /// Start postal code not recognised
    #[error(transparent)]
    PostalCode(#[from] PostalCodeError),

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Store could not be opened, written or flushed
    #[error("output error: {0}")]
    Output(#[from] OutputError),

    /// Provider rejected the credentials
    #[error("provider rejected credentials: {0}")]
    Auth(String),

    /// Too many postal codes in a row could not be geocoded
    #[error("{failures} consecutive geocode failures (last: {postal_code})")]
    GeocodeFailures {
        /// Consecutive failures observed
        failures: u32,
        /// Postal code of the last failure
        postal_code: String,
    },
}

/// What to harvest
#[derive(Debug, Clone)]
pub struct HarvestRequest {
    /// Query with a `{}` placeholder for the postal code
    pub query_template: String,
    /// First postal code of the sequence
    pub start_postal: String,
    /// Number of postal codes to visit
    pub count: usize,
}

impl HarvestRequest {
    /// Create a request
    pub fn new(query_template: impl Into<String>, start_postal: impl Into<String>, count: usize) -> Self {
        Self {
            query_template: query_template.into(),
            start_postal: start_postal.into(),
            count,
        }
    }
}

/// Outcome of a run that was not aborted
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Final counters
    pub state: IngestionState,
    /// Statistics over the whole store, earlier runs included
    pub store: StoreStatistics,
    /// Postal codes that ended `FAILED`
    pub failed_codes: Vec<String>,
}

type Observer = Arc<dyn Fn(&IngestionState) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
enum Operation {
    Search,
    Details,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Search => "search",
            Operation::Details => "details",
        }
    }
}

enum CallError {
    /// Non-retryable, or retries exhausted
    Provider(ProviderError),
    /// Shutdown requested while backing off
    Cancelled(ProviderError),
    /// Run already aborted by another worker
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeOutcome {
    Done,
    Failed,
    Interrupted,
}

#[derive(Default)]
struct RunControl {
    fatal: Mutex<Option<IngestionError>>,
    geocode_failures: AtomicU32,
    failed_codes: Mutex<Vec<String>>,
}

impl RunControl {
    fn halt(&self, err: IngestionError) {
        let mut fatal = self.fatal.lock();
        if fatal.is_none() {
            error!(error = %err, "Run-fatal error, stopping");
            *fatal = Some(err);
        }
    }

    fn is_halted(&self) -> bool {
        self.fatal.lock().is_some()
    }
}

struct CodeTracker {
    status: CodeStatus,
}

impl CodeTracker {
    fn new() -> Self {
        Self {
            status: CodeStatus::Pending,
        }
    }

    fn advance(&mut self, next: CodeStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal transition {} -> {}",
            self.status,
            next
        );
        trace!(from = %self.status, to = %next, "Postal code state");
        self.status = next;
    }
}

/// Orchestrates one or more harvest runs over a shared store.
pub struct IngestionPipeline {
    provider: Arc<dyn PlacesProvider>,
    config: HarvestConfig,
    limiter: RateLimiter,
    validator: RecordValidator,
    dedup: Deduplicator,
    store: IncrementalStore,
    shutdown: SharedShutdown,
    state: Mutex<IngestionState>,
    started: Mutex<Option<Instant>>,
    progress: Mutex<ProgressState>,
    observer: Option<Observer>,
}

impl IngestionPipeline {
    /// Validate `config`, open the store and seed deduplication from it.
    pub async fn open(
        provider: Arc<dyn PlacesProvider>,
        config: HarvestConfig,
        shutdown: SharedShutdown,
    ) -> Result<Self, IngestionError> {
        config.validate()?;
        let store = IncrementalStore::open(config.output_paths()).await?;
        let existing = store.records().await?;
        let dedup = Deduplicator::seeded(&existing);
        if !existing.is_empty() {
            info!(
                existing = existing.len(),
                place_ids = dedup.place_id_count(),
                "Resuming with existing leads"
            );
        }

        Ok(Self {
            provider,
            limiter: RateLimiter::from_config(&config),
            validator: RecordValidator::new(),
            dedup,
            store,
            shutdown,
            state: Mutex::new(IngestionState::default()),
            started: Mutex::new(None),
            progress: Mutex::new(ProgressState::default()),
            observer: None,
            config,
        })
    }

    /// Call `observer` with a snapshot after every postal code and at the end of a run
    pub fn with_observer(mut self, observer: impl Fn(&IngestionState) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Replace the record validator
    pub fn with_validator(mut self, validator: RecordValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Copy of the current run counters
    pub fn snapshot(&self) -> IngestionState {
        let mut state = self.state.lock().clone();
        if let Some(started) = *self.started.lock() {
            state.elapsed = started.elapsed();
        }
        state
    }

    /// The store this pipeline writes to
    pub fn store(&self) -> &IncrementalStore {
        &self.store
    }

    /// Run configuration
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Flush and close the store
    pub async fn close(self) -> Result<(), IngestionError> {
        self.store.close().await?;
        Ok(())
    }

    /// Harvest every postal code of `request`.
    ///
    /// # Errors
    /// Startup errors (template, postal code) are returned before any
    /// provider call. Run-fatal errors are returned after the store has been
    /// flushed; [`Self::snapshot`] then reports `FAILED`.
    pub async fn run(&self, request: HarvestRequest) -> Result<RunReport, IngestionError> {
        if !request.query_template.contains(TEMPLATE_PLACEHOLDER) {
            return Err(IngestionError::InvalidTemplate(request.query_template));
        }
        let start = PostalCode::parse(&request.start_postal)?;
        let tasks: Vec<SearchTask> = postal::generate(&start, request.count)
            .into_iter()
            .map(|code| SearchTask::new(request.query_template.clone(), code))
            .collect();

        *self.state.lock() = IngestionState::new(tasks.len());
        *self.started.lock() = Some(Instant::now());
        *self.progress.lock() = ProgressState::default();

        let span = info_span!(
            "harvest",
            query = %request.query_template,
            start = %start,
            region = %start.region(),
            codes = tasks.len(),
        );
        self.execute(tasks).instrument(span).await
    }

    async fn execute(&self, tasks: Vec<SearchTask>) -> Result<RunReport, IngestionError> {
        let parallel = self.config.parallel && self.config.workers > 1;
        info!(
            provider = self.provider.name(),
            mode = if parallel { "parallel" } else { "sequential" },
            workers = if parallel { self.config.workers } else { 1 },
            detailed = self.config.detailed,
            "Starting harvest"
        );

        let control = RunControl::default();
        if parallel {
            self.run_pool(tasks, &control).await;
        } else {
            self.run_sequential(tasks, &control).await;
        }

        let finished = self.finish().await;
        let RunControl {
            fatal, failed_codes, ..
        } = control;
        let fatal = fatal.into_inner();

        let snapshot = self.snapshot();
        let status = if fatal.is_some() || finished.is_err() {
            RunStatus::Failed
        } else if snapshot.postal_codes_processed < snapshot.postal_codes_total
            && self.shutdown.is_shutdown_requested()
        {
            RunStatus::Stopped
        } else {
            RunStatus::Completed
        };
        self.update_state(|s| {
            s.status = status;
            s.current_postal_code = None;
        });

        let state = self.snapshot();
        self.notify_observer(&state);
        info!(
            status = %status,
            processed = state.postal_codes_processed,
            failed = state.postal_codes_failed,
            kept = state.records_kept,
            duplicate = state.records_duplicate,
            rejected = state.records_rejected,
            api_calls = state.api_calls(),
            elapsed_secs = state.elapsed.as_secs(),
            "Harvest finished"
        );

        if let Some(err) = fatal {
            return Err(err);
        }
        finished?;

        Ok(RunReport {
            state,
            store: self.store.stats().await?,
            failed_codes: failed_codes.into_inner(),
        })
    }

    async fn run_sequential(&self, tasks: Vec<SearchTask>, control: &RunControl) {
        for task in tasks {
            if self.should_stop(control) {
                break;
            }
            let span = info_span!("postal_code", postal_code = %task.postal_code());
            self.handle_task(&task, control).instrument(span).await;
        }
    }

    async fn run_pool(&self, tasks: Vec<SearchTask>, control: &RunControl) {
        let queue = Mutex::new(VecDeque::from(tasks));
        let workers = (0..self.config.workers).map(|worker_id| self.worker(worker_id, &queue, control));
        join_all(workers).await;
    }

    async fn worker(&self, worker_id: usize, queue: &Mutex<VecDeque<SearchTask>>, control: &RunControl) {
        loop {
            if self.should_stop(control) {
                break;
            }
            let next = queue.lock().pop_front();
            let Some(task) = next else {
                break;
            };
            let span = info_span!("postal_code", postal_code = %task.postal_code(), worker = worker_id);
            self.handle_task(&task, control).instrument(span).await;
        }
        debug!(worker_id = worker_id, "Worker finished");
    }

    async fn handle_task(&self, task: &SearchTask, control: &RunControl) {
        let outcome = self.process_code(task, control).await;

        let processed = match outcome {
            CodeOutcome::Done => {
                metrics::record_postal_code("done");
                self.update_state(|s| s.postal_codes_processed += 1)
            }
            CodeOutcome::Failed => {
                metrics::record_postal_code("failed");
                control.failed_codes.lock().push(task.postal_code().to_string());
                self.update_state(|s| {
                    s.postal_codes_processed += 1;
                    s.postal_codes_failed += 1;
                })
            }
            CodeOutcome::Interrupted => return,
        };

        let snapshot = self.snapshot();
        {
            let mut progress = self.progress.lock();
            if progress.should_emit_update(&snapshot) {
                info!("{}", format_progress(&snapshot));
                progress.mark_emitted(&snapshot);
            }
        }
        self.notify_observer(&snapshot);

        let every = self.config.xlsx_refresh_every;
        if every > 0 && processed % every == 0 && processed < snapshot.postal_codes_total {
            match self.store.export_xlsx().await {
                Ok(rows) => debug!(rows = rows, "Refreshed spreadsheet"),
                Err(e) => warn!(error = %e, "Periodic spreadsheet refresh failed"),
            }
        }
    }

    async fn process_code(&self, task: &SearchTask, control: &RunControl) -> CodeOutcome {
        let code = task.postal_code();
        let mut tracker = CodeTracker::new();
        self.update_state(|s| s.current_postal_code = Some(code.to_string()));

        info!(query = %task.query(), "Searching");
        tracker.advance(CodeStatus::Searching);
        let search = self
            .call_with_retry(Operation::Search, control, || {
                self.provider.search(task.query(), code, self.config.radius_m, &self.limiter)
            })
            .await;

        let mut results = match search {
            Ok(results) => {
                control.geocode_failures.store(0, Ordering::SeqCst);
                results
            }
            Err(CallError::Provider(err)) => {
                self.handle_search_failure(task, err, control);
                tracker.advance(CodeStatus::Failed);
                return CodeOutcome::Failed;
            }
            Err(CallError::Cancelled(_)) | Err(CallError::Halted) => {
                return CodeOutcome::Interrupted;
            }
        };

        results.truncate(self.config.max_results_per_location);
        let total = results.len();
        self.update_state(|s| s.records_found += total as u64);
        debug!(found = total, "Search returned results");

        for (index, raw) in results.into_iter().enumerate() {
            if self.should_stop(control) {
                info!(
                    handled = index,
                    skipped = total - index,
                    "Stopping before next record"
                );
                return CodeOutcome::Interrupted;
            }

            let raw = if self.config.detailed {
                tracker.advance(CodeStatus::Extracting);
                self.enrich(raw, control).await
            } else {
                raw
            };

            tracker.advance(CodeStatus::Validating);
            let lead = match self.validator.validate_with_reason(raw, task) {
                Ok(lead) => lead,
                Err(reason) => {
                    debug!(reason = %reason, "Record rejected");
                    metrics::record_lead("rejected", reason.as_str());
                    self.update_state(|s| s.records_rejected += 1);
                    continue;
                }
            };

            tracker.advance(CodeStatus::Deduping);
            match self.dedup.check_and_register(&lead) {
                DedupOutcome::New => {}
                duplicate => {
                    let reason = match duplicate {
                        DedupOutcome::DuplicatePlaceId => "place_id",
                        _ => "signature",
                    };
                    debug!(name = %lead.name, reason = reason, "Duplicate dropped");
                    metrics::record_lead("duplicate", reason);
                    self.update_state(|s| s.records_duplicate += 1);
                    continue;
                }
            }

            let name = lead.name.clone();
            if let Err(e) = self.store.append(lead).await {
                control.halt(IngestionError::Output(e));
                return CodeOutcome::Interrupted;
            }
            trace!(name = %name, "Lead stored");
            metrics::record_lead("stored", "new");
            self.update_state(|s| s.records_kept += 1);
        }

        tracker.advance(CodeStatus::Stored);
        tracker.advance(CodeStatus::Done);
        CodeOutcome::Done
    }

    /// Overlay a details lookup; any failure falls back to the search record
    async fn enrich(&self, raw: RawPlaceRecord, control: &RunControl) -> RawPlaceRecord {
        let Some(place_id) = raw.place_id.clone().filter(|id| !id.trim().is_empty()) else {
            return raw;
        };

        match self
            .call_with_retry(Operation::Details, control, || {
                self.provider.details(&place_id, &self.limiter)
            })
            .await
        {
            Ok(details) => raw.merge_details(details),
            Err(CallError::Provider(ProviderError::NotFound(_))) => {
                debug!(place_id = %place_id, "Details not found, keeping search result");
                raw
            }
            Err(CallError::Provider(err)) if err.is_run_fatal() => {
                control.halt(IngestionError::Auth(err.to_string()));
                raw
            }
            Err(CallError::Provider(err)) => {
                warn!(
                    place_id = %place_id,
                    error_kind = err.kind(),
                    error = %err,
                    "Details lookup failed, keeping search result"
                );
                raw
            }
            Err(CallError::Cancelled(_)) | Err(CallError::Halted) => raw,
        }
    }

    fn handle_search_failure(&self, task: &SearchTask, err: ProviderError, control: &RunControl) {
        match err {
            ProviderError::Auth(message) => {
                control.halt(IngestionError::Auth(message));
            }
            ProviderError::GeocodeFailure(_) => {
                let failures = control.geocode_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    query = %task.query(),
                    consecutive = failures,
                    error_kind = "geocode_failure",
                    "Could not geocode postal code, skipping"
                );
                if failures >= self.config.max_consecutive_geocode_failures {
                    control.halt(IngestionError::GeocodeFailures {
                        failures,
                        postal_code: task.postal_code().to_string(),
                    });
                }
            }
            other => {
                warn!(
                    query = %task.query(),
                    error_kind = other.kind(),
                    error = %other,
                    "Postal code failed, skipping"
                );
            }
        }
    }

    /// One provider call, retried with backoff on transient failures up to
    /// `max_retries` times. The provider passes each of its HTTP requests
    /// through the shared rate limiter.
    async fn call_with_retry<T, F, Fut>(
        &self,
        operation: Operation,
        control: &RunControl,
        mut call: F,
    ) -> Result<T, CallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            if control.is_halted() {
                return Err(CallError::Halted);
            }
            self.update_state(|s| match operation {
                Operation::Search => s.search_calls += 1,
                Operation::Details => s.detail_calls += 1,
            });

            let call_metrics = ProviderCallMetrics::start(operation.as_str(), attempt);
            let err = match call().await {
                Ok(value) => {
                    call_metrics.record_success();
                    return Ok(value);
                }
                Err(err) => err,
            };
            call_metrics.record_failure(err.kind());

            if !err.is_transient() || attempt >= self.config.max_retries {
                return Err(CallError::Provider(err));
            }

            let delay = backoff_delay(attempt, err.retry_after());
            attempt += 1;
            self.update_state(|s| s.retries += 1);
            metrics::record_retry_backoff(operation.as_str(), delay, attempt);
            warn!(
                operation = operation.as_str(),
                attempt = attempt,
                max_retries = self.config.max_retries,
                error_kind = err.kind(),
                delay_ms = delay.as_millis(),
                "Transient provider failure, backing off"
            );

            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown.wait_for_shutdown() => return Err(CallError::Cancelled(err)),
            }
        }
    }

    /// Flush the CSV and regenerate the spreadsheet
    async fn finish(&self) -> Result<(), OutputError> {
        self.store.flush().await?;
        let rows = self.store.export_xlsx().await?;
        debug!(rows = rows, "Final spreadsheet written");
        Ok(())
    }

    fn should_stop(&self, control: &RunControl) -> bool {
        self.shutdown.is_shutdown_requested() || control.is_halted()
    }

    /// Mutate the run counters; returns processed postal codes afterwards
    fn update_state(&self, mutate: impl FnOnce(&mut IngestionState)) -> usize {
        let mut state = self.state.lock();
        mutate(&mut state);
        state.postal_codes_processed
    }

    fn notify_observer(&self, state: &IngestionState) {
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }
}
