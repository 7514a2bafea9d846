//! Harvest observability metrics
//!
//! Counters and histograms for provider calls, retries, rate-limiter waits,
//! lead outcomes and postal-code outcomes.
//!
//! ## Architecture
//!
//! - Uses the `metrics` crate facade; without an installed recorder every
//!   call is a no-op
//! - [`init_metrics`] installs a Prometheus scrape endpoint
//! - Labels are low-cardinality (operation, outcome, error kind)

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

static CORRELATION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Metrics setup errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed (address in use, recorder already set)
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Initialize metrics with a Prometheus exporter listening on `addr`.
///
/// Idempotent: later calls are ignored once installation succeeded.
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    if METRICS_INITIALIZED.load(Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_counter!(
        "provider_requests_total",
        Unit::Count,
        "Provider calls by operation and outcome"
    );
    describe_histogram!(
        "provider_request_duration_seconds",
        Unit::Seconds,
        "Provider call duration in seconds"
    );
    describe_counter!(
        "provider_retries_total",
        Unit::Count,
        "Retries after transient or quota failures"
    );
    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Backoff slept before a retry"
    );
    describe_histogram!(
        "rate_limit_wait_seconds",
        Unit::Seconds,
        "Time spent waiting for a rate-limit slot"
    );
    describe_counter!(
        "leads_total",
        Unit::Count,
        "Records by outcome (stored, duplicate, rejected)"
    );
    describe_counter!(
        "postal_codes_total",
        Unit::Count,
        "Postal codes by outcome (done, failed)"
    );

    METRICS_INITIALIZED.store(true, Ordering::SeqCst);
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

/// Whether [`init_metrics`] has succeeded
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.load(Ordering::SeqCst)
}

/// Generate a new correlation ID for request tracing
pub fn generate_correlation_id() -> String {
    let id = CORRELATION_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("req-{id:08x}")
}

/// Timing and outcome of one provider call
pub struct ProviderCallMetrics {
    operation: &'static str,
    start_time: Instant,
    correlation_id: String,
    attempt: u32,
}

impl ProviderCallMetrics {
    /// Start recording a call
    pub fn start(operation: &'static str, attempt: u32) -> Self {
        let correlation_id = generate_correlation_id();
        debug!(
            correlation_id = %correlation_id,
            operation = operation,
            attempt = attempt,
            "Provider call started"
        );
        Self {
            operation,
            start_time: Instant::now(),
            correlation_id,
            attempt,
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.record("ok");
    }

    /// Record a failed call by error kind
    pub fn record_failure(&self, error_kind: &'static str) {
        self.record(error_kind);
        if error_kind == "quota_exceeded" {
            warn!(
                correlation_id = %self.correlation_id,
                operation = self.operation,
                attempt = self.attempt,
                "Provider quota exceeded"
            );
        }
    }

    /// Correlation ID for this call
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    fn record(&self, outcome: &'static str) {
        let duration = self.start_time.elapsed();
        counter!(
            "provider_requests_total",
            "operation" => self.operation,
            "outcome" => outcome,
        )
        .increment(1);
        histogram!(
            "provider_request_duration_seconds",
            "operation" => self.operation,
        )
        .record(duration.as_secs_f64());

        debug!(
            correlation_id = %self.correlation_id,
            operation = self.operation,
            outcome = outcome,
            duration_ms = duration.as_millis(),
            "Provider call completed"
        );
    }
}

/// Record a retry and the backoff slept before it
pub fn record_retry_backoff(operation: &'static str, duration: Duration, attempt: u32) {
    counter!("provider_retries_total", "operation" => operation).increment(1);
    histogram!("retry_backoff_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
    debug!(
        operation = operation,
        attempt = attempt,
        backoff_ms = duration.as_millis(),
        "Retry backoff recorded"
    );
}

/// Record time spent waiting for a rate-limit slot
pub fn record_rate_limit_wait(duration: Duration) {
    histogram!("rate_limit_wait_seconds").record(duration.as_secs_f64());
}

/// Record the fate of one record (`stored`, `duplicate` or `rejected`)
pub fn record_lead(outcome: &'static str, reason: &'static str) {
    counter!("leads_total", "outcome" => outcome, "reason" => reason).increment(1);
}

/// Record the terminal state of one postal code
pub fn record_postal_code(outcome: &'static str) {
    counter!("postal_codes_total", "outcome" => outcome).increment(1);
}
