//! Harvest command implementation

use crate::harvest::{HarvestConfig, HarvestRequest, IngestionPipeline, IngestionState, RunReport};
use crate::provider::google::GooglePlacesProvider;
use crate::shutdown::SharedShutdown;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::{Cli, CliError, OutputFormat};

/// Maximum worker count, beyond which the shared rate limiter only queues
const MAX_WORKERS: usize = 16;

/// Parse and validate the worker count
fn parse_workers(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("workers must be at least 1".to_string());
    }
    if value > MAX_WORKERS {
        return Err(format!("workers {value} exceeds maximum of {MAX_WORKERS}"));
    }
    Ok(value)
}

/// Parse a non-negative number of seconds
fn parse_seconds(s: &str) -> Result<Duration, String> {
    let value: f64 = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number of seconds"))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("'{s}' must be a non-negative number of seconds"));
    }
    Ok(Duration::from_secs_f64(value))
}

/// Arguments for a harvest run
#[derive(Args, Debug)]
pub struct HarvestArgs {
    /// Search query with a {} placeholder for the postal code
    /// (e.g. "Dental offices in {}")
    #[arg(long)]
    pub query: String,

    /// First postal code of the sequence (e.g. "N2J 4Z2", "10001", "SW1A 1AA")
    #[arg(long)]
    pub start_postal: String,

    /// Number of postal codes to visit
    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u64).range(1..=10_000))]
    pub count: u64,

    /// Process postal codes with a worker pool
    #[arg(long, default_value_t = false)]
    pub parallel: bool,

    /// Workers used with --parallel (default: 3, max: 16)
    #[arg(long, default_value = "3", value_parser = parse_workers)]
    pub workers: usize,

    /// Skip the per-place details lookup
    #[arg(long, default_value_t = false)]
    pub basic: bool,

    /// Places API key
    #[arg(long, env = "GOOGLE_PLACES_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Search radius around the postal code, in metres
    #[arg(long, default_value = "5000")]
    pub radius: u32,

    /// Maximum results kept per postal code
    #[arg(long, default_value = "60")]
    pub max_results: usize,

    /// Provider requests allowed per rolling minute
    #[arg(long, default_value = "100")]
    pub rpm: u32,

    /// Minimum jitter between requests, in seconds
    #[arg(long, default_value = "0.5", value_parser = parse_seconds)]
    pub min_delay: Duration,

    /// Maximum jitter between requests, in seconds
    #[arg(long, default_value = "1.5", value_parser = parse_seconds)]
    pub max_delay: Duration,

    /// Maximum retries for transient provider failures (range: 0-20)
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Regenerate the spreadsheet every N completed postal codes (0 = only at the end)
    #[arg(long, default_value = "10")]
    pub xlsx_every: usize,
}

impl HarvestArgs {
    /// Build the run configuration from these arguments and the global flags
    pub fn to_config(&self, cli: &Cli) -> HarvestConfig {
        HarvestConfig {
            min_delay: self.min_delay,
            max_delay: self.max_delay,
            max_requests_per_minute: self.rpm,
            radius_m: self.radius,
            max_results_per_location: self.max_results,
            output_dir: cli.output_dir(),
            csv_file: cli.csv_file.clone(),
            xlsx_file: cli.xlsx_file.clone(),
            max_retries: self.max_retries,
            parallel: self.parallel,
            workers: self.workers,
            detailed: !self.basic,
            xlsx_refresh_every: self.xlsx_every,
            ..HarvestConfig::default()
        }
    }

    /// Execute the harvest command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let api_key = self
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                CliError::ConfigurationError(
                    "missing API key: pass --api-key or set GOOGLE_PLACES_API_KEY".to_string(),
                )
            })?;

        let config = self.to_config(cli);
        config.validate()?;
        let provider = GooglePlacesProvider::new(api_key, &config)?;

        info!(
            query = %self.query,
            start_postal = %self.start_postal,
            count = self.count,
            output_dir = %config.output_dir.display(),
            "Starting harvest command"
        );

        let pb = match cli.output_format {
            OutputFormat::Human => create_progress_bar(),
            OutputFormat::Json => ProgressBar::hidden(),
        };
        let observer_pb = pb.clone();

        let pipeline = IngestionPipeline::open(Arc::new(provider), config, shutdown)
            .await?
            .with_observer(move |state| update_progress_bar(&observer_pb, state));

        let request = HarvestRequest::new(self.query.clone(), self.start_postal.clone(), self.count as usize);
        let result = pipeline.run(request).await;
        let snapshot = pipeline.snapshot();
        let closed = pipeline.close().await;
        pb.finish_and_clear();

        match result {
            Ok(report) => {
                closed?;
                output_report(cli.output_format, &report)
            }
            Err(e) => {
                if let Err(close_err) = closed {
                    error!(error = %close_err, "Failed to close lead store");
                }
                output_failure(cli.output_format, &snapshot, &e.to_string())?;
                error!(error = %e, "Harvest failed");
                Err(e.into())
            }
        }
    }
}

/// Create progress bar over postal codes
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} codes ({percent}%) {msg}")
            .expect("hardcoded template is valid")
            .progress_chars("#>-"),
    );
    pb
}

fn update_progress_bar(pb: &ProgressBar, state: &IngestionState) {
    pb.set_length(state.postal_codes_total as u64);
    pb.set_position(state.postal_codes_processed as u64);
    pb.set_message(format!(
        "{} kept, {} dup, {} rejected",
        state.records_kept, state.records_duplicate, state.records_rejected
    ));
}

fn output_report(format: OutputFormat, report: &RunReport) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "success": true,
                "report": report,
            });
            println!("{}", serde_json::to_string(&output)?);
        }
        OutputFormat::Human => {
            let state = &report.state;
            println!("\nHarvest {}!", state.status.to_string().to_lowercase());
            println!(
                "Postal codes: {}/{} ({} failed)",
                state.postal_codes_processed, state.postal_codes_total, state.postal_codes_failed
            );
            println!("Records found: {}", state.records_found);
            println!("Leads kept: {}", state.records_kept);
            println!("Duplicates dropped: {}", state.records_duplicate);
            println!("Records rejected: {}", state.records_rejected);
            println!(
                "API calls: {} ({} search, {} details)",
                state.api_calls(),
                state.search_calls,
                state.detail_calls
            );
            if state.retries > 0 {
                println!("Retries: {}", state.retries);
            }
            if !report.failed_codes.is_empty() {
                println!("Failed postal codes: {}", report.failed_codes.join(", "));
            }
            println!("Leads in store: {}", report.store.total_records);
            println!("Elapsed: {:.1}s", state.elapsed.as_secs_f64());
        }
    }
    Ok(())
}

fn output_failure(format: OutputFormat, state: &IngestionState, error: &str) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "success": false,
                "state": state,
                "error": error,
            });
            println!("{}", serde_json::to_string(&output)?);
        }
        OutputFormat::Human => {
            eprintln!("\nHarvest failed!");
            eprintln!(
                "Postal codes processed: {}/{}",
                state.postal_codes_processed, state.postal_codes_total
            );
            eprintln!("Leads kept before failure: {}", state.records_kept);
            eprintln!("Error: {error}");
        }
    }
    Ok(())
}
