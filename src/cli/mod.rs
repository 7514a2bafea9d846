//! CLI command implementations

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

pub mod codes;
pub mod error;
pub mod export;
pub mod harvest;
pub mod stats;

pub use codes::CodesArgs;
pub use error::CliError;
pub use export::ExportArgs;
pub use harvest::HarvestArgs;
pub use stats::StatsArgs;

/// Lead Harvester CLI
#[derive(Parser, Debug)]
#[command(name = "lead-harvester")]
#[command(about = "Harvest business leads across a sequence of postal codes", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Directory holding the CSV and XLSX files (default: "output")
    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    /// CSV file name inside the output directory
    #[arg(long, global = true, default_value = crate::harvest::config::DEFAULT_CSV_FILE)]
    pub csv_file: String,

    /// XLSX file name inside the output directory
    #[arg(long, global = true, default_value = crate::harvest::config::DEFAULT_XLSX_FILE)]
    pub xlsx_file: String,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Serve Prometheus metrics on this address (e.g. 127.0.0.1:9000)
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Output directory, falling back to the default
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(crate::harvest::config::DEFAULT_OUTPUT_DIR))
    }

    /// CSV and XLSX locations selected by the global flags
    pub fn output_paths(&self) -> crate::output::OutputPaths {
        crate::output::OutputPaths::in_dir(self.output_dir(), &self.csv_file, &self.xlsx_file)
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search every postal code in a sequence and store the leads
    Harvest(HarvestArgs),

    /// Print the postal-code sequence a harvest would visit
    Codes(CodesArgs),

    /// Print statistics for the stored leads
    Stats(StatsArgs),

    /// Regenerate the spreadsheet from the CSV
    Export(ExportArgs),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
