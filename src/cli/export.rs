//! Export command: regenerate the spreadsheet from the CSV

use crate::output::csv::read_leads;
use crate::output::xlsx;
use clap::Args;
use tracing::{info, warn};

use super::{Cli, CliError, OutputFormat};

/// Arguments for the export command
#[derive(Args, Debug)]
pub struct ExportArgs {}

impl ExportArgs {
    /// Execute the export command
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let paths = cli.output_paths();
        if !paths.csv.exists() {
            return Err(CliError::InvalidArgument(format!(
                "no leads file at {}",
                paths.csv.display()
            )));
        }

        let loaded = read_leads(&paths.csv)?;
        if loaded.skipped > 0 {
            warn!(skipped = loaded.skipped, "Skipped unparseable rows");
        }
        let rows = xlsx::export(&loaded.records, &paths.xlsx)?;
        info!(rows = rows, path = %paths.xlsx.display(), "Spreadsheet exported");

        match cli.output_format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "success": true,
                    "csv": paths.csv.display().to_string(),
                    "xlsx": paths.xlsx.display().to_string(),
                    "rows": rows,
                    "skipped_rows": loaded.skipped,
                });
                println!("{}", serde_json::to_string(&output)?);
            }
            OutputFormat::Human => {
                println!("Exported {} leads to {}", rows, paths.xlsx.display());
            }
        }
        Ok(())
    }
}
