//! Stats command: summarize the stored leads

use crate::output::csv::read_leads;
use crate::output::StoreStatistics;
use clap::Args;
use tracing::warn;

use super::{Cli, CliError, OutputFormat};

/// Arguments for the stats command
#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Number of primary types to list (human output only)
    #[arg(long, default_value = "10")]
    pub top_types: usize,
}

impl StatsArgs {
    /// Execute the stats command
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
        let stats = StoreStatistics::compute(&loaded.records);

        match cli.output_format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "path": paths.csv.display().to_string(),
                    "skipped_rows": loaded.skipped,
                    "statistics": stats,
                });
                println!("{}", serde_json::to_string(&output)?);
            }
            OutputFormat::Human => print_human(&stats, self.top_types),
        }
        Ok(())
    }
}

fn print_human(stats: &StoreStatistics, top_types: usize) {
    println!("Total leads: {}", stats.total_records);
    println!("Unique place ids: {}", stats.unique_place_ids);
    println!("Unique names: {}", stats.unique_names);
    println!("With phone: {}", stats.with_phone);
    println!("With website: {}", stats.with_website);
    println!("With rating: {}", stats.with_rating);
    if let Some(average) = stats.average_rating {
        println!("Average rating: {average:.2}");
    }

    let mut types: Vec<_> = stats.type_distribution.iter().collect();
    types.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    if !types.is_empty() {
        println!("Top types:");
        for (kind, count) in types.into_iter().take(top_types) {
            println!("  {kind}: {count}");
        }
    }
}
