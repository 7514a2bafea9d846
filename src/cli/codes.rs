//! Codes command: preview a postal-code sequence without calling the provider

use crate::postal::{self, PostalCode};
use clap::Args;

use super::{CliError, OutputFormat};

/// Arguments for printing a postal-code sequence
#[derive(Args, Debug)]
pub struct CodesArgs {
    /// First postal code of the sequence
    #[arg(long)]
    pub start_postal: String,

    /// Number of postal codes to generate
    #[arg(long, default_value = "10")]
    pub count: usize,
}

impl CodesArgs {
    /// Execute the codes command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let start = PostalCode::parse(&self.start_postal)?;
        let codes = postal::generate(&start, self.count);

        match format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "region": start.region().to_string(),
                    "requested": self.count,
                    "generated": codes.len(),
                    "codes": codes.iter().map(PostalCode::as_str).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string(&output)?);
            }
            OutputFormat::Human => {
                for code in &codes {
                    println!("{code}");
                }
                if codes.len() < self.count {
                    eprintln!(
                        "Only {} of {} codes available from {}",
                        codes.len(),
                        self.count,
                        start
                    );
                }
            }
        }
        Ok(())
    }
}
