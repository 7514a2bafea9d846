//! Main entry point for the lead-harvester CLI

use clap::Parser;
use lead_harvester::cli::{Cli, Commands};
use lead_harvester::metrics;
use lead_harvester::shutdown::{self, ShutdownCoordinator};
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing(verbose: bool) {
    // Check if JSON output is requested via environment variable
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lead_harvester={default_level}")));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(addr) = cli.metrics_addr {
        metrics::init_metrics(addr)?;
    }

    // Ctrl+C lets the in-flight record finish, then flushes the store
    let shutdown = ShutdownCoordinator::shared();
    shutdown::spawn_ctrl_c_listener(shutdown.clone());

    match &cli.command {
        Commands::Harvest(args) => args.execute(&cli, shutdown).await?,
        Commands::Codes(args) => args.execute(cli.output_format)?,
        Commands::Stats(args) => args.execute(&cli)?,
        Commands::Export(args) => args.execute(&cli)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // .env is optional; real environment variables take precedence
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
