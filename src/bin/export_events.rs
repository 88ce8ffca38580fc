//! export_events - export an event log file to JSON or CSV

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use occupancy_kernel::{EventLog, ExportFormat};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Event log file to read (e.g. events/events_supermarket.log).
    #[arg(long)]
    log: PathBuf,
    /// Output format (json|csv).
    #[arg(long, default_value = "json")]
    format: String,
    /// Output file path.
    #[arg(long, default_value = "events_export.json")]
    output: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let format: ExportFormat = args.format.parse()?;

    if !args.log.exists() {
        anyhow::bail!("event log {} does not exist", args.log.display());
    }
    let log = EventLog::open(&args.log, None)
        .with_context(|| format!("failed to open event log {}", args.log.display()))?;
    if log.skipped_lines() > 0 {
        log::warn!("{} malformed line(s) skipped", log.skipped_lines());
    }

    let written = log.export(&args.output, format)?;
    println!("exported {} event(s) to {}", written, args.output.display());
    Ok(())
}
