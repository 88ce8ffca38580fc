//! occupancyd - occupancy analytics daemon
//!
//! Loads configuration, connects one stream, and logs insights periodically
//! until Ctrl-C.

use anyhow::{anyhow, Result};
use clap::Parser;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use occupancy_kernel::config::OccupancyConfig;
use occupancy_kernel::{BackendRegistry, StreamController};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stream URL or local path; overrides the configured source.
    #[arg(long)]
    source: Option<String>,
    /// Seconds between insight reports.
    #[arg(long, default_value_t = 5)]
    report_interval_s: u64,
    /// List detector backends and exit.
    #[arg(long)]
    list_detectors: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let registry = BackendRegistry::with_builtin();
    if args.list_detectors {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = OccupancyConfig::load()?;
    let source = args
        .source
        .or_else(|| config.source.clone())
        .ok_or_else(|| anyhow!("no source configured (use --source or OCCUPANCY_SOURCE)"))?;
    let detector = registry.require(&config.detector)?;

    let controller = StreamController::new(config.pipeline.clone(), detector, config.business_type)?;
    controller.connect(&source)?;
    log::info!(
        "occupancyd running: {} as {} (events in {})",
        source,
        config.business_type,
        controller.event_log_path().display()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let interval = Duration::from_secs(args.report_interval_s.max(1));
    loop {
        match rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => report(&controller),
        }
    }

    log::info!("shutdown signal received, stopping stream...");
    controller.disconnect();
    Ok(())
}

fn report(controller: &StreamController) {
    let status = controller.status();
    log::info!(
        "status: {:?} read={} processed={} skipped={} dropped={} detections={}",
        status.state,
        status.frames_read,
        status.frames_processed,
        status.frames_skipped,
        status.frames_dropped,
        status.detections
    );
    let insights = controller.insights();
    for (name, count) in &insights.metrics.counts {
        log::info!("  {} = {}", name, count);
    }
    for trend in &insights.trends {
        log::info!("  {}", trend);
    }
    for recommendation in &insights.recommendations {
        log::info!("  recommendation: {}", recommendation);
    }
}
