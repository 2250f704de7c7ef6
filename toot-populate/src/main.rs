//! toot-populate - Foreground daemon mirroring remote hashtags
//!
//! Runs the poll scheduler until SIGINT or SIGTERM arrives, then stops it
//! gracefully (the cycle in progress is allowed to finish).

use anyhow::{Context, Result};
use clap::Parser;
use libtootfleet::{logging, Config, Fleet, FleetError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "toot-populate")]
#[command(version)]
#[command(about = "Mirror remote hashtag content into the local instance")]
#[command(long_about = "\
toot-populate - Mirror remote hashtag content into the local instance

DESCRIPTION:
    toot-populate logs into the configured remote instance and repeatedly
    fetches the most recent statuses for each configured hashtag. Each cycle
    republishes at most one new status under a local bot account named after
    its author, creating that account first when needed. Cycles are separated
    by an irregular pause of 10 to 80 time units.

USAGE:
    # Run in foreground (logs to stderr)
    toot-populate

    # Run a single cycle and exit
    toot-populate --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current cycle)

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Authentication or configuration error
")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "TOOTFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run one mirror cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_default(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        let code = e
            .downcast_ref::<FleetError>()
            .map(FleetError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_from(cli.config.as_deref())?;
    let fleet = Fleet::from_config(config)?;

    if cli.once {
        let report = fleet.mirror_once().await?;
        info!(
            fetched = report.fetched,
            delivered = report.delivered(),
            failures = report.failures(),
            "toot-populate: ran one cycle, exiting"
        );
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    fleet
        .start_population()
        .await
        .context("Failed to start population")?;
    info!("toot-populate started");

    while !shutdown.load(Ordering::Relaxed) {
        sleep(Duration::from_millis(250)).await;
    }

    info!("Shutdown requested, waiting for the current cycle to finish");
    fleet.stop_population().await?;
    info!("toot-populate stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!(signal = sig, "Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}
