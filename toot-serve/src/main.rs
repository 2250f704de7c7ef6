//! toot-serve - HTTP control surface for the bot fleet

mod api;

use anyhow::{Context, Result};
use clap::Parser;
use libtootfleet::{logging, Config, Fleet, FleetError};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "toot-serve")]
#[command(version)]
#[command(about = "Serve the fleet's post, reply and population controls over HTTP")]
#[command(long_about = "\
toot-serve - Serve the fleet's post, reply and population controls over HTTP

ROUTES:
    POST /post               {username, password?, text, media?}
    POST /reply              {username, password?, text, post_identifier, media?}
    POST /start_population   start the hashtag mirror
    POST /stop_population    stop it after the current cycle

Every response is JSON with a boolean \"success\" field. Failed requests
carry an \"error\" message and status 400 (bad input or scheduler state),
404 (unknown account or reply target) or 500.

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "TOOTFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    bind: String,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
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
    let fleet = Arc::new(Fleet::from_config(config)?);

    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!("toot-serve listening on {}", cli.bind);

    axum::serve(listener, api::router(fleet.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if fleet.is_populating().await {
        info!("Stopping population before exit");
        fleet.stop_population().await?;
    }
    info!("toot-serve stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
