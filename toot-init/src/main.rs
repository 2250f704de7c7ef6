//! toot-init - Bring every roster account to its configured state

use anyhow::{Context, Result};
use clap::Parser;
use libtootfleet::roster::InitReport;
use libtootfleet::{logging, Config, Fleet, FleetError};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "toot-init")]
#[command(version)]
#[command(about = "Create or log into every roster account and publish its initial toots")]
#[command(long_about = "\
toot-init - Create or log into every roster account and publish its initial toots

DESCRIPTION:
    For every user listed in the configuration's roster, toot-init logs in if
    the account already exists on the instance and creates it otherwise. It
    then applies the profile fields, publishes each initial toot exactly once
    and follows the configured accounts.

    Running it again is safe: existing accounts are logged into and toots
    that were already delivered are skipped.

EXIT CODES:
    0 - Every roster user initialized
    1 - At least one roster user failed
    2 - Authentication or configuration error
")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "TOOTFLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_default(cli.verbose);

    match run(cli).await {
        Ok(failures) if failures > 0 => std::process::exit(1),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<FleetError>()
                .map(FleetError::exit_code)
                .unwrap_or(1);
            std::process::exit(code);
        }
    }
}

/// Returns the number of failed roster users
async fn run(cli: Cli) -> Result<usize> {
    if cli.format != "text" && cli.format != "json" {
        return Err(FleetError::InvalidInput(format!(
            "Invalid format '{}'. Valid options: text, json",
            cli.format
        ))
        .into());
    }

    let config = Config::load_from(cli.config.as_deref())?;
    let fleet = Fleet::from_config(config)?;
    let report = fleet
        .initialize()
        .await
        .context("Roster initialization could not start")?;

    if cli.format == "json" {
        println!("{}", report_json(&report));
    } else {
        print_report(&report);
    }
    Ok(report.failures())
}

fn report_json(report: &InitReport) -> serde_json::Value {
    let users: Vec<_> = report
        .users
        .iter()
        .map(|user| match &user.result {
            Ok(r) => serde_json::json!({
                "login": user.login,
                "success": true,
                "created": r.created,
                "delivered": r.delivered,
                "skipped": r.skipped,
                "followed": r.followed,
            }),
            Err(e) => serde_json::json!({
                "login": user.login,
                "success": false,
                "error": e.to_string(),
            }),
        })
        .collect();

    serde_json::json!({
        "accounts_created": report.accounts_created(),
        "statuses_delivered": report.statuses_delivered(),
        "failures": report.failures(),
        "users": users,
    })
}

fn print_report(report: &InitReport) {
    for user in &report.users {
        match &user.result {
            Ok(r) => println!(
                "{}: {} - {} delivered, {} skipped, {} followed",
                user.login,
                if r.created { "created" } else { "existing" },
                r.delivered,
                r.skipped,
                r.followed
            ),
            Err(e) => println!("{}: FAILED - {}", user.login, e),
        }
    }
    println!(
        "{} account(s) created, {} status(es) delivered, {} failure(s)",
        report.accounts_created(),
        report.statuses_delivered(),
        report.failures()
    );
}
