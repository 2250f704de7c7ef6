//! toot-post - Post or reply as an existing bot account

use clap::Parser;
use libtootfleet::logging;
use libtootfleet::{Config, Fleet, FleetError, PostRequest, PostResponse, ReplyRequest, Result};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "toot-post")]
#[command(version)]
#[command(about = "Post or reply as an existing bot account", long_about = None)]
#[command(after_help = "\
EXIT CODES:
    0 - Posted, or already delivered earlier
    1 - Remote or storage failure
    2 - Authentication or configuration error
    3 - Invalid input
    4 - Account or reply target not found")]
struct Cli {
    /// Content to post (reads from stdin if not provided)
    content: Option<String>,

    /// Account to post as
    #[arg(short, long)]
    user: String,

    /// Account password (defaults to the roster password)
    #[arg(short, long, env = "TOOTFLEET_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Media file name inside the media directory
    #[arg(short, long)]
    media: Option<String>,

    /// Reply to the first public status containing this text
    #[arg(short, long, value_name = "SUBSTRING")]
    reply_to: Option<String>,

    /// Delete the account's recent statuses instead of posting
    #[arg(long, conflicts_with_all = ["content", "media", "reply_to"])]
    purge: bool,

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

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.format != "text" && cli.format != "json" {
        return Err(FleetError::InvalidInput(format!(
            "Invalid format '{}'. Valid options: text, json",
            cli.format
        )));
    }

    if cli.purge {
        let fleet = Fleet::from_config(Config::load_from(cli.config.as_deref())?)?;
        let deleted = fleet.purge(&cli.user, cli.password.as_deref()).await?;
        if cli.format == "json" {
            println!("{}", serde_json::json!({ "username": cli.user, "deleted": deleted }));
        } else {
            println!("{}: deleted {} status(es)", cli.user, deleted);
        }
        return Ok(());
    }

    let text = read_content(cli.content.clone())?;
    let fleet = Fleet::from_config(Config::load_from(cli.config.as_deref())?)?;

    let response = match &cli.reply_to {
        Some(post_identifier) => {
            fleet
                .reply(&ReplyRequest {
                    username: cli.user.clone(),
                    password: cli.password.clone(),
                    text,
                    post_identifier: post_identifier.clone(),
                    media: cli.media.clone(),
                })
                .await?
        }
        None => {
            fleet
                .post(&PostRequest {
                    username: cli.user.clone(),
                    password: cli.password.clone(),
                    text,
                    media: cli.media.clone(),
                })
                .await?
        }
    };

    print_response(&response, &cli.format);
    Ok(())
}

/// Content from the argument, or from stdin when piped
fn read_content(arg: Option<String>) -> Result<String> {
    let content = match arg {
        Some(content) => content,
        None => {
            let stdin = std::io::stdin();
            if stdin.is_terminal() {
                return Err(FleetError::InvalidInput(
                    "No content provided. Pass it as an argument or pipe it on stdin".to_string(),
                ));
            }
            let mut buffer = String::new();
            stdin
                .lock()
                .read_to_string(&mut buffer)
                .map_err(|e| FleetError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
            buffer
        }
    };

    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(FleetError::InvalidInput("Content cannot be empty".to_string()));
    }
    Ok(content)
}

fn print_response(response: &PostResponse, format: &str) {
    if format == "json" {
        match serde_json::to_string(response) {
            Ok(json) => println!("{}", json),
            Err(e) => tracing::error!(error = %e, "Failed to serialize response"),
        }
        return;
    }

    match (&response.toot_url, &response.status_id, &response.skipped) {
        (Some(url), _, _) => println!("{}", url),
        (None, Some(id), _) => println!("{}:{}", response.username, id),
        (_, _, Some(reason)) => println!("skipped ({}): {}", reason, response.fingerprint),
        _ => println!("{}", response.fingerprint),
    }
}
