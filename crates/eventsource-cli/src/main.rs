//! eventsource-cli - Command-line tool for server-sent event streams
//!
//! Connects to a `text/event-stream` endpoint and prints events as they
//! arrive, reconnecting automatically like a browser would.

mod config;
mod output;
mod tail;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{CliOverrides, Config};
use crate::output::{OutputContext, OutputFormat};
use crate::tail::TailLimits;

#[derive(Parser)]
#[command(name = "eventsource-cli")]
#[command(author, version, about = "Tail a server-sent events stream")]
struct Cli {
    /// Stream URL
    url: String,

    /// Event type(s) to print
    #[arg(short, long = "event", default_value = "message")]
    events: Vec<String>,

    /// Resume from this event ID (sent as Last-Event-ID)
    #[arg(long, env = "EVENTSOURCE_LAST_EVENT_ID")]
    last_event_id: Option<String>,

    /// Reconnect delay in milliseconds, until the server sends `retry:`
    #[arg(long)]
    retry_ms: Option<u64>,

    /// Send credentials on cross-origin requests
    #[arg(long)]
    with_credentials: bool,

    /// Bearer token
    #[arg(long, env = "EVENTSOURCE_TOKEN")]
    token: Option<String>,

    /// Extra request header ("Name: value")
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Stop after this many events
    #[arg(short = 'n', long)]
    max_events: Option<usize>,

    /// Configuration file path
    #[arg(short, long, env = "EVENTSOURCE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    // Merge CLI args with config
    let merged = config.merge_with_args(&CliOverrides {
        output: cli.output.map(Into::into),
        no_color: cli.no_color,
        retry_ms: cli.retry_ms,
        with_credentials: cli.with_credentials,
        token: cli.token.as_deref(),
        headers: &cli.headers,
    })?;

    let format = OutputFormat::from_name(&merged.output).unwrap_or_default();
    let ctx = OutputContext::new(format, merged.no_color, cli.quiet);

    tail::tail(
        &cli.url,
        &cli.events,
        merged.source_options(cli.last_event_id.as_deref()),
        TailLimits {
            max_events: cli.max_events,
        },
        &ctx,
    )
    .await
}
