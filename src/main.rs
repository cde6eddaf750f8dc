use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;

use cli::{run_command, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(log_filter()?)
        .init();

    if let Err(e) = run_command(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Log level from `LANWATCH_LOGLEVEL`, default `info`. `fatal` and
/// `panic` are accepted as aliases for `error`.
fn log_filter() -> Result<EnvFilter> {
    let level = std::env::var("LANWATCH_LOGLEVEL").unwrap_or_else(|_| "info".to_string());
    let level = match level.to_lowercase().as_str() {
        "fatal" | "panic" => "error".to_string(),
        other => other.to_string(),
    };
    EnvFilter::try_new(&level).with_context(|| format!("invalid LANWATCH_LOGLEVEL: {level}"))
}
