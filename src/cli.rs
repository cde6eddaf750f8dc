use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lanwatch::capture;
use lanwatch::config::Config;
use lanwatch::watch::subscriber::subscribers_from_config;
use lanwatch::watch::watcher::Watcher;

#[derive(Parser)]
#[command(name = "lanwatch")]
#[command(author, version, about = "Watch for activity on a LAN")]
pub struct Cli {
    /// Path to the trigger configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Load only the named triggers, even if disabled
    #[arg(short, long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Interface to capture from
    #[arg(short, long, conflicts_with = "pcap")]
    pub iface: Option<String>,

    /// Capture file to replay instead of a live interface
    #[arg(short, long)]
    pub pcap: Option<PathBuf>,
}

pub async fn run_command(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let subs = subscribers_from_config(&config, &cli.only)?;
    let watcher = Watcher::new(subs);

    let frames = match (&cli.iface, &cli.pcap) {
        (_, Some(path)) => capture::offline(path)?,
        (Some(iface), None) => capture::live(iface)?,
        (None, None) => {
            let iface = capture::auto_select()?;
            info!("auto-selected interface {iface}");
            capture::live(&iface)?
        }
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_cancel.cancel();
        }
    });

    watcher.run(frames, cancel).await
}
