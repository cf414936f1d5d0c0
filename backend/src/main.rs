//! Macan Downloader - headless front end for the download engine
//!
//! Loads the persisted queue, adds any URLs given on the command line and
//! runs until the queue drains or Ctrl-C is pressed.

use anyhow::Result;
use clap::Parser;
use macan_downloader::config;
use macan_downloader::{DownloadManager, DownloadStore, EngineEvent, NewDownload};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URLs to download
    urls: Vec<String>,

    /// Directory or file path to save to (defaults to the category folder)
    #[arg(short = 'd', long = "dest")]
    destination: Option<PathBuf>,

    /// Number of parallel connections per file
    #[arg(short = 's', long, default_value_t = 1)]
    split: usize,

    /// Maximum number of concurrent downloads
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Speed limit per download in KiB/s (0 = unlimited)
    #[arg(short = 'r', long = "rate-limit")]
    rate_limit: Option<u64>,

    /// Category label for the new downloads
    #[arg(short = 'C', long)]
    category: Option<String>,

    /// Use this config file instead of the default one
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    info!("Starting Macan Downloader v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = args.config.clone().unwrap_or_else(config::config_path);
    let mut settings = config::load_from(&config_path)?;
    info!("Configuration loaded from {:?}", config_path);

    if let Some(concurrency) = args.concurrency {
        settings.downloads.max_concurrent_downloads = concurrency;
    }
    if let Some(rate_limit) = args.rate_limit {
        settings.downloads.speed_limit_kbps = rate_limit;
    }

    let store = DownloadStore::new(config::state_file(&settings));
    let manager = DownloadManager::start(settings.downloads.clone(), Some(store))?;
    let mut events = manager.subscribe();

    for url in &args.urls {
        let new = NewDownload::new(url.as_str(), args.destination.clone().unwrap_or_default())
            .category(args.category.clone().unwrap_or_default())
            .split_count(args.split)
            .categorize(&settings);
        match manager.add_download(new).await {
            Ok(snapshot) => info!("Queued {} -> {:?}", snapshot.url, snapshot.destination),
            Err(e) => error!("Cannot add {}: {}", url, e),
        }
    }

    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, saving state");
                break;
            }
            event = events.recv() => match event {
                Ok(EngineEvent::DownloadCompleted { filename, .. }) => {
                    info!("Download complete: {}", filename);
                }
                Ok(EngineEvent::ItemUpdated(item)) if item.error.is_some() => {
                    warn!("{}: {} ({})", item.filename, item.status, item.error.unwrap_or_default());
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tick.tick() => {
                let stats = manager.stats().await?;
                if stats.active == 0 && stats.queued == 0 {
                    info!("Nothing left to download");
                    break;
                }
            }
        }
    }

    manager.shutdown().await?;
    Ok(())
}
