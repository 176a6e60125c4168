//! camreader: double-buffered multi-sensor frame acquisition

use std::path::PathBuf;

use camreader::pipeline::PackageDelivery;
use camreader::{CaptureLoop, Config};
use clap::Parser;
use color_eyre::Result;
use flume::Receiver;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted
    #[arg(short, long, env = "CAMREADER_CONFIG")]
    config: Option<PathBuf>,

    /// Enable the secondary (liveness) stream regardless of configuration
    #[arg(long)]
    secondary: bool,

    /// Log filter directive
    #[arg(long, default_value = "camreader=info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log)),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("camreader launching...");

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if args.secondary {
        config.capture.secondary_enabled = true;
    }
    info!(
        primary = %config.capture.primary.name,
        secondary = config.capture.secondary_enabled.then_some(config.capture.secondary.name.as_str()),
        "Configured streams"
    );

    // Open sources, allocate both packages, start the producer thread
    let (capture_loop, rx) = CaptureLoop::from_config(&config)?;
    let capture = capture_loop.spawn()?;

    let consumer = tokio::spawn(consume(rx));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let stats = tokio::task::spawn_blocking(move || capture.join()).await?;
    consumer.await?;

    info!(
        cycles = stats.cycles,
        published = stats.published,
        dropped = stats.backpressure_drops,
        "camreader shutting down"
    );
    Ok(())
}

/// Log each delivered package; dropping the delivery acknowledges it.
async fn consume(rx: Receiver<PackageDelivery>) {
    let mut last_idx = None;
    while let Ok(package) = rx.recv_async().await {
        let gap = last_idx.map_or(0, |last: u64| {
            package.frame_idx.wrapping_sub(last).saturating_sub(1)
        });
        debug!(
            frame_idx = package.frame_idx,
            skipped = gap,
            large = %package.primary.large.size(),
            small = %package.primary.small.size(),
            secondary = package.secondary.is_some(),
            "Received image package"
        );
        last_idx = Some(package.frame_idx);
        package.ack();
    }
    info!("Capture side closed, consumer exiting");
}
