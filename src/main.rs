use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tagtrail::config::{load_config, TrackerConfig};
use tagtrail::producer::{self, KeepAwake};
use tagtrail::Poller;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "tagtrail",
    version,
    about = "Record Find My device locations to per-device CSV logs"
)]
struct Cli {
    /// Device name to track (case-insensitive). Tracks every device when unset.
    #[arg(long, env = "DEVICE", value_name = "NAME")]
    device: Option<String>,

    /// TOML config file
    #[arg(long, env = "TAGTRAIL_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tagtrail=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => TrackerConfig::default(),
    };
    if let Some(device) = cli.device {
        config.device = Some(device);
    }

    if !producer::is_running(&config.producer_process).await {
        error!(
            process = %config.producer_process,
            "Find My is not running. You must run Find My in the background to use this tool."
        );
        bail!("{} is not running", config.producer_process);
    }

    println!("Starting to track...");
    println!("Please keep `Find My` app open on your device.");
    println!("Press Ctrl+C to stop tracking.");
    println!();

    let poller = Poller::from_config(&config)?;
    let keep_awake = KeepAwake::start(&config.keep_awake)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut poll_task = tokio::spawn(poller.run(shutdown_rx));

    let joined = tokio::select! {
        joined = &mut poll_task => joined,
        signal = shutdown_signal() => {
            signal?;
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
            poll_task.await
        }
    };

    match joined.context("Poll task panicked")? {
        Ok(writer) => {
            writer.close()?;
            keep_awake.stop().await?;
            println!("Stopped by user");
            Ok(())
        }
        Err(e) => {
            let message = format!("{:#}", e);
            error!(error = %message, "Fatal error, stopping");
            keep_awake.stop().await?;
            Err(e)
        }
    }
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl_c signal")?;
            }
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;

    Ok(())
}
