//! wlm daemon - polls the wavelength meter and streams readings over TCP
//!
//! # Usage
//!
//! ```bash
//! # Real meter, default port 50000
//! wlmd
//!
//! # Simulated meter on port 50001
//! wlmd --debug 50001
//!
//! # Explicit configuration file
//! wlmd -c /etc/wlm/wlmd.toml
//! ```

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use wlmd::{open_source, Daemon, DaemonError, ServerConfig};

/// wlm daemon - wavelength-meter telemetry server
#[derive(Parser, Debug)]
#[command(name = "wlmd", version, about)]
struct Args {
    /// Use the simulated meter instead of the vendor driver
    #[arg(long)]
    debug: bool,

    /// Configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port to listen on (overrides the configuration)
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wlmd=info".parse()?)
                .add_directive("wlm_core=info".parse()?)
                .add_directive("wlm_protocol=info".parse()?),
        )
        .init();

    let mut config =
        ServerConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    if args.debug {
        config.debug = true;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        port = config.port,
        simulated = config.debug,
        "wlm daemon starting"
    );

    let source = open_source(&config).context("Failed to open measurement source")?;
    info!(source = source.name(), "Measurement source ready");

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let daemon = Daemon::start(&config, source, cancel_token)
        .await
        .context("Failed to start daemon")?;
    info!(addr = %daemon.local_addr(), "Streaming telemetry");

    match daemon.wait().await {
        Ok(()) => {
            info!("wlm daemon stopped");
            Ok(())
        }
        Err(e @ DaemonError::Poller(_)) => {
            error!(error = %e, "Measurement source lost, shutting down");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Daemon error");
            Err(e.into())
        }
    }
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
