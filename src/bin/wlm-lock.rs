//! wlm lock client - locks laser lines to their targets using streamed readings
//!
//! Reads operator commands from stdin (`help` lists them) and logs the
//! status of every line periodically.
//!
//! # Usage
//!
//! ```bash
//! # Default configuration, server on localhost
//! wlm-lock
//!
//! # Remote meter, custom target store
//! wlm-lock --server 192.168.1.20:50000 --targets /var/lib/wlm/target_freq.json
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wlm_lock::{
    ConsoleCommand, LockConfig, LockService, Outcome, SimulatedActuator, TargetStore,
};

/// wlm lock client - per-line laser frequency lock
#[derive(Parser, Debug)]
#[command(name = "wlm-lock", version, about)]
struct Args {
    /// Configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Telemetry server address (overrides the configuration)
    #[arg(short, long)]
    server: Option<String>,

    /// Target store path (overrides the configuration)
    #[arg(short, long)]
    targets: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("wlm_lock=info".parse()?)
                .add_directive("wlm_core=info".parse()?)
                .add_directive("wlm_protocol=info".parse()?),
        )
        .init();

    let mut config =
        LockConfig::resolve(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(targets) = args.targets {
        config.targets = targets;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        server = %config.server,
        targets = %config.targets.display(),
        "wlm lock client starting"
    );

    let store = TargetStore::load(&config.targets).context("Failed to load targets")?;
    let actuator = Arc::new(SimulatedActuator::new(config.actuator_range));

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let mut service = LockService::start(&config, store, actuator, &cancel_token)
        .context("Failed to start lock service")?;

    run_console(&mut service, &config, &cancel_token).await;

    let statuses = service.shutdown().await;
    info!(lines = statuses.len(), "All lines unlocked, wlm lock client stopped");
    Ok(())
}

/// Serves stdin commands until `quit`, a shutdown signal, or cancellation.
async fn run_console(service: &mut LockService, config: &LockConfig, cancel: &CancellationToken) {
    let mut console = spawn_stdin_reader();
    let mut stdin_open = true;

    let mut status_tick = config.status_interval().map(|period| {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            line = console.recv(), if stdin_open => match line {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => match line.parse::<ConsoleCommand>() {
                    Ok(command) => match service.execute(command).await {
                        Ok(Outcome::Reply(reply)) => println!("{reply}"),
                        Ok(Outcome::Quit) => break,
                        Err(e) => println!("error: {e}"),
                    },
                    Err(e) => println!("{e}"),
                },
                None => {
                    info!("Console closed, running until shutdown signal");
                    stdin_open = false;
                }
            },

            _ = async {
                match status_tick.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            } => service.log_status(),
        }
    }
}

/// Reads stdin on a plain thread so a pending read never holds up exit.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Console read failed");
                    break;
                }
            }
        }
    });
    rx
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
