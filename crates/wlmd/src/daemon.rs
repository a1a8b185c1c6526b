//! Wiring of Poller, hub and server into one running daemon.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::hub::{BroadcastHub, HubConfig, DEFAULT_QUEUE_DEPTH};
use crate::poller::{spawn_poller, Poller, PollerError};
use crate::server::{ServerError, TelemetryServer};
use crate::source::MeasurementSource;

/// Errors that end the daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Poller(#[from] PollerError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("Task failed: {0}")]
    Task(String),
}

impl From<JoinError> for DaemonError {
    fn from(err: JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// A started daemon: listening socket bound, Poller running.
pub struct Daemon {
    local_addr: SocketAddr,
    hub: BroadcastHub,
    cancel: CancellationToken,
    poller: JoinHandle<Result<(), PollerError>>,
    server: JoinHandle<Result<(), ServerError>>,
}

impl Daemon {
    /// Binds the listener and starts the server and Poller tasks.
    pub async fn start(
        config: &ServerConfig,
        source: Box<dyn MeasurementSource>,
        cancel: CancellationToken,
    ) -> Result<Self, DaemonError> {
        let listener = TelemetryServer::bind(&config.bind_addr()).await?;
        let local_addr = listener.local_addr().map_err(|e| ServerError::Bind {
            addr: config.bind_addr(),
            error: e.to_string(),
        })?;

        let hub = BroadcastHub::new(HubConfig {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            write_timeout: config.write_timeout(),
        });

        let server = TelemetryServer::new(hub.clone(), cancel.clone());
        let server = tokio::spawn(async move { server.run(listener).await });

        let poller = Poller::new(source, config.enabled_channels(), config.read_timeout())
            .with_precision(config.precision);
        let poller = spawn_poller(poller, hub.clone(), config.update_interval(), cancel.clone());

        info!(
            addr = %local_addr,
            channels = config.enabled_channels().len(),
            debug = config.debug,
            "Daemon started"
        );

        Ok(Self {
            local_addr,
            hub,
            cancel,
            poller,
            server,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The broadcast hub.
    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// Waits until the daemon stops.
    ///
    /// If either task ends (a lost measurement source, typically), the
    /// other is cancelled too. Returns the first error.
    pub async fn wait(self) -> Result<(), DaemonError> {
        let Self {
            cancel,
            mut poller,
            mut server,
            ..
        } = self;

        tokio::select! {
            polled = &mut poller => {
                cancel.cancel();
                let served = server.await;
                polled??;
                served??;
            }
            served = &mut server => {
                cancel.cancel();
                let polled = poller.await;
                served??;
                polled??;
            }
        }

        Ok(())
    }
}
