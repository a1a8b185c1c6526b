//! Lock service: one ingestion client feeding one task per line.
//!
//! `LockService` wires the pieces together and is what the binary and the
//! integration tests drive. It owns the target store, translates console
//! commands into line commands and guarantees that every line ends up
//! `Unlocked` when the service shuts down.

use std::fmt::Write as _;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use wlm_core::LineName;

use crate::actuator::Actuator;
use crate::client::{spawn_client, ConnectionStatus, IngestionClient};
use crate::config::LockConfig;
use crate::console::{ConsoleCommand, LineSelector, HELP};
use crate::controller::LineStatus;
use crate::line::{spawn_line, LineError, LineHandle};
use crate::targets::{TargetStore, TargetStoreError};

/// Errors surfaced to the operator.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Unknown line '{0}'")]
    UnknownLine(LineName),

    #[error(transparent)]
    Line(#[from] LineError),

    #[error(transparent)]
    Targets(#[from] TargetStoreError),
}

/// Result of a console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Text to show the operator
    Reply(String),

    /// The operator asked to exit
    Quit,
}

/// Running lock service.
pub struct LockService {
    server: String,
    precision: usize,
    client: Arc<IngestionClient>,
    client_task: JoinHandle<()>,
    lines: Vec<LineHandle>,
    line_tasks: Vec<JoinHandle<()>>,
    store: TargetStore,
    cancel: CancellationToken,
}

impl LockService {
    /// Resolves targets and starts the client and all line tasks.
    ///
    /// Nothing is spawned if any line lacks a target.
    ///
    /// # Errors
    ///
    /// - `ServiceError::Targets` if a configured line has no usable target
    pub fn start(
        config: &LockConfig,
        store: TargetStore,
        actuator: Arc<dyn Actuator>,
        shutdown: &CancellationToken,
    ) -> Result<Self, ServiceError> {
        let targets = store.resolve(&config.lines)?;
        let cancel = shutdown.child_token();

        let client = Arc::new(IngestionClient::new(config.client_config(), cancel.clone()));

        let mut lines = Vec::with_capacity(config.lines.len());
        let mut line_tasks = Vec::with_capacity(config.lines.len());
        for (line, target) in config.lines.iter().zip(targets) {
            let (handle, task) = spawn_line(
                line,
                target,
                Arc::clone(&actuator),
                client.records(),
                config.actuator_timeout(),
                cancel.clone(),
            );
            lines.push(handle);
            line_tasks.push(task);
        }

        let client_task = spawn_client(Arc::clone(&client));

        info!(
            server = %config.server,
            lines = lines.len(),
            "Lock service started"
        );

        Ok(Self {
            server: config.server.clone(),
            precision: config.precision,
            client,
            client_task,
            lines,
            line_tasks,
            store,
            cancel,
        })
    }

    /// Handles of all lines, in configuration order.
    pub fn lines(&self) -> &[LineHandle] {
        &self.lines
    }

    pub fn line(&self, name: &LineName) -> Option<&LineHandle> {
        self.lines.iter().find(|h| h.line() == name)
    }

    /// Subscribes to the connection status of the ingestion client.
    pub fn connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.client.status()
    }

    pub fn store(&self) -> &TargetStore {
        &self.store
    }

    /// Executes one console command.
    ///
    /// # Errors
    ///
    /// - `ServiceError::UnknownLine` if the command names a line that is not configured
    /// - `ServiceError::Line` if a line task has stopped
    /// - `ServiceError::Targets` if saving fails
    pub async fn execute(&mut self, command: ConsoleCommand) -> Result<Outcome, ServiceError> {
        let reply = match command {
            ConsoleCommand::Status => self.status_report().await?,
            ConsoleCommand::Lock(selector) => self.set_enabled(&selector, true).await?,
            ConsoleCommand::Unlock(selector) => self.set_enabled(&selector, false).await?,
            ConsoleCommand::Target(name, target) => {
                let status = self.handle(&name)?.set_target(target).await?;
                format!(
                    "{} target {}",
                    status.line,
                    status.state.target.format_thz(self.precision)
                )
            }
            ConsoleCommand::Reset(selector) => {
                let mut reply = String::new();
                for handle in self.select(&selector)? {
                    let status = handle.reset().await?;
                    let _ = writeln!(reply, "{} reset", status.line);
                }
                reply.trim_end().to_string()
            }
            ConsoleCommand::Save => self.save().await?,
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => return Ok(Outcome::Quit),
        };

        Ok(Outcome::Reply(reply))
    }

    /// Writes the current target of every line to the store.
    async fn save(&mut self) -> Result<String, ServiceError> {
        for handle in &self.lines {
            let status = handle.status().await?;
            self.store.set(status.line, status.state.target);
        }
        self.store.save()?;
        Ok(format!(
            "saved {} targets to {}",
            self.store.len(),
            self.store.path().display()
        ))
    }

    async fn set_enabled(
        &self,
        selector: &LineSelector,
        enabled: bool,
    ) -> Result<String, ServiceError> {
        let mut reply = String::new();
        for handle in self.select(selector)? {
            let status = handle.set_enabled(enabled).await?;
            let _ = writeln!(reply, "{} {}", status.line, status.mode);
        }
        Ok(reply.trim_end().to_string())
    }

    /// One line of text per line plus the connection state.
    pub async fn status_report(&self) -> Result<String, ServiceError> {
        let connection = *self.client.status().borrow();
        let mut report = format!(
            "server {} {} (records {})",
            self.server, connection.state, connection.records
        );
        for handle in &self.lines {
            let status = handle.status().await?;
            let _ = write!(report, "\n{}", self.format_status(&status));
        }
        Ok(report)
    }

    /// Logs the last published status of every line.
    pub fn log_status(&self) {
        let connection = *self.client.status().borrow();
        info!(server = %self.server, state = %connection.state, records = connection.records, "Connection");
        for handle in &self.lines {
            let status = handle.latest();
            info!(
                line = %status.line,
                mode = %status.mode,
                locked = status.state.locked,
                error_mhz = ?status.error_mhz,
                fault = ?status.last_fault,
                "Line status"
            );
        }
    }

    /// Stops the client and every line task.
    ///
    /// Returns the final status of each line; all of them are `Unlocked`.
    pub async fn shutdown(self) -> Vec<LineStatus> {
        self.cancel.cancel();

        if let Err(e) = self.client_task.await {
            warn!(error = %e, "Ingestion task ended abnormally");
        }
        for task in self.line_tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Line task ended abnormally");
            }
        }

        let statuses: Vec<LineStatus> = self.lines.iter().map(LineHandle::latest).collect();
        info!(lines = statuses.len(), "Lock service stopped");
        statuses
    }

    fn format_status(&self, status: &LineStatus) -> String {
        let measured = status
            .state
            .measured
            .map(|m| m.format_thz(self.precision))
            .unwrap_or_else(|| "-".to_string());
        let error = status
            .error_mhz
            .map(|e| format!("{e:+.2} MHz"))
            .unwrap_or_else(|| "-".to_string());

        let mut line = format!(
            "{:<12} {:<8} target {}  measured {}  error {}{}",
            status.line.as_str(),
            status.mode.to_string(),
            status.state.target.format_thz(self.precision),
            measured,
            error,
            if status.state.locked { "  [in lock]" } else { "" },
        );
        if let Some(fault) = &status.last_fault {
            let _ = write!(line, "  fault: {fault}");
        }
        line
    }

    fn handle(&self, name: &LineName) -> Result<&LineHandle, ServiceError> {
        self.line(name)
            .ok_or_else(|| ServiceError::UnknownLine(name.clone()))
    }

    fn select(&self, selector: &LineSelector) -> Result<Vec<&LineHandle>, ServiceError> {
        match selector {
            LineSelector::All => Ok(self.lines.iter().collect()),
            LineSelector::One(name) => Ok(vec![self.handle(name)?]),
        }
    }
}
