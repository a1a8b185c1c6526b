//! Lock client configuration.
//!
//! Lines, server address, reconnect backoff and timeouts. Loaded once at
//! startup from JSON or TOML (by extension) and validated as a whole; a
//! configuration that fails validation is never partially applied.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use wlm_core::LineName;

use crate::client::ClientConfig;
use crate::controller::CorrectionPolicy;

/// Default server address.
pub const DEFAULT_SERVER: &str = "127.0.0.1:50000";

/// Default location of the target store.
pub const DEFAULT_TARGETS_FILE: &str = "target_freq.json";

/// One monitored laser line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineConfig {
    /// Line name, also the key in the target store
    pub name: LineName,

    /// Field position of this line in each telemetry record
    pub channel: usize,

    /// Target used when the store has no entry for this line
    #[serde(default)]
    pub default_target_thz: Option<f64>,

    /// Correction law parameters
    #[serde(default)]
    pub policy: CorrectionPolicy,
}

impl LineConfig {
    fn new(name: &str, channel: usize, target_thz: f64, gain_per_mhz: f64) -> Option<Self> {
        Some(Self {
            name: LineName::new(name).ok()?,
            channel,
            default_target_thz: Some(target_thz),
            policy: CorrectionPolicy {
                gain_per_mhz,
                ..Default::default()
            },
        })
    }
}

/// Configuration of the lock client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
    /// Telemetry server address (`host:port`)
    pub server: String,

    /// Path of the target store
    pub targets: PathBuf,

    /// Initial reconnect delay in milliseconds
    pub retry_initial_delay_ms: u64,

    /// Maximum reconnect delay in milliseconds
    pub retry_max_delay_ms: u64,

    /// Backoff multiplier
    pub retry_multiplier: f64,

    /// Bound on one connection attempt in milliseconds
    pub connect_timeout_ms: u64,

    /// Silence on a streaming connection that counts as loss, in milliseconds
    pub stale_timeout_ms: u64,

    /// Bound on one actuator call in milliseconds
    pub actuator_timeout_ms: u64,

    /// Output range of the simulated actuator
    pub actuator_range: f64,

    /// Period of the status log line in seconds (0 disables it)
    pub status_interval_secs: u64,

    /// Decimals used when rendering THz values
    pub precision: usize,

    /// Monitored lines
    pub lines: Vec<LineConfig>,
}

impl Default for LockConfig {
    fn default() -> Self {
        let lines = [
            LineConfig::new("cooling", 0, 710.962460, 0.0002),
            LineConfig::new("ionization", 1, 650.503800, 0.0001),
            LineConfig::new("repumper", 2, 274.589035, 0.0002),
            LineConfig::new("clock", 3, 444.777000, 0.0002),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self {
            server: DEFAULT_SERVER.to_string(),
            targets: PathBuf::from(DEFAULT_TARGETS_FILE),
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            retry_multiplier: 2.0,
            connect_timeout_ms: 3_000,
            stale_timeout_ms: 5_000,
            actuator_timeout_ms: 500,
            actuator_range: 10.0,
            status_interval_secs: 10,
            precision: 8,
            lines,
        }
    }
}

impl LockConfig {
    /// Returns the default config file location (`<config dir>/wlm/wlm-lock.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("wlm").join("wlm-lock.toml"))
    }

    /// Resolves the configuration to use at startup.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::load(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let parse_error = |error: String| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        };

        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let config: Self = if is_toml {
            toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        } else {
            serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration as a whole.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.trim().is_empty() {
            return Err(ConfigError::Invalid("server address is empty".into()));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "retry_multiplier must be at least 1.0, got {}",
                self.retry_multiplier
            )));
        }
        if self.retry_initial_delay_ms == 0 || self.retry_max_delay_ms < self.retry_initial_delay_ms
        {
            return Err(ConfigError::Invalid(
                "retry delays must be positive and max >= initial".into(),
            ));
        }
        for (name, value) in [
            ("connect_timeout_ms", self.connect_timeout_ms),
            ("stale_timeout_ms", self.stale_timeout_ms),
            ("actuator_timeout_ms", self.actuator_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if !self.actuator_range.is_finite() || self.actuator_range <= 0.0 {
            return Err(ConfigError::Invalid("actuator_range must be positive".into()));
        }
        if self.lines.is_empty() {
            return Err(ConfigError::Invalid("no lines configured".into()));
        }

        let mut names = HashSet::new();
        let mut channels = HashSet::new();
        for line in &self.lines {
            if !names.insert(&line.name) {
                return Err(ConfigError::Invalid(format!(
                    "line '{}' configured twice",
                    line.name
                )));
            }
            if !channels.insert(line.channel) {
                return Err(ConfigError::Invalid(format!(
                    "channel {} mapped to more than one line",
                    line.channel
                )));
            }
            if let Some(target) = line.default_target_thz {
                if !target.is_finite() || target <= 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "line '{}': default_target_thz must be positive",
                        line.name
                    )));
                }
            }
            line.policy
                .validate()
                .map_err(|e| ConfigError::Invalid(format!("line '{}': {e}", line.name)))?;
        }

        Ok(())
    }

    /// Settings for the ingestion client.
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server: self.server.clone(),
            retry_initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
            retry_multiplier: self.retry_multiplier,
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            stale_timeout: Duration::from_millis(self.stale_timeout_ms),
            ..Default::default()
        }
    }

    /// Bound on one actuator call.
    pub fn actuator_timeout(&self) -> Duration {
        Duration::from_millis(self.actuator_timeout_ms)
    }

    /// Period of the status log line, if enabled.
    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}
