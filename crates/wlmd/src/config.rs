//! Server configuration.
//!
//! Loaded once at startup from a JSON or TOML file (chosen by extension)
//! and validated before anything is started. Command-line flags override
//! individual values afterwards.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use wlm_core::{Channel, ChannelIndex};

/// Default TCP port of the telemetry stream.
pub const DEFAULT_PORT: u16 = 50000;

/// Number of channels of the meter when none are configured.
pub const DEFAULT_CHANNEL_COUNT: u32 = 8;

/// Smallest poll period accepted (seconds).
const MIN_UPDATE_RATE: f64 = 0.001;

/// Largest number of decimals used when printing THz values.
const MAX_PRECISION: usize = 15;

#[cfg(windows)]
const DEFAULT_DRIVER_PATH: &str = r"C:\Windows\System32\wlmData.dll";

#[cfg(not(windows))]
const DEFAULT_DRIVER_PATH: &str = "libwlmData.so";

/// Configuration of the telemetry server.
///
/// # Example
///
/// ```toml
/// port = 50000
/// update_rate = 0.1
/// debug = true
///
/// [[channels]]
/// index = 0
/// label = "cooling"
///
/// [[channels]]
/// index = 2
/// label = "unused"
/// enabled = false
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,

    /// Address to bind.
    pub bind_host: String,

    /// Poll period in seconds.
    pub update_rate: f64,

    /// Decimals used when rendering THz values in logs.
    pub precision: usize,

    /// Use the simulated measurement source instead of the driver.
    pub debug: bool,

    /// Meter channels in publish order.
    pub channels: Vec<Channel>,

    /// Bound on a single channel read, in milliseconds.
    pub read_timeout_ms: u64,

    /// Bound on a single session write, in milliseconds.
    pub write_timeout_ms: u64,

    /// Path of the meter driver library.
    pub driver_path: PathBuf,

    /// Seed of the simulated source.
    pub simulation_seed: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind_host: "0.0.0.0".to_string(),
            update_rate: 0.1,
            precision: 11,
            debug: false,
            channels: Channel::defaults(DEFAULT_CHANNEL_COUNT),
            read_timeout_ms: 50,
            write_timeout_ms: 1000,
            driver_path: PathBuf::from(DEFAULT_DRIVER_PATH),
            simulation_seed: 0x5745_4d37,
        }
    }
}

impl ServerConfig {
    /// Returns the default config file location (`<config dir>/wlm/wlmd.toml`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("wlm").join("wlmd.toml"))
    }

    /// Resolves the configuration to use at startup.
    ///
    /// An explicit path must exist. Without one, the default location is
    /// used when present, and built-in defaults otherwise.
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

        let config: Self = if is_toml(path) {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the server relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.update_rate.is_finite() || self.update_rate < MIN_UPDATE_RATE {
            return Err(ConfigError::Invalid(format!(
                "update_rate must be at least {MIN_UPDATE_RATE} s, got {}",
                self.update_rate
            )));
        }
        if Duration::try_from_secs_f64(self.update_rate).is_err() {
            return Err(ConfigError::Invalid(format!(
                "update_rate {} s is out of range",
                self.update_rate
            )));
        }
        if self.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid("read_timeout_ms must be positive".into()));
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid("write_timeout_ms must be positive".into()));
        }
        if self.precision > MAX_PRECISION {
            return Err(ConfigError::Invalid(format!(
                "precision must be at most {MAX_PRECISION}, got {}",
                self.precision
            )));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            if !seen.insert(channel.index) {
                return Err(ConfigError::Invalid(format!(
                    "channel index {} configured twice",
                    channel.index
                )));
            }
        }
        if !self.channels.iter().any(|c| c.enabled) {
            return Err(ConfigError::Invalid("no enabled channels".into()));
        }

        Ok(())
    }

    /// Poll period. Falls back to the fastest allowed rate for a config
    /// that never went through [`validate`](Self::validate).
    pub fn update_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.update_rate.max(MIN_UPDATE_RATE))
            .unwrap_or_else(|_| Duration::from_secs_f64(MIN_UPDATE_RATE))
    }

    /// Bound on a single channel read.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Bound on a single session write.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Enabled channels in publish order.
    pub fn enabled_channels(&self) -> Vec<ChannelIndex> {
        self.channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.index)
            .collect()
    }

    /// Socket address string to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

fn is_toml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("toml"))
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
