//! Persisted target frequencies.
//!
//! The store is a JSON object mapping line name to target in THz:
//!
//! ```json
//! { "cooling": 710.96246, "clock": 444.777 }
//! ```
//!
//! It is read once at startup and rewritten wholesale on explicit save.
//! Saving writes a temporary file next to the store and renames it over
//! the old one, so a crash never leaves a truncated file behind.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use wlm_core::{Frequency, LineName};

use crate::config::LineConfig;

/// Errors of the target store.
#[derive(Debug, Error)]
pub enum TargetStoreError {
    #[error("Failed to read targets {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse targets {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid target for '{line}': {reason}")]
    InvalidTarget { line: String, reason: String },

    #[error("No target for line '{0}' (add it to the store or set default_target_thz)")]
    MissingTarget(LineName),

    #[error("Failed to write targets {path}: {error}")]
    Write { path: PathBuf, error: String },
}

/// Target frequencies keyed by line name.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetStore {
    path: PathBuf,
    targets: BTreeMap<LineName, Frequency>,
}

impl TargetStore {
    /// Creates an empty store that will be saved to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            targets: BTreeMap::new(),
        }
    }

    /// Loads the store. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, TargetStoreError> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Target store not found, starting empty");
                return Ok(Self::empty(path));
            }
            Err(e) => {
                return Err(TargetStoreError::Read {
                    path,
                    error: e.to_string(),
                })
            }
        };

        let raw: BTreeMap<String, f64> =
            serde_json::from_str(&content).map_err(|e| TargetStoreError::Parse {
                path: path.clone(),
                error: e.to_string(),
            })?;

        let mut targets = BTreeMap::new();
        for (name, thz) in raw {
            let line = LineName::new(name.clone()).map_err(|e| TargetStoreError::InvalidTarget {
                line: name.clone(),
                reason: e.to_string(),
            })?;
            let target = Frequency::from_thz(thz).map_err(|e| TargetStoreError::InvalidTarget {
                line: name,
                reason: e.to_string(),
            })?;
            targets.insert(line, target);
        }

        debug!(path = %path.display(), entries = targets.len(), "Loaded target store");
        Ok(Self { path, targets })
    }

    /// Path the store is saved to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, line: &LineName) -> Option<Frequency> {
        self.targets.get(line).copied()
    }

    pub fn set(&mut self, line: LineName, target: Frequency) {
        self.targets.insert(line, target);
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Resolves the starting target of every configured line.
    ///
    /// A store entry wins over the line's default. Fails if any line has
    /// neither, so a run never starts with a partial set of targets.
    pub fn resolve(&self, lines: &[LineConfig]) -> Result<Vec<Frequency>, TargetStoreError> {
        lines
            .iter()
            .map(|line| match self.get(&line.name) {
                Some(target) => Ok(target),
                None => match line.default_target_thz {
                    Some(thz) => {
                        Frequency::from_thz(thz).map_err(|e| TargetStoreError::InvalidTarget {
                            line: line.name.to_string(),
                            reason: e.to_string(),
                        })
                    }
                    None => Err(TargetStoreError::MissingTarget(line.name.clone())),
                },
            })
            .collect()
    }

    /// Rewrites the whole store atomically.
    pub fn save(&self) -> Result<(), TargetStoreError> {
        let raw: BTreeMap<&str, f64> = self
            .targets
            .iter()
            .map(|(line, target)| (line.as_str(), target.as_thz()))
            .collect();
        let json = serde_json::to_string_pretty(&raw).map_err(|e| self.write_error(e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;
            }
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json.as_bytes()).map_err(|e| self.write_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.write_error(e))?;

        info!(path = %self.path.display(), entries = self.targets.len(), "Saved targets");
        Ok(())
    }

    fn write_error(&self, error: impl std::fmt::Display) -> TargetStoreError {
        TargetStoreError::Write {
            path: self.path.clone(),
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::CorrectionPolicy;

    fn line(name: &str) -> LineName {
        LineName::new(name).unwrap()
    }

    fn line_config(name: &str, channel: usize, default: Option<f64>) -> LineConfig {
        LineConfig {
            name: line(name),
            channel,
            default_target_thz: default,
            policy: CorrectionPolicy::default(),
        }
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = TargetStore::load(dir.path().join("target_freq.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_load_and_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target_freq.json");
        fs::write(&path, r#"{"cooling": 710.96246, "clock": 444.777}"#).unwrap();

        let store = TargetStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&line("cooling")).unwrap().units(), 71_096_246_000);
        assert_eq!(store.get(&line("repumper")), None);
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target_freq.json");
        fs::write(&path, r#"{"cooling": "fast"}"#).unwrap();
        assert!(matches!(
            TargetStore::load(&path),
            Err(TargetStoreError::Parse { .. })
        ));

        fs::write(&path, r#"{"cooling": -1.0}"#).unwrap();
        assert!(matches!(
            TargetStore::load(&path),
            Err(TargetStoreError::InvalidTarget { .. })
        ));
    }

    #[test]
    fn test_resolve_prefers_store_over_default() {
        let mut store = TargetStore::empty("unused.json");
        store.set(line("cooling"), Frequency::from_thz(710.9625).unwrap());

        let lines = vec![
            line_config("cooling", 0, Some(710.96246)),
            line_config("clock", 3, Some(444.777)),
        ];
        let targets = store.resolve(&lines).unwrap();
        assert_eq!(targets[0], Frequency::from_thz(710.9625).unwrap());
        assert_eq!(targets[1], Frequency::from_thz(444.777).unwrap());
    }

    #[test]
    fn test_resolve_fails_without_target() {
        let store = TargetStore::empty("unused.json");
        let lines = vec![
            line_config("cooling", 0, Some(710.96246)),
            line_config("mystery", 5, None),
        ];
        let err = store.resolve(&lines).unwrap_err();
        assert!(matches!(err, TargetStoreError::MissingTarget(ref l) if l.as_str() == "mystery"));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("target_freq.json");

        let mut store = TargetStore::empty(&path);
        store.set(line("cooling"), Frequency::from_thz(710.96246).unwrap());
        store.set(line("repumper"), Frequency::from_thz(274.589035).unwrap());
        store.save().unwrap();

        let reloaded = TargetStore::load(&path).unwrap();
        assert_eq!(reloaded, store);
        assert!(!dir.path().join("nested").join("target_freq.json.tmp").exists());
    }
}
