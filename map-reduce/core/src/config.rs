// Copyright 2025 Umberto Gotti <umberto.gotti@umbertogotti.dev>
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use crate::error::{MapReduceError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_CONTROL_PORT: u16 = 5000;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Static `host:port` list shared by every node
    pub registry_path: PathBuf,
    /// Directory where the coordinator materializes `split<i>.wet` files
    pub splits_dir: PathBuf,
    /// How long the coordinator waits for workers to register (0 = forever)
    pub registration_timeout_ms: u64,
    /// Maximum time for one phase barrier (0 = no timeout)
    pub phase_timeout_ms: u64,
    pub top_k: usize,
    /// Optional JSON dump of the final histogram
    pub output_path: Option<PathBuf>,
    /// Tokenizer threads per split on a worker
    pub map_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from("workers.txt"),
            splits_dir: PathBuf::from("splits"),
            registration_timeout_ms: 30_000,
            phase_timeout_ms: 0,
            top_k: 20,
            output_path: None,
            map_threads: 1,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| MapReduceError::io(path, e))?;
        let config: Config = serde_json::from_str(&contents).map_err(|e| {
            MapReduceError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise falls back to the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(MapReduceError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                warn!(
                    "config file {} not found, using default configuration",
                    path.display()
                );
                Ok(Config::default())
            }
            Err(e) => Err(e),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(MapReduceError::Config("top_k must be at least 1".into()));
        }
        if self.map_threads == 0 {
            return Err(MapReduceError::Config(
                "map_threads must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn registration_timeout(&self) -> Option<Duration> {
        (self.registration_timeout_ms > 0)
            .then(|| Duration::from_millis(self.registration_timeout_ms))
    }

    pub fn phase_timeout(&self) -> Option<Duration> {
        (self.phase_timeout_ms > 0).then(|| Duration::from_millis(self.phase_timeout_ms))
    }

    pub fn print_summary(&self) {
        info!("Configuration:");
        info!("  - Host registry: {}", self.registry_path.display());
        info!("  - Splits directory: {}", self.splits_dir.display());
        match self.registration_timeout() {
            Some(timeout) => info!("  - Registration timeout: {}ms", timeout.as_millis()),
            None => info!("  - Registration timeout: none"),
        }
        if let Some(timeout) = self.phase_timeout() {
            info!("  - Phase timeout: {}ms", timeout.as_millis());
        }
        info!("  - Top K: {}", self.top_k);
        if self.map_threads > 1 {
            info!("  - Map threads per worker: {}", self.map_threads);
        }
        if let Some(output) = &self.output_path {
            info!("  - Histogram output: {}", output.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults_for_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapreduce.json");
        fs::write(&path, r#"{ "top_k": 5, "phase_timeout_ms": 1000 }"#).unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.top_k, 5);
        assert_eq!(config.phase_timeout(), Some(Duration::from_millis(1000)));
        assert_eq!(config.registry_path, PathBuf::from("workers.txt"));
        assert_eq!(config.map_threads, 1);
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();

        let config = Config::load_or_default(dir.path().join("absent.json")).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_malformed_or_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            Config::load_or_default(&path),
            Err(MapReduceError::Config(_))
        ));

        fs::write(&path, r#"{ "map_threads": 0 }"#).unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_zero_timeouts_mean_none() {
        let config = Config {
            registration_timeout_ms: 0,
            ..Config::default()
        };

        assert_eq!(config.registration_timeout(), None);
        assert_eq!(config.phase_timeout(), None);
    }
}
