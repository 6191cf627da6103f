//! Configuration types for the engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;

/// Default number of concurrent transfer workers.
pub const DEFAULT_WORKERS: usize = 1;

/// Default fraction of a run's transactions dispatched per batch.
pub const DEFAULT_SPLIT_RATIO: f64 = 0.1;

/// Environment variable names read by `EngineConfig::from_env`.
pub const ENV_WORKERS: &str = "FORWARD_WORKERS";
pub const ENV_SPLIT_RATIO: &str = "FORWARD_SPLIT_RATIO";
pub const ENV_CHECKSUM: &str = "FORWARD_CHECKSUM";
pub const ENV_DB_PATH: &str = "FORWARD_DB_PATH";

/// Configuration for a job manager and its transfer agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent transfer workers; 1 runs sequentially
    pub workers: usize,

    /// Batch split ratio in (0, 1]. Each batch holds about
    /// `split_ratio * pending` transactions.
    pub split_ratio: f64,

    /// Digest handed to the destination; `None` disables checksumming
    pub checksum: Option<ChecksumAlgorithm>,

    /// Location of the JSON job store
    pub db_path: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            split_ratio: DEFAULT_SPLIT_RATIO,
            checksum: Some(ChecksumAlgorithm::Sha256),
            db_path: default_db_path(),
        }
    }
}

/// `~/.cache/forward.json`, or `forward.json` in the working directory without a home.
fn default_db_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".cache").join("forward.json"))
        .unwrap_or_else(|| PathBuf::from("forward.json"))
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `FORWARD_*` environment variables.
    ///
    /// `FORWARD_CHECKSUM` accepts an algorithm name or `none`.
    pub fn from_env() -> Result<Self, EngineError> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var(ENV_WORKERS) {
            config.workers = value
                .parse()
                .map_err(|_| EngineError::Validation(format!("{}='{}' is not a count", ENV_WORKERS, value)))?;
        }
        if let Ok(value) = std::env::var(ENV_SPLIT_RATIO) {
            config.split_ratio = value.parse().map_err(|_| {
                EngineError::Validation(format!("{}='{}' is not a number", ENV_SPLIT_RATIO, value))
            })?;
        }
        if let Ok(value) = std::env::var(ENV_CHECKSUM) {
            config.checksum = parse_checksum(&value)?;
        }
        if let Some(value) = std::env::var_os(ENV_DB_PATH) {
            config.db_path = PathBuf::from(value);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the number of transfer workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the batch split ratio.
    pub fn with_split_ratio(mut self, split_ratio: f64) -> Self {
        self.split_ratio = split_ratio;
        self
    }

    /// Set the checksum algorithm, or disable checksumming with `None`.
    pub fn with_checksum(mut self, checksum: Option<ChecksumAlgorithm>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Set the job store location.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.workers == 0 {
            return Err(EngineError::Validation("workers must be at least 1".to_string()));
        }
        if !(self.split_ratio > 0.0 && self.split_ratio <= 1.0) {
            return Err(EngineError::Validation(format!(
                "split_ratio must be in (0, 1], got {}",
                self.split_ratio
            )));
        }
        Ok(())
    }
}

/// Parse a checksum setting: an algorithm name, or `none`/`off` to disable.
pub fn parse_checksum(value: &str) -> Result<Option<ChecksumAlgorithm>, EngineError> {
    match value.to_lowercase().as_str() {
        "none" | "off" | "" => Ok(None),
        other => ChecksumAlgorithm::parse(other).map(Some).ok_or_else(|| {
            EngineError::Validation(format!(
                "Invalid checksum algorithm '{}'. Must be 'sha256', 'md5' or 'none'",
                value
            ))
        }),
    }
}
