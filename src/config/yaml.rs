//! YAML configuration parsing.
//!
//! Parses the service configuration (`jobsched.yaml`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::ConfigError;

/// Longest allowed job timeout window (one year).
const MAX_JOB_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// Service configuration.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Number of worker loops pulling jobs.
    pub worker_count: usize,
    /// How long a worker blocks waiting for a runnable job.
    pub poll_timeout_ms: u64,
    /// Interval between two ingestion runs.
    pub ingest_interval_ms: u64,
    /// Maximum number of commands applied per ingestion run.
    pub ingest_batch_size: Option<usize>,
    /// How long `stop` waits for workers to drain.
    pub shutdown_timeout_secs: u64,
    /// Time after which a started job counts as expired.
    pub job_timeout_secs: u64,
    /// Prefix of the requester id given to each worker.
    pub requester_prefix: String,
    /// Storage backend.
    pub storage: StorageConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            poll_timeout_ms: 10_000,
            ingest_interval_ms: 1_000,
            ingest_batch_size: None,
            shutdown_timeout_secs: 60,
            job_timeout_secs: 60 * 60,
            requester_prefix: "requester".to_string(),
            storage: StorageConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Poll timeout as a duration.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Ingest interval as a duration.
    pub fn ingest_interval(&self) -> Duration {
        Duration::from_millis(self.ingest_interval_ms)
    }

    /// Shutdown timeout as a duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Job timeout window for the runnable job finder.
    pub fn job_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_timeout_secs.min(MAX_JOB_TIMEOUT_SECS) as i64)
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// Loader for [`ServiceConfig`] files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<ServiceConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(ServiceConfig::default());
        }
        let config: ServiceConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse(yaml: &str) -> Result<ServiceConfig, ConfigError> {
        // An empty document means all defaults.
        if yaml.trim().is_empty() {
            return Ok(ServiceConfig::default());
        }
        let config: ServiceConfig = serde_yaml::from_str(yaml)?;
        Self::validate(&config)?;
        Ok(config)
    }

    fn validate(config: &ServiceConfig) -> Result<(), ConfigError> {
        if config.worker_count == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker_count must be at least 1".into(),
            ));
        }
        if config.ingest_interval_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "ingest_interval_ms must be at least 1".into(),
            ));
        }
        if config.ingest_batch_size == Some(0) {
            return Err(ConfigError::InvalidConfig(
                "ingest_batch_size cannot be zero".into(),
            ));
        }
        if config.job_timeout_secs == 0 || config.job_timeout_secs > MAX_JOB_TIMEOUT_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "job_timeout_secs must be between 1 and {}",
                MAX_JOB_TIMEOUT_SECS
            )));
        }
        if config.requester_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "requester_prefix must not be empty".into(),
            ));
        }
        if let StorageConfig::Sqlite { path } = &config.storage {
            if path.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "sqlite storage requires a path".into(),
                ));
            }
        }
        Ok(())
    }
}
