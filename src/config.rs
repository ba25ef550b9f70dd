use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::{ChunkPlanner, PlannerLimits, MIB};

const ENV_PREFIX: &str = "STORELY_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Cannot parse {key}={value}")]
    BadOverride { key: String, value: String },

    #[error("Malformed config file: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for the transfer coordinators, the registry and the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Base URL of the relay server and file API
    pub relay_base_url: String,

    pub planner: PlannerLimits,

    /// Chunk fetches issued together before waiting for the batch to settle
    pub download_batch_size: usize,

    /// Attempts per chunk fetch, including the first
    pub max_fetch_attempts: u32,

    /// Delay before the first fetch retry; grows exponentially after that
    pub retry_initial_delay_ms: u64,

    /// Concurrent chunk PUTs for direct uploads
    pub upload_concurrency: usize,

    /// Upload history entries kept
    pub registry_capacity: usize,

    pub registry_db_url: String,

    pub request_timeout_secs: u64,

    pub api_bind_addr: SocketAddr,

    /// Largest request body accepted by the upload route
    pub max_upload_bytes: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            relay_base_url: "http://localhost:8080".to_string(),
            planner: PlannerLimits::default(),
            download_batch_size: 10,
            max_fetch_attempts: 3,
            retry_initial_delay_ms: 100,
            upload_concurrency: 4,
            registry_capacity: 50,
            registry_db_url: "sqlite::memory:".to_string(),
            request_timeout_secs: 30,
            api_bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_upload_bytes: 1024 * MIB as usize,
        }
    }
}

impl TransferConfig {
    /// Read a JSON config file; absent keys keep their defaults
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by `STORELY_*` environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STORELY_*` overrides; keys without the prefix are ignored.
    pub fn apply_overrides<I, K, V>(&mut self, vars: I) -> ConfigResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref());
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let bad = || ConfigError::BadOverride {
                key: key.to_string(),
                value: value.to_string(),
            };

            match name {
                "RELAY_BASE_URL" => self.relay_base_url = value.to_string(),
                "DOWNLOAD_BATCH_SIZE" => self.download_batch_size = value.parse().map_err(|_| bad())?,
                "MAX_FETCH_ATTEMPTS" => self.max_fetch_attempts = value.parse().map_err(|_| bad())?,
                "RETRY_INITIAL_DELAY_MS" => {
                    self.retry_initial_delay_ms = value.parse().map_err(|_| bad())?
                }
                "UPLOAD_CONCURRENCY" => self.upload_concurrency = value.parse().map_err(|_| bad())?,
                "REGISTRY_CAPACITY" => self.registry_capacity = value.parse().map_err(|_| bad())?,
                "REGISTRY_DB_URL" => self.registry_db_url = value.to_string(),
                "REQUEST_TIMEOUT_SECS" => {
                    self.request_timeout_secs = value.parse().map_err(|_| bad())?
                }
                "API_BIND_ADDR" => self.api_bind_addr = value.parse().map_err(|_| bad())?,
                "MAX_UPLOAD_BYTES" => self.max_upload_bytes = value.parse().map_err(|_| bad())?,
                _ => tracing::debug!(key, "ignoring unknown config override"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.download_batch_size == 0 {
            return Err(ConfigError::Invalid("download_batch_size must be > 0".into()));
        }
        if self.max_fetch_attempts == 0 {
            return Err(ConfigError::Invalid("max_fetch_attempts must be > 0".into()));
        }
        if self.upload_concurrency == 0 {
            return Err(ConfigError::Invalid("upload_concurrency must be > 0".into()));
        }
        if self.registry_capacity == 0 {
            return Err(ConfigError::Invalid("registry_capacity must be > 0".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be > 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be > 0".into()));
        }
        ChunkPlanner::new(self.planner)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_initial_delay(&self) -> Duration {
        Duration::from_millis(self.retry_initial_delay_ms)
    }
}
