//! Configuration for the point ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Upper bound on any user's balance
    pub max_balance: u64,

    /// Mutation gate configuration
    pub gate: GateConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "point-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            max_balance: 1_000,
            gate: GateConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Mutation gate configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Maximum wait for a per-user lock (milliseconds). Unbounded when unset.
    pub acquire_timeout_ms: Option<u64>,
}

impl GateConfig {
    /// Acquisition timeout as a duration
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local tables
    Memory,
    /// RocksDB on `data_dir`
    RocksDb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend to open
    pub backend: StorageBackend,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Random per-call delay injected by the memory backend
    pub simulated_latency: Option<LatencyConfig>,

    /// RocksDB tuning
    pub rocksdb: RocksDBConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: PathBuf::from("./data/points"),
            simulated_latency: None,
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// Simulated store latency range (milliseconds, inclusive)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LatencyConfig {
    /// Lower bound
    pub min_ms: u64,
    /// Upper bound
    pub max_ms: u64,
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 2,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(max) = std::env::var("POINT_MAX_BALANCE") {
            config.max_balance = max
                .parse()
                .map_err(|e| crate::Error::Config(format!("POINT_MAX_BALANCE: {}", e)))?;
        }

        if let Ok(timeout) = std::env::var("POINT_ACQUIRE_TIMEOUT_MS") {
            let ms = timeout
                .parse()
                .map_err(|e| crate::Error::Config(format!("POINT_ACQUIRE_TIMEOUT_MS: {}", e)))?;
            config.gate.acquire_timeout_ms = Some(ms);
        }

        if let Ok(backend) = std::env::var("POINT_STORAGE_BACKEND") {
            config.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::RocksDb,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown storage backend: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(data_dir) = std::env::var("POINT_DATA_DIR") {
            config.storage.data_dir = PathBuf::from(data_dir);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_balance == 0 {
            return Err(crate::Error::Config(
                "max_balance must be positive".to_string(),
            ));
        }

        if let Some(latency) = self.storage.simulated_latency {
            if latency.min_ms > latency.max_ms {
                return Err(crate::Error::Config(format!(
                    "simulated latency range is empty: {} > {}",
                    latency.min_ms, latency.max_ms
                )));
            }
        }

        Ok(())
    }
}
