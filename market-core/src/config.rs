//! Configuration for the marketplace

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Marketplace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Bound of the actor mailbox (backpressure)
    pub mailbox_capacity: usize,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Event log configuration
    pub event_log: EventLogConfig,

    /// Opening balances for the in-memory settlement book
    #[serde(default)]
    pub settlement: SettlementConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/market"),
            service_name: "market-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            mailbox_capacity: 1000,
            rocksdb: RocksDBConfig::default(),
            event_log: EventLogConfig::default(),
            settlement: SettlementConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Event log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogConfig {
    /// Live broadcast buffer; slower subscribers back-fill from storage
    pub channel_capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Settlement book configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Opening balance per account
    #[serde(default)]
    pub accounts: BTreeMap<String, Decimal>,
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("MARKET_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(capacity) = std::env::var("MARKET_MAILBOX_CAPACITY") {
            config.mailbox_capacity = parse_capacity("MARKET_MAILBOX_CAPACITY", &capacity)?;
        }

        if let Ok(capacity) = std::env::var("MARKET_EVENT_CHANNEL_CAPACITY") {
            config.event_log.channel_capacity =
                parse_capacity("MARKET_EVENT_CHANNEL_CAPACITY", &capacity)?;
        }

        Ok(config)
    }
}

fn parse_capacity(name: &str, value: &str) -> crate::Result<usize> {
    match value.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(crate::Error::Config(format!(
            "{} must be a positive integer, got {:?}",
            name, value
        ))),
    }
}
