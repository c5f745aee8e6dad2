//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Olympus token table shipped with the crate
const OLYMPUS_TOML: &str = include_str!("../ledger.toml");

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Chain every configured token lives on
    pub chain: String,

    /// JSON-lines event file replayed by `ledger-replay`
    pub events_path: Option<PathBuf>,

    /// JSON balance file backing the offline balance oracle
    pub oracle_path: Option<PathBuf>,

    /// Holders ignored for every token (the zero address is always ignored)
    pub ignored_addresses: Vec<String>,

    /// Known tokens
    pub tokens: Vec<TokenConfig>,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Backfill cadence
    pub backfill: BackfillConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/balance-ledger"),
            service_name: "balance-ledger".to_string(),
            chain: "Ethereum".to_string(),
            events_path: None,
            oracle_path: None,
            ignored_addresses: Vec::new(),
            tokens: Vec::new(),
            rocksdb: RocksDBConfig::default(),
            backfill: BackfillConfig::default(),
        }
    }
}

/// Static metadata of one token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Display name (part of the token id)
    pub name: String,

    /// Contract address
    pub address: String,

    /// Decimal precision of raw amounts
    pub decimals: u32,

    /// Holder balances change without transfers and need reconciliation
    #[serde(default)]
    pub rebasing: bool,

    /// Reconcile every N blocks (rebasing tokens only)
    #[serde(default = "default_rebase_interval_blocks")]
    pub rebase_interval_blocks: u64,

    /// Staking contract exempt from the non-negative balance check
    #[serde(default)]
    pub staking_contract: Option<String>,

    /// Ignore the token's own contract as a holder
    #[serde(default = "default_true")]
    pub ignore_own_address: bool,

    /// Additional holders ignored for this token
    #[serde(default)]
    pub ignored_holders: Vec<String>,
}

impl TokenConfig {
    /// Plain (non-rebasing) token
    pub fn new(name: impl Into<String>, address: impl Into<String>, decimals: u32) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            decimals,
            rebasing: false,
            rebase_interval_blocks: default_rebase_interval_blocks(),
            staking_contract: None,
            ignore_own_address: true,
            ignored_holders: Vec::new(),
        }
    }

    /// Mark as rebasing, reconciled every `interval_blocks`
    pub fn rebasing(mut self, interval_blocks: u64) -> Self {
        self.rebasing = true;
        self.rebase_interval_blocks = interval_blocks;
        self
    }

    /// Set the staking contract
    pub fn with_staking_contract(mut self, address: impl Into<String>) -> Self {
        self.staking_contract = Some(address.into());
        self
    }
}

fn default_rebase_interval_blocks() -> u64 {
    // 8 hours of 12 second blocks
    8 * 60 * 60 / 12
}

fn default_true() -> bool {
    true
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Backfill cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackfillConfig {
    /// Check for unbackfilled days every N blocks
    pub interval_blocks: u64,

    /// Catch up before the first balance change of a new day
    pub before_first_event_of_day: bool,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            interval_blocks: 3600,
            before_first_event_of_day: true,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// gOHM, OHM V1/V2 and sOHM V1/V2/V3 on Ethereum, with every token
    /// contract ignored as a holder
    pub fn olympus() -> crate::Result<Self> {
        Self::from_toml(OLYMPUS_TOML)
    }

    /// Apply environment variable overrides
    pub fn with_env(mut self) -> Self {
        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(path) = std::env::var("LEDGER_EVENTS_FILE") {
            self.events_path = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("LEDGER_ORACLE_FILE") {
            self.oracle_path = Some(PathBuf::from(path));
        }

        if let Ok(chain) = std::env::var("LEDGER_CHAIN") {
            self.chain = chain;
        }

        self
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        Ok(Config::default().with_env())
    }
}
