//! Error types for the balance ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
///
/// Almost every variant aborts the current event stream. The ledger is rebuilt
/// by replaying from genesis, so the host restarts the replay instead of
/// attempting local recovery.
#[derive(Error, Debug)]
pub enum Error {
    /// Token address has no registry entry (unknown name or decimals)
    #[error("Unknown token: {0}")]
    UnknownToken(String),

    /// Raw amount cannot be represented at the token's precision
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Balance update would leave a holder below zero
    #[error("Negative balance for {holder}: {balance}")]
    NegativeBalance {
        /// Holder account id
        holder: String,
        /// Resulting (rejected) balance
        balance: String,
    },

    /// A record the ledger expected to exist is missing
    #[error("Missing record: {0}")]
    MissingRecord(String),

    /// Transaction log entry already written under this id
    #[error("Duplicate transaction log entry: {0}")]
    DuplicateEntry(String),

    /// Invariant violation (decimals mismatch, inconsistent snapshot, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Malformed input event
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// External balance source failed
    #[error("Balance oracle error: {0}")]
    Oracle(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Ledger stopped after an earlier fatal error
    #[error("Ledger halted: {0}")]
    Halted(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    /// Whether the event stream must stop after this error
    ///
    /// Mailbox failures are transport problems of the caller, not ledger state
    /// corruption.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Concurrency(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidEvent(err.to_string())
    }
}
