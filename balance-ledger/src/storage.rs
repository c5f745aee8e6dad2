//! Repository abstraction and its backends
//!
//! The ledger only needs `get`, `put` and `delete` keyed by the derivable
//! record ids. Values are bincode-encoded in every backend.
//!
//! # Collections
//!
//! - `tokens` - Token records (key: `{name}/{chain}`)
//! - `holders` - Holder accounts (key: `{token}/{address}`)
//! - `transactions` - Append-only transaction log (key: `{holder}/{tx}/{pos}`)
//! - `daily_balances` - Per-day holder balances (key: `{holder}/{day}`)
//! - `snapshots` - Per-day token snapshots (key: `{token}/{day}`)

use crate::{
    error::{Error, Result},
    types::{DailyBalanceRecord, DailySnapshot, HolderAccount, Token, TransactionLogEntry},
    Config,
};
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Record collections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// Token records
    Tokens,
    /// Holder accounts
    Holders,
    /// Transaction log entries
    Transactions,
    /// Daily balance records
    DailyBalances,
    /// Daily snapshots
    Snapshots,
}

impl Collection {
    /// Every collection
    pub const ALL: [Collection; 5] = [
        Collection::Tokens,
        Collection::Holders,
        Collection::Transactions,
        Collection::DailyBalances,
        Collection::Snapshots,
    ];

    /// Storage name (RocksDB column family)
    pub fn name(&self) -> &'static str {
        match self {
            Collection::Tokens => "tokens",
            Collection::Holders => "holders",
            Collection::Transactions => "transactions",
            Collection::DailyBalances => "daily_balances",
            Collection::Snapshots => "snapshots",
        }
    }
}

/// A persisted record with a stable id
pub trait Record: Serialize + DeserializeOwned {
    /// Collection the record lives in
    const COLLECTION: Collection;

    /// Record id
    fn id(&self) -> &str;
}

impl Record for Token {
    const COLLECTION: Collection = Collection::Tokens;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for HolderAccount {
    const COLLECTION: Collection = Collection::Holders;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for TransactionLogEntry {
    const COLLECTION: Collection = Collection::Transactions;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for DailyBalanceRecord {
    const COLLECTION: Collection = Collection::DailyBalances;

    fn id(&self) -> &str {
        &self.id
    }
}

impl Record for DailySnapshot {
    const COLLECTION: Collection = Collection::Snapshots;

    fn id(&self) -> &str {
        &self.id
    }
}

/// Keyed record store
pub trait Repository {
    /// Load a record
    fn get<T: Record>(&self, id: &str) -> Result<Option<T>>;

    /// Create or overwrite a record
    fn put<T: Record>(&self, record: &T) -> Result<()>;

    /// Remove a record (no-op when absent)
    fn delete<T: Record>(&self, id: &str) -> Result<()>;

    /// Load a record that must exist
    fn require<T: Record>(&self, id: &str) -> Result<T> {
        self.get(id)?.ok_or_else(|| {
            Error::MissingRecord(format!("{} {}", T::COLLECTION.name(), id))
        })
    }
}

fn encode<T: Record>(record: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(record)?)
}

fn decode<T: Record>(bytes: &[u8]) -> Result<T> {
    Ok(bincode::deserialize(bytes)?)
}

/// In-memory repository
#[derive(Debug, Default)]
pub struct MemoryRepository {
    collections: RwLock<HashMap<Collection, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryRepository {
    /// Create empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a collection
    pub fn count(&self, collection: Collection) -> usize {
        self.collections
            .read()
            .get(&collection)
            .map(|records| records.len())
            .unwrap_or(0)
    }

    /// Record ids of a collection in key order
    pub fn ids(&self, collection: Collection) -> Vec<String> {
        self.collections
            .read()
            .get(&collection)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Repository for MemoryRepository {
    fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let collections = self.collections.read();
        match collections.get(&T::COLLECTION).and_then(|records| records.get(id)) {
            Some(bytes) => decode(bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put<T: Record>(&self, record: &T) -> Result<()> {
        let bytes = encode(record)?;
        self.collections
            .write()
            .entry(T::COLLECTION)
            .or_default()
            .insert(record.id().to_string(), bytes);
        Ok(())
    }

    fn delete<T: Record>(&self, id: &str) -> Result<()> {
        if let Some(records) = self.collections.write().get_mut(&T::COLLECTION) {
            records.remove(id);
        }
        Ok(())
    }
}

/// RocksDB repository, one column family per collection
pub struct RocksRepository {
    db: DB,
}

impl std::fmt::Debug for RocksRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksRepository")
            .field("path", &self.db.path())
            .finish_non_exhaustive()
    }
}

impl RocksRepository {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = Collection::ALL
            .iter()
            .map(|collection| ColumnFamilyDescriptor::new(collection.name(), Self::cf_options(*collection)))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(
            path = ?path,
            column_families = Collection::ALL.len(),
            "Opened RocksDB repository"
        );

        Ok(Self { db })
    }

    fn cf_options(collection: Collection) -> Options {
        let mut opts = Options::default();
        match collection {
            // Append-only and rarely read back
            Collection::Transactions => {
                opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
                opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
            }
            // Point lookups on every event
            Collection::Holders | Collection::DailyBalances => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                let mut block_opts = rocksdb::BlockBasedOptions::default();
                block_opts.set_bloom_filter(10.0, false); // 10 bits per key
                opts.set_block_based_table_factory(&block_opts);
            }
            Collection::Tokens | Collection::Snapshots => {
                opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
            }
        }
        opts
    }

    fn cf_handle(&self, collection: Collection) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(collection.name())
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", collection.name())))
    }

    /// Approximate record counts per collection
    pub fn stats(&self) -> Result<StorageStats> {
        let mut counts = Vec::with_capacity(Collection::ALL.len());
        for collection in Collection::ALL {
            let cf = self.cf_handle(collection)?;
            let estimate = self
                .db
                .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
                .unwrap_or(0);
            counts.push((collection, estimate));
        }
        Ok(StorageStats { counts })
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("RocksDB closed gracefully");
        Ok(())
    }
}

impl Repository for RocksRepository {
    fn get<T: Record>(&self, id: &str) -> Result<Option<T>> {
        let cf = self.cf_handle(T::COLLECTION)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn put<T: Record>(&self, record: &T) -> Result<()> {
        let cf = self.cf_handle(T::COLLECTION)?;
        self.db.put_cf(cf, record.id().as_bytes(), encode(record)?)?;
        Ok(())
    }

    fn delete<T: Record>(&self, id: &str) -> Result<()> {
        let cf = self.cf_handle(T::COLLECTION)?;
        self.db.delete_cf(cf, id.as_bytes())?;
        Ok(())
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Estimated record count per collection
    pub counts: Vec<(Collection, u64)>,
}

impl StorageStats {
    /// Estimated count of one collection
    pub fn count(&self, collection: Collection) -> u64 {
        self.counts
            .iter()
            .find(|(c, _)| *c == collection)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}
