//! Append-only per-holder audit trail
//!
//! Entries are never updated or removed. Re-delivering the same
//! `(holder, tx_hash, log_position)` is rejected instead of overwriting the
//! first entry; a replay from genesis is the recovery path.

use crate::storage::Repository;
use crate::types::TransactionLogEntry;
use crate::{Error, Result};

/// Transaction log over a repository
#[derive(Debug)]
pub struct TransactionLog<'a, R> {
    repo: &'a R,
}

impl<'a, R: Repository> TransactionLog<'a, R> {
    /// Wrap a repository
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Append an entry
    pub fn append(&self, entry: &TransactionLogEntry) -> Result<()> {
        if self.repo.get::<TransactionLogEntry>(&entry.id)?.is_some() {
            return Err(Error::DuplicateEntry(entry.id.clone()));
        }

        self.repo.put(entry)?;

        tracing::debug!(
            entry = %entry.id,
            entry_type = %entry.entry_type,
            value = %entry.value,
            balance = %entry.balance,
            block = entry.block,
            "Transaction log entry appended"
        );

        Ok(())
    }

    /// Load an entry by id
    pub fn get(&self, id: &str) -> Result<Option<TransactionLogEntry>> {
        self.repo.get(id)
    }
}
