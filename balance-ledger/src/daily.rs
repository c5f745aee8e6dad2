//! Daily balance records and snapshots
//!
//! A [`DailyBalanceRecord`] exists only while a holder's balance for that day
//! is positive. The day's [`DailySnapshot`] lists exactly those records, so it
//! doubles as the "active holders on day D" index.

use crate::storage::Repository;
use crate::types::{DailyBalanceRecord, DailySnapshot, DayKey};
use crate::Result;
use bigdecimal::{BigDecimal, Zero};

/// Outcome of [`DailyBook::record_balance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyChange {
    /// New record for the day
    Created,
    /// Existing record overwritten
    Updated,
    /// Record deleted because the balance reached zero
    Removed,
    /// Zero balance with no record to remove
    Unchanged,
}

/// Daily records and snapshots over a repository
#[derive(Debug)]
pub struct DailyBook<'a, R> {
    repo: &'a R,
}

impl<'a, R: Repository> DailyBook<'a, R> {
    /// Wrap a repository
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Record a holder's balance for a day
    pub fn record_balance(
        &self,
        token_id: &str,
        holder_id: &str,
        day: DayKey,
        balance: BigDecimal,
    ) -> Result<DailyChange> {
        let record_id = DailyBalanceRecord::id_for(holder_id, day);
        let existing = self.repo.get::<DailyBalanceRecord>(&record_id)?;

        if balance <= BigDecimal::zero() {
            if existing.is_none() {
                return Ok(DailyChange::Unchanged);
            }

            self.repo.delete::<DailyBalanceRecord>(&record_id)?;

            if let Some(mut snapshot) = self.snapshot(token_id, day)? {
                if snapshot.balances.remove(&record_id) {
                    self.repo.put(&snapshot)?;
                }
            }

            tracing::debug!(record = %record_id, "Daily balance removed");
            return Ok(DailyChange::Removed);
        }

        let record = DailyBalanceRecord::new(holder_id, day, balance);
        self.repo.put(&record)?;

        let mut snapshot = self
            .snapshot(token_id, day)?
            .unwrap_or_else(|| DailySnapshot::new(token_id, day));
        if snapshot.balances.insert(record.id.clone()) {
            self.repo.put(&snapshot)?;
        }

        Ok(if existing.is_some() {
            DailyChange::Updated
        } else {
            DailyChange::Created
        })
    }

    /// Load a token's snapshot for a day
    pub fn snapshot(&self, token_id: &str, day: DayKey) -> Result<Option<DailySnapshot>> {
        self.repo.get(&DailySnapshot::id_for(token_id, day))
    }

    /// Load a token's snapshot for a day, creating and saving an empty one
    pub fn load_or_create_snapshot(&self, token_id: &str, day: DayKey) -> Result<DailySnapshot> {
        if let Some(snapshot) = self.snapshot(token_id, day)? {
            return Ok(snapshot);
        }

        let snapshot = DailySnapshot::new(token_id, day);
        self.repo.put(&snapshot)?;
        Ok(snapshot)
    }

    /// Load a holder's record for a day
    pub fn balance_record(&self, holder_id: &str, day: DayKey) -> Result<Option<DailyBalanceRecord>> {
        self.repo.get(&DailyBalanceRecord::id_for(holder_id, day))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::dec;
    use crate::storage::{Collection, MemoryRepository};

    const TOKEN: &str = "gOHM/Ethereum";
    const HOLDER: &str = "gOHM/Ethereum/0xabc";

    fn day() -> DayKey {
        DayKey::parse("2022-10-09").unwrap()
    }

    #[test]
    fn test_create_then_overwrite() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);

        let change = book.record_balance(TOKEN, HOLDER, day(), dec("1.1")).unwrap();
        assert_eq!(change, DailyChange::Created);

        let change = book.record_balance(TOKEN, HOLDER, day(), dec("2.3")).unwrap();
        assert_eq!(change, DailyChange::Updated);

        let record = book.balance_record(HOLDER, day()).unwrap().unwrap();
        assert_eq!(record.balance, dec("2.3"));

        let snapshot = book.snapshot(TOKEN, day()).unwrap().unwrap();
        assert_eq!(snapshot.balances.as_slice(), &[record.id]);
    }

    #[test]
    fn test_zero_removes_record_and_membership() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);

        book.record_balance(TOKEN, HOLDER, day(), dec("1.1")).unwrap();
        book.record_balance(TOKEN, "gOHM/Ethereum/0xdef", day(), dec("1")).unwrap();

        let change = book.record_balance(TOKEN, HOLDER, day(), BigDecimal::zero()).unwrap();
        assert_eq!(change, DailyChange::Removed);
        assert!(book.balance_record(HOLDER, day()).unwrap().is_none());

        let snapshot = book.snapshot(TOKEN, day()).unwrap().unwrap();
        assert_eq!(snapshot.balances.as_slice(), &["gOHM/Ethereum/0xdef/2022-10-09"]);
    }

    #[test]
    fn test_zero_without_record_creates_nothing() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);

        let change = book.record_balance(TOKEN, HOLDER, day(), BigDecimal::zero()).unwrap();
        assert_eq!(change, DailyChange::Unchanged);
        assert_eq!(repo.count(Collection::DailyBalances), 0);
        assert_eq!(repo.count(Collection::Snapshots), 0);
    }

    #[test]
    fn test_negative_balance_treated_as_inactive() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);

        let change = book.record_balance(TOKEN, HOLDER, day(), dec("-5")).unwrap();
        assert_eq!(change, DailyChange::Unchanged);
        assert!(book.snapshot(TOKEN, day()).unwrap().is_none());
    }

    #[test]
    fn test_load_or_create_snapshot_persists() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);

        let snapshot = book.load_or_create_snapshot(TOKEN, day()).unwrap();
        assert!(snapshot.balances.is_empty());
        assert_eq!(snapshot.id, "gOHM/Ethereum/2022-10-09");
        assert!(book.snapshot(TOKEN, day()).unwrap().is_some());
    }
}
