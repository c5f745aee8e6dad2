//! Copy-forward of daily balances
//!
//! Holders whose balance did not change on a day have no record for it.
//! Backfilling day D copies every record listed in the D-1 snapshot into D,
//! so that the D snapshot alone answers "who held what on D".
//!
//! One invocation looks exactly one day back. Multi-day gaps are covered by
//! calling it once per day in ascending order (see `Ledger::catch_up`).

use crate::daily::DailyBook;
use crate::storage::Repository;
use crate::types::{DailyBalanceRecord, DailySnapshot, DayKey, Token};
use crate::Result;

/// Outcome of one backfill
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    /// Token id
    pub token: String,
    /// Day that was filled
    pub day: DayKey,
    /// Records copied from the previous day
    pub copied: usize,
    /// Holders that already had a record on the day
    pub skipped: usize,
    /// Whether the day's snapshot did not exist before
    pub created_snapshot: bool,
}

/// Backfill over a repository
#[derive(Debug)]
pub struct BackfillEngine<'a, R> {
    repo: &'a R,
}

impl<'a, R: Repository> BackfillEngine<'a, R> {
    /// Wrap a repository
    pub fn new(repo: &'a R) -> Self {
        Self { repo }
    }

    /// Fill the UTC day containing `target_timestamp`
    pub fn backfill(&self, target_timestamp: i64, token: &Token) -> Result<BackfillReport> {
        self.backfill_day(DayKey::from_timestamp(target_timestamp)?, token)
    }

    /// Fill `day` from the day before it
    ///
    /// Records already present on `day` are never overwritten. Running twice
    /// for the same day copies nothing the second time.
    pub fn backfill_day(&self, day: DayKey, token: &Token) -> Result<BackfillReport> {
        let book = DailyBook::new(self.repo);
        let previous_day = day.previous()?;

        let previous = book.load_or_create_snapshot(&token.id, previous_day)?;

        let (mut target, created_snapshot) = match book.snapshot(&token.id, day)? {
            Some(snapshot) => (snapshot, false),
            None => (DailySnapshot::new(&token.id, day), true),
        };

        let mut copied = 0;
        let mut skipped = 0;

        for previous_id in previous.balances.iter() {
            let record: DailyBalanceRecord = self.repo.require(previous_id)?;
            let target_id = DailyBalanceRecord::id_for(&record.holder, day);

            if target.balances.contains(&target_id) {
                skipped += 1;
                continue;
            }

            // Record written on `day` but not listed: keep it, just list it
            if let Some(existing) = self.repo.get::<DailyBalanceRecord>(&target_id)? {
                target.balances.insert(existing.id);
                skipped += 1;
                continue;
            }

            let carried = DailyBalanceRecord::new(&record.holder, day, record.balance);
            self.repo.put(&carried)?;
            target.balances.insert(carried.id);
            copied += 1;
        }

        self.repo.put(&target)?;

        tracing::info!(
            token = %token.id,
            day = %day,
            from = %previous_day,
            copied = copied,
            skipped = skipped,
            "Backfilled daily balances"
        );

        Ok(BackfillReport {
            token: token.id.clone(),
            day,
            copied,
            skipped,
            created_snapshot,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRepository;
    use crate::types::Address;
    use crate::Error;
    use crate::amount::dec;

    fn token() -> Token {
        Token::new("gOHM", "Ethereum", Address::new("0x0ab8"), 18)
    }

    fn day(s: &str) -> DayKey {
        DayKey::parse(s).unwrap()
    }

    #[test]
    fn test_copies_previous_day() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);
        let token = token();

        book.record_balance(&token.id, "gOHM/Ethereum/0xa", day("2022-10-09"), dec("1.1"))
            .unwrap();
        book.record_balance(&token.id, "gOHM/Ethereum/0xb", day("2022-10-09"), dec("1"))
            .unwrap();

        let report = BackfillEngine::new(&repo)
            .backfill_day(day("2022-10-10"), &token)
            .unwrap();
        assert_eq!(report.copied, 2);
        assert_eq!(report.skipped, 0);
        assert!(report.created_snapshot);

        let snapshot = book.snapshot(&token.id, day("2022-10-10")).unwrap().unwrap();
        assert_eq!(
            snapshot.balances.as_slice(),
            &["gOHM/Ethereum/0xa/2022-10-10", "gOHM/Ethereum/0xb/2022-10-10"]
        );

        let carried = book
            .balance_record("gOHM/Ethereum/0xa", day("2022-10-10"))
            .unwrap()
            .unwrap();
        assert_eq!(carried.balance, dec("1.1"));
        assert_eq!(carried.date, day("2022-10-10"));
    }

    #[test]
    fn test_does_not_clobber_existing_records() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);
        let token = token();

        book.record_balance(&token.id, "gOHM/Ethereum/0xa", day("2022-10-09"), dec("1.1"))
            .unwrap();
        book.record_balance(&token.id, "gOHM/Ethereum/0xa", day("2022-10-10"), dec("2.3"))
            .unwrap();

        let report = BackfillEngine::new(&repo)
            .backfill_day(day("2022-10-10"), &token)
            .unwrap();
        assert_eq!(report.copied, 0);
        assert_eq!(report.skipped, 1);
        assert!(!report.created_snapshot);

        let record = book
            .balance_record("gOHM/Ethereum/0xa", day("2022-10-10"))
            .unwrap()
            .unwrap();
        assert_eq!(record.balance, dec("2.3"));
    }

    #[test]
    fn test_empty_previous_day_creates_both_snapshots() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);
        let token = token();

        // 2022-10-11T13:19:41Z
        let report = BackfillEngine::new(&repo).backfill(1_665_494_381, &token).unwrap();
        assert_eq!(report.day, day("2022-10-11"));
        assert_eq!(report.copied, 0);

        assert!(book.snapshot(&token.id, day("2022-10-10")).unwrap().unwrap().balances.is_empty());
        assert!(book.snapshot(&token.id, day("2022-10-11")).unwrap().unwrap().balances.is_empty());
    }

    #[test]
    fn test_only_one_day_back() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);
        let token = token();

        book.record_balance(&token.id, "gOHM/Ethereum/0xa", day("2022-10-09"), dec("1"))
            .unwrap();

        let report = BackfillEngine::new(&repo)
            .backfill_day(day("2022-10-11"), &token)
            .unwrap();
        assert_eq!(report.copied, 0);
        assert!(book
            .balance_record("gOHM/Ethereum/0xa", day("2022-10-11"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_idempotent() {
        let repo = MemoryRepository::new();
        let book = DailyBook::new(&repo);
        let token = token();
        let engine = BackfillEngine::new(&repo);

        book.record_balance(&token.id, "gOHM/Ethereum/0xa", day("2022-10-09"), dec("1"))
            .unwrap();

        engine.backfill_day(day("2022-10-10"), &token).unwrap();
        let again = engine.backfill_day(day("2022-10-10"), &token).unwrap();
        assert_eq!(again.copied, 0);
        assert_eq!(again.skipped, 1);

        let snapshot = book.snapshot(&token.id, day("2022-10-10")).unwrap().unwrap();
        assert_eq!(snapshot.balances.len(), 1);
    }

    #[test]
    fn test_dangling_reference_is_fatal() {
        let repo = MemoryRepository::new();
        let token = token();

        let mut previous = DailySnapshot::new(&token.id, day("2022-10-09"));
        previous.balances.insert("gOHM/Ethereum/0xgone/2022-10-09");
        repo.put(&previous).unwrap();

        let err = BackfillEngine::new(&repo)
            .backfill_day(day("2022-10-10"), &token)
            .unwrap_err();
        assert!(matches!(err, Error::MissingRecord(_)));
        assert!(err.is_fatal());
    }
}
