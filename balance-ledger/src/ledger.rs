//! Main ledger orchestration layer
//!
//! This module ties together the registry, repository, transaction log, daily
//! book, backfill and rebase components into one synchronous API. Events must
//! be fed in chain order; the [`actor`](crate::actor) module provides the
//! single-writer async front door.
//!
//! # Example
//!
//! ```no_run
//! use balance_ledger::{ChainEvent, Config, Ledger};
//!
//! fn main() -> balance_ledger::Result<()> {
//!     let config = Config::from_file("ledger.toml")?;
//!     let ledger = Ledger::open(config)?;
//!
//!     let line = r#"{"type":"block","block":3600,"timestamp":1665317159,"block_hash":"0x01"}"#;
//!     let event: ChainEvent = serde_json::from_str(line)?;
//!     ledger.handle(&event)?;
//!
//!     Ok(())
//! }
//! ```

use crate::{
    amount::{canonical, to_decimal},
    backfill::{BackfillEngine, BackfillReport},
    daily::DailyBook,
    events::{BlockCheckpoint, BurnEvent, ChainEvent, MintEvent, RebaseTrigger, TransferEvent},
    metrics::Metrics,
    rebase::{BalanceOracle, RebaseReconciler, RebaseReport},
    registry::{TokenMetadata, TokenRegistry},
    storage::{Repository, RocksRepository},
    transaction_log::TransactionLog,
    types::{
        iso8601, Address, DailyBalanceRecord, DailySnapshot, DayKey, EntryType, HolderAccount, Token,
        TransactionLogEntry,
    },
    Config, Error, Result,
};
use bigdecimal::{BigDecimal, Zero};
use std::sync::Arc;

/// One signed balance change for one holder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceUpdate {
    /// Token contract
    pub token: Address,
    /// Holder whose balance changes
    pub holder: Address,
    /// Other side of the movement
    pub counterparty: Option<Address>,
    /// Unsigned raw amount
    pub raw_value: u128,
    /// Subtract instead of add
    pub is_debit: bool,
    /// Block number
    pub block: u64,
    /// Block timestamp (unix seconds)
    pub timestamp: i64,
    /// Source transaction (or block hash for rebases)
    pub tx_hash: String,
    /// Kind of change
    pub entry_type: EntryType,
    /// Log position within the source transaction
    pub log_position: u64,
    /// Allow the resulting balance to go below zero
    pub skip_non_negative_check: bool,
}

/// Work done for one block checkpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockReport {
    /// Days backfilled across all tokens
    pub backfilled_days: usize,
    /// Reconciliations run
    pub rebases: Vec<RebaseReport>,
}

/// Main ledger interface
pub struct Ledger<R> {
    /// Record store
    repo: R,

    /// Static token metadata
    registry: TokenRegistry,

    /// Authoritative balances for rebasing tokens
    oracle: Option<Arc<dyn BalanceOracle>>,

    /// Metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl Ledger<RocksRepository> {
    /// Open a RocksDB-backed ledger with configuration
    pub fn open(config: Config) -> Result<Self> {
        let repo = RocksRepository::open(&config)?;
        Self::from_config(repo, config)
    }
}

impl<R: Repository> Ledger<R> {
    /// Create ledger over a repository with an explicit registry
    pub fn new(repo: R, registry: TokenRegistry, config: Config) -> Result<Self> {
        tracing::info!(
            service = %config.service_name,
            chain = %config.chain,
            tokens = registry.len(),
            "Ledger ready"
        );

        Ok(Self {
            repo,
            registry,
            oracle: None,
            metrics: Metrics::new()?,
            config,
        })
    }

    /// Create ledger with the registry described by `config`
    pub fn from_config(repo: R, config: Config) -> Result<Self> {
        let registry = TokenRegistry::from_config(&config)?;
        Self::new(repo, registry, config)
    }

    /// Set the balance oracle used for reconciliation
    pub fn with_oracle(mut self, oracle: Arc<dyn BalanceOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Record store
    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Token registry
    pub fn registry(&self) -> &TokenRegistry {
        &self.registry
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Process any input event
    pub fn handle(&self, event: &ChainEvent) -> Result<()> {
        match event {
            ChainEvent::Transfer(transfer) => self.handle_transfer(transfer),
            ChainEvent::Mint(mint) => self.handle_mint(mint),
            ChainEvent::Burn(burn) => self.handle_burn(burn),
            ChainEvent::Rebase(trigger) => self.reconcile(trigger).map(|_| ()),
            ChainEvent::Block(checkpoint) => self.on_block(checkpoint).map(|_| ()),
        }
    }

    /// Debit the sender and credit the receiver of a transfer
    pub fn handle_transfer(&self, event: &TransferEvent) -> Result<()> {
        if event.from == event.to {
            tracing::debug!(
                token = %event.token_address,
                holder = %event.from,
                tx = %event.tx_hash,
                "Skipping self-transfer"
            );
            return Ok(());
        }

        let is_staking = |holder: &Address| {
            self.registry
                .get(&event.token_address)
                .map_or(false, |token| token.is_staking_contract(holder))
        };

        let leg = |holder: &Address, counterparty: &Address, is_debit: bool| BalanceUpdate {
            token: event.token_address.clone(),
            holder: holder.clone(),
            counterparty: Some(counterparty.clone()),
            raw_value: event.value,
            is_debit,
            block: event.block,
            timestamp: event.timestamp,
            tx_hash: event.tx_hash.clone(),
            entry_type: EntryType::Transfer,
            log_position: event.log_position,
            skip_non_negative_check: is_staking(holder),
        };

        self.apply_delta(leg(&event.from, &event.to, true))?;
        self.apply_delta(leg(&event.to, &event.from, false))?;
        Ok(())
    }

    /// Credit the receiver of a mint
    pub fn handle_mint(&self, event: &MintEvent) -> Result<()> {
        self.apply_delta(BalanceUpdate {
            token: event.token_address.clone(),
            holder: event.to.clone(),
            counterparty: Some(Address::zero()),
            raw_value: event.amount,
            is_debit: false,
            block: event.block,
            timestamp: event.timestamp,
            tx_hash: event.tx_hash.clone(),
            entry_type: EntryType::Mint,
            log_position: 0,
            skip_non_negative_check: false,
        })
        .map(|_| ())
    }

    /// Debit the holder of a burn
    pub fn handle_burn(&self, event: &BurnEvent) -> Result<()> {
        self.apply_delta(BalanceUpdate {
            token: event.token_address.clone(),
            holder: event.from.clone(),
            counterparty: Some(Address::zero()),
            raw_value: event.amount,
            is_debit: true,
            block: event.block,
            timestamp: event.timestamp,
            tx_hash: event.tx_hash.clone(),
            entry_type: EntryType::Burn,
            log_position: 0,
            skip_non_negative_check: false,
        })
        .map(|_| ())
    }

    /// Apply one balance change
    ///
    /// Returns `Ok(None)` when the holder is ignored for the token. Writes the
    /// transaction log entry, the holder account and the day's balance record
    /// and snapshot.
    pub fn apply_delta(&self, update: BalanceUpdate) -> Result<Option<TransactionLogEntry>> {
        let ignored = match self.registry.get(&update.token) {
            Some(metadata) => metadata.is_ignored(&update.holder),
            None => self.registry.is_globally_ignored(&update.holder),
        };
        if ignored {
            tracing::debug!(
                token = %update.token,
                holder = %update.holder,
                tx = %update.tx_hash,
                "Ignoring balance update for excluded holder"
            );
            self.metrics.record_ignored();
            return Ok(None);
        }

        let metadata = self.registry.resolve(&update.token)?;
        let value = to_decimal(update.raw_value, metadata.decimals);
        let delta = if update.is_debit && !value.is_zero() { -value } else { value };
        let day = DayKey::from_timestamp(update.timestamp)?;
        let date = iso8601(update.timestamp)?;

        let (mut token, mut token_dirty) = self.load_or_create_token(metadata)?;
        if self.config.backfill.before_first_event_of_day {
            let marker = token.last_backfilled_day;
            self.advance_backfill(&mut token, day)?;
            token_dirty |= token.last_backfilled_day != marker;
        } else if token.last_backfilled_day.is_none() {
            // Periodic catch-up starts from the day of the first event
            token.last_backfilled_day = Some(day);
            token_dirty = true;
        }

        let holder_id = HolderAccount::id_for(&token.id, &update.holder);
        let (mut account, created) = match self.repo.get::<HolderAccount>(&holder_id)? {
            Some(account) => (account, false),
            None => (HolderAccount::new(&token.id, update.holder.clone()), true),
        };

        let previous_balance = account.balance.clone();
        let balance = canonical(&previous_balance + &delta);

        if !update.skip_non_negative_check && balance < BigDecimal::zero() {
            return Err(Error::NegativeBalance {
                holder: holder_id,
                balance: balance.to_string(),
            });
        }

        let entry = TransactionLogEntry {
            id: TransactionLogEntry::id_for(&holder_id, &update.tx_hash, update.log_position),
            holder: holder_id.clone(),
            balance: balance.clone(),
            previous_balance,
            value: delta.clone(),
            block: update.block,
            timestamp: update.timestamp,
            date,
            entry_type: update.entry_type,
            tx_hash: update.tx_hash,
            log_position: update.log_position,
            counterparty: update.counterparty,
        };
        TransactionLog::new(&self.repo).append(&entry)?;

        account.balance = balance.clone();
        self.repo.put(&account)?;

        if created {
            token.holders.push(holder_id.clone());
            token_dirty = true;
            self.metrics.record_holder_created();
            tracing::debug!(token = %token.id, holder = %holder_id, "Registered holder");
        }
        if token_dirty {
            self.repo.put(&token)?;
        }

        DailyBook::new(&self.repo).record_balance(&token.id, &holder_id, day, balance.clone())?;

        self.metrics.record_entry(entry.entry_type);
        self.metrics.record_block(entry.block);

        tracing::debug!(
            holder = %holder_id,
            entry_type = %entry.entry_type,
            delta = %delta,
            balance = %balance,
            day = %day,
            "Applied balance update"
        );

        Ok(Some(entry))
    }

    /// Backfill the UTC day containing `target_timestamp` from the day before
    pub fn backfill(&self, target_timestamp: i64, token_address: &Address) -> Result<BackfillReport> {
        let metadata = self.registry.resolve(token_address)?;
        let mut token: Token = self.repo.require(&metadata.token_id())?;
        let day = DayKey::from_timestamp(target_timestamp)?;

        let report = BackfillEngine::new(&self.repo).backfill_day(day, &token)?;
        self.metrics.record_backfill(report.copied);

        // Only a contiguous step moves the catch-up marker
        if let Some(last) = token.last_backfilled_day {
            if last.next()? == day {
                token.last_backfilled_day = Some(day);
                self.repo.put(&token)?;
            }
        }

        Ok(report)
    }

    /// Backfill every day after the token's marker up to and including `day`
    ///
    /// Returns the number of days backfilled. A token without history only
    /// has its marker set.
    pub fn catch_up(&self, token_address: &Address, day: DayKey) -> Result<usize> {
        let metadata = self.registry.resolve(token_address)?;
        let Some(mut token) = self.repo.get::<Token>(&metadata.token_id())? else {
            tracing::debug!(token = %metadata.token_id(), "No token record yet, nothing to backfill");
            return Ok(0);
        };

        let marker = token.last_backfilled_day;
        let days = self.advance_backfill(&mut token, day)?;
        if token.last_backfilled_day != marker {
            self.repo.put(&token)?;
        }
        Ok(days)
    }

    /// Reconcile a token against the balance oracle
    pub fn reconcile(&self, trigger: &RebaseTrigger) -> Result<RebaseReport> {
        let oracle = self
            .oracle
            .as_deref()
            .ok_or_else(|| Error::Config("No balance oracle configured for reconciliation".to_string()))?;
        RebaseReconciler::new(self, oracle).reconcile(trigger)
    }

    /// Run the block-driven backfill and reconciliation cadences
    pub fn on_block(&self, checkpoint: &BlockCheckpoint) -> Result<BlockReport> {
        let day = DayKey::from_timestamp(checkpoint.timestamp)?;
        let mut report = BlockReport::default();

        let interval = self.config.backfill.interval_blocks;
        if interval > 0 && checkpoint.block % interval == 0 {
            for metadata in self.registry.iter() {
                report.backfilled_days += self.catch_up(&metadata.address, day)?;
            }
        }

        for metadata in self.registry.iter().filter(|token| token.rebasing) {
            if checkpoint.block % metadata.rebase_interval_blocks == 0 {
                report.rebases.push(self.reconcile(&RebaseTrigger {
                    token_address: metadata.address.clone(),
                    block: checkpoint.block,
                    timestamp: checkpoint.timestamp,
                    block_hash: checkpoint.block_hash.clone(),
                })?);
            }
        }

        self.metrics.record_block(checkpoint.block);
        Ok(report)
    }

    /// Stored token record
    pub fn token(&self, token_address: &Address) -> Result<Option<Token>> {
        let metadata = self.registry.resolve(token_address)?;
        self.repo.get(&metadata.token_id())
    }

    /// Stored holder account
    pub fn holder(&self, token_address: &Address, holder: &Address) -> Result<Option<HolderAccount>> {
        let metadata = self.registry.resolve(token_address)?;
        self.repo.get(&HolderAccount::id_for(&metadata.token_id(), holder))
    }

    /// Current balance (zero for unknown holders)
    pub fn balance_of(&self, token_address: &Address, holder: &Address) -> Result<BigDecimal> {
        Ok(self
            .holder(token_address, holder)?
            .map(|account| account.balance)
            .unwrap_or_else(BigDecimal::zero))
    }

    /// Balance recorded for a day (zero without a record)
    pub fn balance_on(&self, token_address: &Address, holder: &Address, day: DayKey) -> Result<BigDecimal> {
        let metadata = self.registry.resolve(token_address)?;
        let holder_id = HolderAccount::id_for(&metadata.token_id(), holder);
        Ok(DailyBook::new(&self.repo)
            .balance_record(&holder_id, day)?
            .map(|record| record.balance)
            .unwrap_or_else(BigDecimal::zero))
    }

    /// Stored snapshot of a day
    pub fn daily_snapshot(&self, token_address: &Address, day: DayKey) -> Result<Option<DailySnapshot>> {
        let metadata = self.registry.resolve(token_address)?;
        DailyBook::new(&self.repo).snapshot(&metadata.token_id(), day)
    }

    /// Records listed in a day's snapshot, in snapshot order
    pub fn snapshot(&self, token_address: &Address, day: DayKey) -> Result<Vec<DailyBalanceRecord>> {
        let Some(snapshot) = self.daily_snapshot(token_address, day)? else {
            return Ok(Vec::new());
        };

        snapshot
            .balances
            .iter()
            .map(|id| self.repo.require::<DailyBalanceRecord>(id))
            .collect()
    }

    /// Check that every id in a day's snapshot resolves to a positive record
    /// of that day belonging to the token
    pub fn verify_snapshot(&self, token_address: &Address, day: DayKey) -> Result<bool> {
        let metadata = self.registry.resolve(token_address)?;
        let token_id = metadata.token_id();
        let Some(snapshot) = DailyBook::new(&self.repo).snapshot(&token_id, day)? else {
            return Ok(true);
        };

        for id in snapshot.balances.iter() {
            let Some(record) = self.repo.get::<DailyBalanceRecord>(id)? else {
                tracing::warn!(snapshot = %snapshot.id, record = %id, "Snapshot references a missing record");
                return Ok(false);
            };

            let owned = self
                .repo
                .get::<HolderAccount>(&record.holder)?
                .map_or(false, |account| account.token == token_id);

            if record.balance <= BigDecimal::zero() || record.date != day || !owned {
                tracing::warn!(
                    snapshot = %snapshot.id,
                    record = %id,
                    balance = %record.balance,
                    date = %record.date,
                    "Snapshot references an inconsistent record"
                );
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Transaction log entry of a holder
    pub fn transaction(
        &self,
        token_address: &Address,
        holder: &Address,
        tx_hash: &str,
        log_position: u64,
    ) -> Result<Option<TransactionLogEntry>> {
        let metadata = self.registry.resolve(token_address)?;
        let holder_id = HolderAccount::id_for(&metadata.token_id(), holder);
        TransactionLog::new(&self.repo).get(&TransactionLogEntry::id_for(&holder_id, tx_hash, log_position))
    }

    fn load_or_create_token(&self, metadata: &TokenMetadata) -> Result<(Token, bool)> {
        match self.repo.get::<Token>(&metadata.token_id())? {
            Some(token) => Ok((token, false)),
            None => {
                tracing::info!(token = %metadata.token_id(), address = %metadata.address, "Tracking new token");
                Ok((metadata.new_token(), true))
            }
        }
    }

    /// Move the token's backfill marker up to `day`; the caller persists
    fn advance_backfill(&self, token: &mut Token, day: DayKey) -> Result<usize> {
        let Some(last) = token.last_backfilled_day else {
            token.last_backfilled_day = Some(day);
            return Ok(0);
        };

        let engine = BackfillEngine::new(&self.repo);
        let mut days = 0;
        let mut next = last.next()?;
        while next <= day {
            let report = engine.backfill_day(next, token)?;
            self.metrics.record_backfill(report.copied);
            token.last_backfilled_day = Some(next);
            days += 1;
            next = next.next()?;
        }

        Ok(days)
    }
}

impl<R> std::fmt::Debug for Ledger<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("service", &self.config.service_name)
            .field("tokens", &self.registry.len())
            .field("oracle", &self.oracle.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::dec;
    use crate::config::TokenConfig;
    use crate::rebase::StaticOracle;
    use crate::storage::{Collection, MemoryRepository};

    const GOHM: &str = "0x0ab87046fbb341d058f17cbc4c1133f25a20a52f";
    const SOHM: &str = "0x04906695d6d12cf5459975d7c3c03356e4ccd460";
    const STAKING: &str = "0xb63cac384247597756545b500253ff8e607a8020";
    const ALICE: &str = "0xbb3041f88c52b1f003a1a2ceeb63b73a2a9f3f04";
    const BOB: &str = "0x1111111111111111111111111111111111111111";

    // 2022-10-09T12:05:59Z
    const DAY_ONE: i64 = 1_665_317_159;
    const DAY: i64 = 86_400;
    const ONE_GOHM: u128 = 1_000_000_000_000_000_000;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.tokens = vec![
            TokenConfig::new("gOHM", GOHM, 18),
            TokenConfig::new("sOHM V3", SOHM, 9)
                .rebasing(2400)
                .with_staking_contract(STAKING),
        ];
        config
    }

    fn ledger() -> Ledger<MemoryRepository> {
        Ledger::from_config(MemoryRepository::new(), test_config()).unwrap()
    }

    fn transfer(token: &str, from: &str, to: &str, value: u128, timestamp: i64, tx: &str) -> TransferEvent {
        TransferEvent {
            token_address: Address::new(token),
            from: Address::new(from),
            to: Address::new(to),
            value,
            block: 15_710_427,
            timestamp,
            tx_hash: tx.to_string(),
            log_position: 1,
        }
    }

    fn day(timestamp: i64) -> DayKey {
        DayKey::from_timestamp(timestamp).unwrap()
    }

    #[test]
    fn test_transfer_moves_balance() {
        let ledger = ledger();
        let gohm = Address::new(GOHM);

        ledger
            .handle_mint(&MintEvent {
                token_address: gohm.clone(),
                to: Address::new(ALICE),
                amount: 3 * ONE_GOHM,
                block: 1,
                timestamp: DAY_ONE,
                tx_hash: "0x01".to_string(),
            })
            .unwrap();
        ledger
            .handle_transfer(&transfer(GOHM, ALICE, BOB, ONE_GOHM, DAY_ONE, "0x02"))
            .unwrap();

        assert_eq!(ledger.balance_of(&gohm, &Address::new(ALICE)).unwrap(), dec("2"));
        assert_eq!(ledger.balance_of(&gohm, &Address::new(BOB)).unwrap(), dec("1"));

        let debit = ledger
            .transaction(&gohm, &Address::new(ALICE), "0x02", 1)
            .unwrap()
            .unwrap();
        assert_eq!(debit.value, dec("-1"));
        assert_eq!(debit.previous_balance, dec("3"));
        assert_eq!(debit.counterparty, Some(Address::new(BOB)));
        assert_eq!(debit.entry_type, EntryType::Transfer);

        let token = ledger.token(&gohm).unwrap().unwrap();
        assert_eq!(
            token.holders,
            vec![format!("gOHM/Ethereum/{}", ALICE), format!("gOHM/Ethereum/{}", BOB)]
        );
        assert_eq!(ledger.metrics().entries(EntryType::Transfer), 2);
        assert_eq!(ledger.metrics().entries(EntryType::Mint), 1);
    }

    #[test]
    fn test_ignored_holders_get_no_account() {
        let ledger = ledger();

        // Zero address and the token contract itself
        ledger
            .handle_transfer(&transfer(GOHM, crate::types::ZERO_ADDRESS, ALICE, ONE_GOHM, DAY_ONE, "0x01"))
            .unwrap();
        ledger
            .handle_transfer(&transfer(GOHM, ALICE, GOHM, ONE_GOHM, DAY_ONE, "0x02"))
            .unwrap();

        let gohm = Address::new(GOHM);
        assert!(ledger.holder(&gohm, &Address::zero()).unwrap().is_none());
        assert!(ledger.holder(&gohm, &gohm).unwrap().is_none());
        assert_eq!(ledger.repository().count(Collection::Holders), 1);
        assert_eq!(ledger.metrics().ignored_total.get(), 2);
    }

    #[test]
    fn test_self_transfer_skipped() {
        let ledger = ledger();
        ledger
            .handle_transfer(&transfer(GOHM, ALICE, ALICE, ONE_GOHM, DAY_ONE, "0x01"))
            .unwrap();
        assert_eq!(ledger.repository().count(Collection::Transactions), 0);
    }

    #[test]
    fn test_negative_balance_is_fatal() {
        let ledger = ledger();
        let err = ledger
            .handle_transfer(&transfer(GOHM, ALICE, BOB, ONE_GOHM, DAY_ONE, "0x01"))
            .unwrap_err();

        assert!(matches!(err, Error::NegativeBalance { ref holder, .. } if holder.ends_with(ALICE)));
        assert!(err.is_fatal());
        assert_eq!(ledger.repository().count(Collection::Transactions), 0);
    }

    #[test]
    fn test_staking_contract_may_go_negative() {
        let ledger = ledger();
        let sohm = Address::new(SOHM);

        ledger
            .handle_transfer(&transfer(SOHM, STAKING, ALICE, 1_500_000_000, DAY_ONE, "0x01"))
            .unwrap();

        assert_eq!(ledger.balance_of(&sohm, &Address::new(STAKING)).unwrap(), dec("-1.5"));
        assert_eq!(ledger.balance_of(&sohm, &Address::new(ALICE)).unwrap(), dec("1.5"));

        // Negative balances never show up in snapshots
        let records = ledger.snapshot(&sohm, day(DAY_ONE)).unwrap();
        assert_eq!(records.len(), 1);
        assert!(ledger.verify_snapshot(&sohm, day(DAY_ONE)).unwrap());
    }

    #[test]
    fn test_unknown_token_is_fatal() {
        let ledger = ledger();
        let err = ledger
            .handle_transfer(&transfer("0x1234", ALICE, BOB, 1, DAY_ONE, "0x01"))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownToken(_)));
    }

    #[test]
    fn test_first_event_of_day_catches_up() {
        let ledger = ledger();
        let gohm = Address::new(GOHM);

        ledger
            .handle_transfer(&transfer(GOHM, crate::types::ZERO_ADDRESS, ALICE, ONE_GOHM, DAY_ONE, "0x01"))
            .unwrap();
        assert_eq!(ledger.token(&gohm).unwrap().unwrap().last_backfilled_day, Some(day(DAY_ONE)));

        // Three days later: the gap is filled before Bob's record is written
        ledger
            .handle_transfer(&transfer(GOHM, crate::types::ZERO_ADDRESS, BOB, ONE_GOHM, DAY_ONE + 3 * DAY, "0x02"))
            .unwrap();

        for offset in 1..=3 {
            let target = day(DAY_ONE + offset * DAY);
            assert_eq!(ledger.balance_on(&gohm, &Address::new(ALICE), target).unwrap(), dec("1"));
            assert!(ledger.verify_snapshot(&gohm, target).unwrap());
        }
        assert_eq!(ledger.snapshot(&gohm, day(DAY_ONE + 3 * DAY)).unwrap().len(), 2);
        assert_eq!(
            ledger.token(&gohm).unwrap().unwrap().last_backfilled_day,
            Some(day(DAY_ONE + 3 * DAY))
        );
        assert_eq!(ledger.metrics().backfill_days_total.get(), 3);
    }

    #[test]
    fn test_catch_up_disabled() {
        let mut config = test_config();
        config.backfill.before_first_event_of_day = false;
        let ledger = Ledger::from_config(MemoryRepository::new(), config).unwrap();
        let gohm = Address::new(GOHM);

        ledger
            .handle_transfer(&transfer(GOHM, crate::types::ZERO_ADDRESS, ALICE, ONE_GOHM, DAY_ONE, "0x01"))
            .unwrap();
        ledger
            .handle_transfer(&transfer(GOHM, crate::types::ZERO_ADDRESS, BOB, ONE_GOHM, DAY_ONE + DAY, "0x02"))
            .unwrap();

        // The marker stays on the first event's day until a periodic pass
        assert_eq!(ledger.token(&gohm).unwrap().unwrap().last_backfilled_day, Some(day(DAY_ONE)));
        assert_eq!(ledger.metrics().backfill_days_total.get(), 0);
        assert_eq!(
            ledger.balance_on(&gohm, &Address::new(ALICE), day(DAY_ONE + DAY)).unwrap(),
            BigDecimal::zero()
        );
    }

    #[test]
    fn test_periodic_only_keeps_first_day_holders() {
        let mut config = test_config();
        config.backfill.before_first_event_of_day = false;
        let ledger = Ledger::from_config(MemoryRepository::new(), config).unwrap();
        let gohm = Address::new(GOHM);

        ledger
            .handle_mint(&MintEvent {
                token_address: gohm.clone(),
                to: Address::new(ALICE),
                amount: ONE_GOHM,
                block: 1,
                timestamp: DAY_ONE,
                tx_hash: "0x01".to_string(),
            })
            .unwrap();

        let checkpoint = |block: u64, timestamp: i64| BlockCheckpoint {
            block,
            timestamp,
            block_hash: format!("0xblock{}", block),
        };

        let report = ledger.on_block(&checkpoint(3600, DAY_ONE + DAY)).unwrap();
        assert_eq!(report.backfilled_days, 1);
        let report = ledger.on_block(&checkpoint(10_800, DAY_ONE + 2 * DAY)).unwrap();
        assert_eq!(report.backfilled_days, 1);

        for offset in 1..=2 {
            let target = day(DAY_ONE + offset * DAY);
            assert_eq!(ledger.balance_on(&gohm, &Address::new(ALICE), target).unwrap(), dec("1"));
            assert_eq!(ledger.snapshot(&gohm, target).unwrap().len(), 1);
            assert!(ledger.verify_snapshot(&gohm, target).unwrap());
        }
        assert_eq!(
            ledger.token(&gohm).unwrap().unwrap().last_backfilled_day,
            Some(day(DAY_ONE + 2 * DAY))
        );
    }

    #[test]
    fn test_amounts_beyond_96_bits_stay_exact() {
        let ledger = ledger();
        let gohm = Address::new(GOHM);
        // 1e11 gOHM, above 2^96 raw units
        let whale = 100_000_000_000 * ONE_GOHM;

        ledger
            .handle_transfer(&transfer(GOHM, crate::types::ZERO_ADDRESS, ALICE, whale, DAY_ONE, "0x01"))
            .unwrap();
        ledger
            .handle_transfer(&transfer(GOHM, ALICE, BOB, 1, DAY_ONE, "0x02"))
            .unwrap();

        assert_eq!(
            ledger.balance_of(&gohm, &Address::new(ALICE)).unwrap(),
            dec("99999999999.999999999999999999")
        );
        assert_eq!(
            ledger.balance_of(&gohm, &Address::new(BOB)).unwrap(),
            dec("0.000000000000000001")
        );
        assert_eq!(
            ledger.balance_on(&gohm, &Address::new(ALICE), day(DAY_ONE)).unwrap(),
            dec("99999999999.999999999999999999")
        );
    }

    #[test]
    fn test_on_block_cadence() {
        let ledger = ledger().with_oracle(Arc::new(StaticOracle::new().with_token(SOHM, 9)));
        let gohm = Address::new(GOHM);

        ledger
            .handle_transfer(&transfer(GOHM, crate::types::ZERO_ADDRESS, ALICE, ONE_GOHM, DAY_ONE, "0x01"))
            .unwrap();

        let checkpoint = |block: u64| BlockCheckpoint {
            block,
            timestamp: DAY_ONE + DAY,
            block_hash: format!("0xblock{}", block),
        };

        // Neither cadence
        let report = ledger.on_block(&checkpoint(3601)).unwrap();
        assert_eq!(report, BlockReport::default());

        // Backfill only
        let report = ledger.on_block(&checkpoint(3600)).unwrap();
        assert_eq!(report.backfilled_days, 1);
        assert!(report.rebases.is_empty());
        assert_eq!(
            ledger.balance_on(&gohm, &Address::new(ALICE), day(DAY_ONE + DAY)).unwrap(),
            dec("1")
        );

        // Rebase only (sOHM has no holders yet)
        let report = ledger.on_block(&checkpoint(4800)).unwrap();
        assert_eq!(report.backfilled_days, 0);
        assert_eq!(report.rebases.len(), 1);
        assert_eq!(report.rebases[0].holders, 0);
        assert_eq!(ledger.metrics().last_block.get(), 4800);
    }

    #[test]
    fn test_reconcile_without_oracle() {
        let ledger = ledger();
        let err = ledger
            .reconcile(&RebaseTrigger {
                token_address: Address::new(SOHM),
                block: 2400,
                timestamp: DAY_ONE,
                block_hash: "0x01".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_handle_dispatch() {
        let ledger = ledger();
        let line = format!(
            r#"{{"type":"mint","token_address":"{}","to":"{}","amount":"1100000000000000000","block":1,"timestamp":{},"tx_hash":"0x01"}}"#,
            GOHM, ALICE, DAY_ONE
        );
        let event: ChainEvent = serde_json::from_str(&line).unwrap();
        ledger.handle(&event).unwrap();

        assert_eq!(
            ledger.balance_of(&Address::new(GOHM), &Address::new(ALICE)).unwrap(),
            dec("1.1")
        );
    }

    #[test]
    fn test_verify_snapshot_detects_dangling_reference() {
        let ledger = ledger();
        let gohm = Address::new(GOHM);

        ledger
            .handle_transfer(&transfer(GOHM, crate::types::ZERO_ADDRESS, ALICE, ONE_GOHM, DAY_ONE, "0x01"))
            .unwrap();
        assert!(ledger.verify_snapshot(&gohm, day(DAY_ONE)).unwrap());

        let mut snapshot = ledger.daily_snapshot(&gohm, day(DAY_ONE)).unwrap().unwrap();
        snapshot.balances.insert("gOHM/Ethereum/0xgone/2022-10-09");
        ledger.repository().put(&snapshot).unwrap();

        assert!(!ledger.verify_snapshot(&gohm, day(DAY_ONE)).unwrap());
    }
}
