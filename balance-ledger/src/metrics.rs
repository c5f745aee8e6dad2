//! Metrics collection for observability
//!
//! Each ledger owns its own Prometheus registry, so several ledgers (or
//! tests) can live in one process.
//!
//! # Metrics
//!
//! - `balance_ledger_entries_total` - Transaction log entries by type
//! - `balance_ledger_ignored_total` - Balance updates skipped for ignored holders
//! - `balance_ledger_holders_total` - Holder accounts created
//! - `balance_ledger_backfill_days_total` - Days backfilled
//! - `balance_ledger_backfill_records_total` - Daily records copied forward
//! - `balance_ledger_rebase_adjustments_total` - Rebase entries written
//! - `balance_ledger_rebase_unchanged_total` - Holders already in sync at reconciliation
//! - `balance_ledger_last_block` - Last block processed

use crate::types::EntryType;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transaction log entries by entry type
    pub entries_total: IntCounterVec,

    /// Updates skipped for ignored holders
    pub ignored_total: IntCounter,

    /// Holder accounts created
    pub holders_total: IntCounter,

    /// Days backfilled
    pub backfill_days_total: IntCounter,

    /// Records copied forward
    pub backfill_records_total: IntCounter,

    /// Rebase entries written
    pub rebase_adjustments_total: IntCounter,

    /// Holders skipped at reconciliation because nothing changed
    pub rebase_unchanged_total: IntCounter,

    /// Last block processed
    pub last_block: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let entries_total = IntCounterVec::new(
            Opts::new("balance_ledger_entries_total", "Transaction log entries written"),
            &["entry_type"],
        )?;
        registry.register(Box::new(entries_total.clone()))?;

        let ignored_total = counter(
            &registry,
            "balance_ledger_ignored_total",
            "Balance updates skipped for ignored holders",
        )?;
        let holders_total = counter(&registry, "balance_ledger_holders_total", "Holder accounts created")?;
        let backfill_days_total = counter(&registry, "balance_ledger_backfill_days_total", "Days backfilled")?;
        let backfill_records_total = counter(
            &registry,
            "balance_ledger_backfill_records_total",
            "Daily balance records copied forward",
        )?;
        let rebase_adjustments_total = counter(
            &registry,
            "balance_ledger_rebase_adjustments_total",
            "Rebase entries written",
        )?;
        let rebase_unchanged_total = counter(
            &registry,
            "balance_ledger_rebase_unchanged_total",
            "Holders already in sync at reconciliation",
        )?;

        let last_block = IntGauge::new("balance_ledger_last_block", "Last block processed")?;
        registry.register(Box::new(last_block.clone()))?;

        Ok(Self {
            entries_total,
            ignored_total,
            holders_total,
            backfill_days_total,
            backfill_records_total,
            rebase_adjustments_total,
            rebase_unchanged_total,
            last_block,
            registry,
        })
    }

    /// Record a transaction log entry
    pub fn record_entry(&self, entry_type: EntryType) {
        self.entries_total.with_label_values(&[entry_type.as_str()]).inc();
    }

    /// Record a skipped update
    pub fn record_ignored(&self) {
        self.ignored_total.inc();
    }

    /// Record a new holder account
    pub fn record_holder_created(&self) {
        self.holders_total.inc();
    }

    /// Record a backfilled day
    pub fn record_backfill(&self, copied: usize) {
        self.backfill_days_total.inc();
        self.backfill_records_total.inc_by(copied as u64);
    }

    /// Record a reconciliation pass
    pub fn record_rebase(&self, adjusted: usize, unchanged: usize) {
        self.rebase_adjustments_total.inc_by(adjusted as u64);
        self.rebase_unchanged_total.inc_by(unchanged as u64);
    }

    /// Record the block of a processed event
    pub fn record_block(&self, block: u64) {
        self.last_block.set(i64::try_from(block).unwrap_or(i64::MAX));
    }

    /// Entries written for one entry type
    pub fn entries(&self, entry_type: EntryType) -> u64 {
        self.entries_total.with_label_values(&[entry_type.as_str()]).get()
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("ignored_total", &self.ignored_total.get())
            .field("holders_total", &self.holders_total.get())
            .field("last_block", &self.last_block.get())
            .finish_non_exhaustive()
    }
}
