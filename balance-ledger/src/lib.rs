//! Token holder balance ledger
//!
//! Derived ledger of token balances built from an ordered stream of chain
//! events (transfers, mints, burns) plus periodic reconciliation for rebasing
//! tokens.
//!
//! # Architecture
//!
//! - **Running balances**: one `HolderAccount` per (token, holder)
//! - **Audit trail**: append-only `TransactionLogEntry` per balance delta
//! - **Daily view**: per-day `DailyBalanceRecord`s listed by a `DailySnapshot`
//! - **Backfill**: copy-forward so every snapshot is complete on its own
//! - **Single Writer**: one actor task applies events in chain order
//!
//! # Invariants
//!
//! - Conservation: a holder's balance equals the sum of its logged deltas
//! - Non-negativity: only a token's staking contract may go below zero
//! - Snapshots only list records with a positive balance for that day
//! - Deterministic replay: same events → same state

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, missing_debug_implementations, clippy::all)]

pub mod actor;
pub mod amount;
pub mod backfill;
pub mod config;
pub mod daily;
pub mod error;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod rebase;
pub mod registry;
pub mod storage;
pub mod transaction_log;
pub mod types;

// Re-exports
pub use actor::{spawn_ledger_actor, LedgerHandle};
pub use config::{Config, TokenConfig};
pub use error::{Error, Result};
pub use events::{BlockCheckpoint, BurnEvent, ChainEvent, MintEvent, RebaseTrigger, TransferEvent};
pub use ledger::{BalanceUpdate, Ledger};
pub use rebase::{BalanceOracle, StaticOracle};
pub use registry::TokenRegistry;
pub use storage::{MemoryRepository, Repository, RocksRepository};
pub use types::{
    Address, DailyBalanceRecord, DailySnapshot, DayKey, EntryType, HolderAccount, Token,
    TransactionLogEntry,
};
