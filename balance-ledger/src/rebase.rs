//! Reconciliation of rebasing tokens
//!
//! Rebasing tokens change every holder's balance without emitting transfers.
//! At each reconciliation point the ledger asks a [`BalanceOracle`] for the
//! authoritative balance of every known holder and writes a synthetic REBASE
//! entry for any difference.

use crate::amount::{to_decimal, to_raw};
use crate::events::RebaseTrigger;
use crate::ledger::{BalanceUpdate, Ledger};
use crate::storage::Repository;
use crate::types::{Address, EntryType, HolderAccount, Token};
use crate::{Error, Result};
use bigdecimal::{BigDecimal, Zero};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Authoritative balance source (the token contract)
pub trait BalanceOracle: Send + Sync {
    /// Decimal precision reported by the token
    fn decimals(&self, token: &Address) -> Result<u32>;

    /// Raw balance of `holder`
    fn balance_of(&self, token: &Address, holder: &Address) -> Result<u128>;
}

/// In-memory oracle
///
/// Unknown holders of a known token have a zero balance, as with an ERC20
/// `balanceOf`. Unknown tokens are an error.
#[derive(Debug, Default)]
pub struct StaticOracle {
    decimals: RwLock<HashMap<Address, u32>>,
    balances: RwLock<HashMap<(Address, Address), u128>>,
}

#[derive(Deserialize)]
struct OracleFile {
    tokens: HashMap<String, OracleToken>,
}

#[derive(Deserialize)]
struct OracleToken {
    decimals: u32,
    #[serde(default)]
    balances: HashMap<String, String>,
}

impl StaticOracle {
    /// Create empty oracle
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token
    pub fn with_token(self, token: impl Into<Address>, decimals: u32) -> Self {
        self.decimals.write().insert(token.into(), decimals);
        self
    }

    /// Set a holder's raw balance
    pub fn set_balance(&self, token: impl Into<Address>, holder: impl Into<Address>, raw: u128) {
        self.balances.write().insert((token.into(), holder.into()), raw);
    }

    /// Load from a JSON balance file
    ///
    /// ```json
    /// {"tokens": {"0x0490...": {"decimals": 9, "balances": {"0xbb30...": "1100000000"}}}}
    /// ```
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let file: OracleFile = serde_json::from_str(&content)
            .map_err(|e| Error::Oracle(format!("Invalid balance file: {}", e)))?;

        let oracle = StaticOracle::new();
        for (token, entry) in file.tokens {
            let token = Address::new(token);
            oracle.decimals.write().insert(token.clone(), entry.decimals);
            for (holder, raw) in entry.balances {
                let raw: u128 = raw
                    .parse()
                    .map_err(|e| Error::Oracle(format!("Invalid balance '{}' for {}: {}", raw, holder, e)))?;
                oracle.set_balance(token.clone(), holder, raw);
            }
        }

        tracing::info!(
            path = ?path.as_ref(),
            tokens = oracle.decimals.read().len(),
            balances = oracle.balances.read().len(),
            "Loaded static balance oracle"
        );

        Ok(oracle)
    }
}

impl BalanceOracle for StaticOracle {
    fn decimals(&self, token: &Address) -> Result<u32> {
        self.decimals
            .read()
            .get(token)
            .copied()
            .ok_or_else(|| Error::Oracle(format!("No decimals for token {}", token)))
    }

    fn balance_of(&self, token: &Address, holder: &Address) -> Result<u128> {
        self.decimals(token)?;
        Ok(self
            .balances
            .read()
            .get(&(token.clone(), holder.clone()))
            .copied()
            .unwrap_or(0))
    }
}

/// Outcome of one reconciliation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebaseReport {
    /// Token id
    pub token: String,
    /// Block of the trigger
    pub block: u64,
    /// Holders visited
    pub holders: usize,
    /// REBASE entries written
    pub adjusted: usize,
    /// Holders already matching the oracle
    pub unchanged: usize,
}

/// Reconciles a ledger against an oracle
pub struct RebaseReconciler<'a, R> {
    ledger: &'a Ledger<R>,
    oracle: &'a dyn BalanceOracle,
}

impl<R> std::fmt::Debug for RebaseReconciler<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RebaseReconciler").field("ledger", self.ledger).finish_non_exhaustive()
    }
}

impl<'a, R: Repository> RebaseReconciler<'a, R> {
    /// Create reconciler
    pub fn new(ledger: &'a Ledger<R>, oracle: &'a dyn BalanceOracle) -> Self {
        Self { ledger, oracle }
    }

    /// Bring every known holder of the trigger's token in line with the oracle
    pub fn reconcile(&self, trigger: &RebaseTrigger) -> Result<RebaseReport> {
        let metadata = self.ledger.registry().resolve(&trigger.token_address)?;
        let token_id = metadata.token_id();

        let mut report = RebaseReport {
            token: token_id.clone(),
            block: trigger.block,
            ..RebaseReport::default()
        };

        // Copy the holder list up front: applying deltas rewrites the token record
        let holders = match self.ledger.repository().get::<Token>(&token_id)? {
            Some(token) => token.holders,
            None => {
                tracing::debug!(token = %token_id, "No token record yet, nothing to reconcile");
                return Ok(report);
            }
        };

        let decimals = self.oracle.decimals(&metadata.address)?;
        if decimals != metadata.decimals {
            return Err(Error::InvariantViolation(format!(
                "Token {} reports {} decimals, registry has {}",
                token_id, decimals, metadata.decimals
            )));
        }

        for holder_id in &holders {
            let account: HolderAccount = self.ledger.repository().require(holder_id)?;
            report.holders += 1;

            let raw = self.oracle.balance_of(&metadata.address, &account.holder)?;
            let authoritative = to_decimal(raw, decimals);
            let difference = authoritative - &account.balance;

            if difference.is_zero() {
                report.unchanged += 1;
                continue;
            }

            self.ledger.apply_delta(BalanceUpdate {
                token: metadata.address.clone(),
                holder: account.holder.clone(),
                counterparty: None,
                raw_value: to_raw(&difference, decimals)?,
                is_debit: difference < BigDecimal::zero(),
                block: trigger.block,
                timestamp: trigger.timestamp,
                tx_hash: trigger.block_hash.clone(),
                entry_type: EntryType::Rebase,
                log_position: 0,
                skip_non_negative_check: metadata.is_staking_contract(&account.holder),
            })?;
            report.adjusted += 1;
        }

        self.ledger.metrics().record_rebase(report.adjusted, report.unchanged);

        tracing::info!(
            token = %token_id,
            block = trigger.block,
            holders = report.holders,
            adjusted = report.adjusted,
            unchanged = report.unchanged,
            "Reconciled rebasing token"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SOHM: &str = "0x04906695d6d12cf5459975d7c3c03356e4ccd460";
    const HOLDER: &str = "0xbb3041f88c52b1f003a1a2ceeb63b73a2a9f3f04";

    #[test]
    fn test_static_oracle() {
        let oracle = StaticOracle::new().with_token(SOHM, 9);
        oracle.set_balance(SOHM, HOLDER, 1_100_000_000);

        let token = Address::new(SOHM);
        assert_eq!(oracle.decimals(&token).unwrap(), 9);
        assert_eq!(oracle.balance_of(&token, &Address::new(HOLDER)).unwrap(), 1_100_000_000);
        assert_eq!(oracle.balance_of(&token, &Address::new("0x01")).unwrap(), 0);

        let err = oracle.decimals(&Address::new("0x02")).unwrap_err();
        assert!(matches!(err, Error::Oracle(_)));
    }

    #[test]
    fn test_static_oracle_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tokens": {{"0x04906695D6D12CF5459975d7C3C03356E4Ccd460": {{"decimals": 9, "balances": {{"{}": "2300000000"}}}}}}}}"#,
            HOLDER.to_uppercase().replace("0X", "0x")
        )
        .unwrap();

        let oracle = StaticOracle::from_file(file.path()).unwrap();
        let token = Address::new(SOHM);
        assert_eq!(oracle.decimals(&token).unwrap(), 9);
        assert_eq!(oracle.balance_of(&token, &Address::new(HOLDER)).unwrap(), 2_300_000_000);
    }

    #[test]
    fn test_static_oracle_rejects_bad_balance() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tokens": {{"0x01": {{"decimals": 9, "balances": {{"0x02": "-5"}}}}}}}}"#).unwrap();

        let err = StaticOracle::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Oracle(_)));
    }
}
