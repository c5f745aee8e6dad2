//! Core types for the ledger
//!
//! All persisted records carry a derivable string identifier built by joining
//! parent identifiers with `/`:
//!
//! - token: `{name}/{chain}`
//! - holder: `{token}/{address}`
//! - daily balance: `{holder}/{day}`
//! - transaction log entry: `{holder}/{tx_hash}/{log_position}`
//! - daily snapshot: `{token}/{day}`
//!
//! Balances are exact decimals; records serialize deterministically (bincode).

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Zero address, used as the sentinel counterparty of mints and burns
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Chain account address, normalized to lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Create new address
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into().to_lowercase())
    }

    /// The zero address
    pub fn zero() -> Self {
        Self(ZERO_ADDRESS.to_string())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0 == ZERO_ADDRESS
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Self::new(address)
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UTC calendar day used to bucket balance records and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DayKey(NaiveDate);

impl DayKey {
    /// Truncate a unix timestamp (seconds) to its UTC day
    pub fn from_timestamp(timestamp: i64) -> Result<Self> {
        utc_datetime(timestamp).map(|dt| Self(dt.date_naive()))
    }

    /// Wrap a calendar date
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date)
    }

    /// Parse `YYYY-MM-DD`
    pub fn parse(day: &str) -> Result<Self> {
        NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map(Self)
            .map_err(|e| Error::InvalidEvent(format!("Invalid day key '{}': {}", day, e)))
    }

    /// The calendar day before this one
    pub fn previous(&self) -> Result<Self> {
        self.0
            .pred_opt()
            .map(Self)
            .ok_or_else(|| Error::InvalidEvent(format!("No day before {}", self)))
    }

    /// The calendar day after this one
    pub fn next(&self) -> Result<Self> {
        self.0
            .succ_opt()
            .map(Self)
            .ok_or_else(|| Error::InvalidEvent(format!("No day after {}", self)))
    }

    /// Underlying date
    pub fn date(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

fn utc_datetime(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| Error::InvalidEvent(format!("Timestamp out of range: {}", timestamp)))
}

/// ISO-8601 date-time with millisecond precision, e.g. `2022-10-09T12:05:59.000Z`
pub fn iso8601(timestamp: i64) -> Result<String> {
    utc_datetime(timestamp).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Kind of balance change recorded in the transaction log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// ERC20 transfer leg
    Transfer,
    /// Tokens created
    Mint,
    /// Tokens destroyed
    Burn,
    /// Synthetic reconciliation against the token contract
    Rebase,
}

impl EntryType {
    /// Upper-case label
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Transfer => "TRANSFER",
            EntryType::Mint => "MINT",
            EntryType::Burn => "BURN",
            EntryType::Rebase => "REBASE",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token tracked by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// `{name}/{chain}`
    pub id: String,

    /// Display name
    pub name: String,

    /// Chain the contract lives on
    pub chain: String,

    /// Contract address
    pub address: Address,

    /// Decimal precision of raw amounts
    pub decimals: u32,

    /// Holder account ids in registration order (append-only)
    pub holders: Vec<String>,

    /// Latest day whose snapshot has been backfilled
    pub last_backfilled_day: Option<DayKey>,
}

impl Token {
    /// Create a token with no holders
    pub fn new(name: impl Into<String>, chain: impl Into<String>, address: Address, decimals: u32) -> Self {
        let name = name.into();
        let chain = chain.into();
        Self {
            id: Self::id_for(&name, &chain),
            name,
            chain,
            address,
            decimals,
            holders: Vec::new(),
            last_backfilled_day: None,
        }
    }

    /// Identifier for a token name on a chain
    pub fn id_for(name: &str, chain: &str) -> String {
        format!("{}/{}", name, chain)
    }
}

/// A holder's running balance of one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolderAccount {
    /// `{token}/{address}`
    pub id: String,

    /// Owning token id
    pub token: String,

    /// Holder address
    pub holder: Address,

    /// Current ledger balance
    #[serde(with = "crate::amount::decimal_str")]
    pub balance: BigDecimal,
}

impl HolderAccount {
    /// Create an account with a zero balance
    pub fn new(token_id: &str, holder: Address) -> Self {
        Self {
            id: Self::id_for(token_id, &holder),
            token: token_id.to_string(),
            holder,
            balance: BigDecimal::zero(),
        }
    }

    /// Identifier for a holder of a token
    pub fn id_for(token_id: &str, holder: &Address) -> String {
        format!("{}/{}", token_id, holder)
    }
}

/// Immutable audit entry for one balance delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLogEntry {
    /// `{holder}/{tx_hash}/{log_position}`
    pub id: String,

    /// Holder account id
    pub holder: String,

    /// Balance after the delta
    #[serde(with = "crate::amount::decimal_str")]
    pub balance: BigDecimal,

    /// Balance before the delta
    #[serde(with = "crate::amount::decimal_str")]
    pub previous_balance: BigDecimal,

    /// Signed delta
    #[serde(with = "crate::amount::decimal_str")]
    pub value: BigDecimal,

    /// Block number
    pub block: u64,

    /// Unix timestamp (seconds)
    pub timestamp: i64,

    /// ISO-8601 date-time of the timestamp
    pub date: String,

    /// Kind of change
    pub entry_type: EntryType,

    /// Source transaction (or block hash for rebases)
    pub tx_hash: String,

    /// Position of the log within the source transaction
    pub log_position: u64,

    /// Other side of the movement, if any
    pub counterparty: Option<Address>,
}

impl TransactionLogEntry {
    /// Identifier for a delta of a holder within a transaction
    pub fn id_for(holder_id: &str, tx_hash: &str, log_position: u64) -> String {
        format!("{}/{}/{}", holder_id, tx_hash, log_position)
    }
}

/// A holder's balance on one UTC day; only exists while nonzero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBalanceRecord {
    /// `{holder}/{day}`
    pub id: String,

    /// Holder account id
    pub holder: String,

    /// Day of the balance
    pub date: DayKey,

    /// Balance as of that day
    #[serde(with = "crate::amount::decimal_str")]
    pub balance: BigDecimal,
}

impl DailyBalanceRecord {
    /// Create a record
    pub fn new(holder_id: &str, date: DayKey, balance: BigDecimal) -> Self {
        Self {
            id: Self::id_for(holder_id, date),
            holder: holder_id.to_string(),
            date,
            balance,
        }
    }

    /// Identifier for a holder's balance on a day
    pub fn id_for(holder_id: &str, date: DayKey) -> String {
        format!("{}/{}", holder_id, date)
    }
}

/// Active holder balances of a token on one UTC day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    /// `{token}/{day}`
    pub id: String,

    /// Token id
    pub token: String,

    /// Day of the snapshot
    pub date: DayKey,

    /// Daily balance record ids active on that day
    pub balances: BalanceList,
}

impl DailySnapshot {
    /// Create an empty snapshot
    pub fn new(token_id: &str, date: DayKey) -> Self {
        Self {
            id: Self::id_for(token_id, date),
            token: token_id.to_string(),
            date,
            balances: BalanceList::default(),
        }
    }

    /// Identifier for a token's snapshot on a day
    pub fn id_for(token_id: &str, date: DayKey) -> String {
        format!("{}/{}", token_id, date)
    }
}

/// Insertion-ordered, duplicate-free list of record ids
///
/// Serialized as a plain list; the membership index is rebuilt on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct BalanceList {
    ids: Vec<String>,
    index: HashSet<String>,
}

impl BalanceList {
    /// Append `id` unless already present; returns whether it was added
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if !self.index.insert(id.clone()) {
            return false;
        }
        self.ids.push(id);
        true
    }

    /// Remove `id` keeping the order of the rest; returns whether it was present
    pub fn remove(&mut self, id: &str) -> bool {
        if !self.index.remove(id) {
            return false;
        }
        if let Some(pos) = self.ids.iter().position(|existing| existing == id) {
            self.ids.remove(pos);
        }
        true
    }

    /// Membership test
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains(id)
    }

    /// Number of ids
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }

    /// Ids as a slice
    pub fn as_slice(&self) -> &[String] {
        &self.ids
    }
}

impl From<Vec<String>> for BalanceList {
    fn from(ids: Vec<String>) -> Self {
        let mut list = BalanceList::default();
        for id in ids {
            list.insert(id);
        }
        list
    }
}

impl From<BalanceList> for Vec<String> {
    fn from(list: BalanceList) -> Self {
        list.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_normalized() {
        let address = Address::new("0xBB3041F88c52b1F003a1a2ceeb63b73a2a9f3F04");
        assert_eq!(address.as_str(), "0xbb3041f88c52b1f003a1a2ceeb63b73a2a9f3f04");
        assert_eq!(address, Address::from("0xbb3041f88c52b1f003a1a2ceeb63b73a2a9f3f04"));
        assert!(Address::zero().is_zero());
    }

    #[test]
    fn test_day_key_truncates_to_utc_midnight() {
        // 2022-10-09T12:05:59Z
        let day = DayKey::from_timestamp(1_665_317_159).unwrap();
        assert_eq!(day.to_string(), "2022-10-09");

        // One second before midnight stays on the same day
        let late = DayKey::from_timestamp(1_665_359_999).unwrap();
        assert_eq!(late, day);

        assert_eq!(day.previous().unwrap().to_string(), "2022-10-08");
        assert_eq!(day.next().unwrap().to_string(), "2022-10-10");
        assert_eq!(DayKey::parse("2022-10-09").unwrap(), day);
    }

    #[test]
    fn test_iso8601() {
        assert_eq!(iso8601(1_665_317_159).unwrap(), "2022-10-09T12:05:59.000Z");
    }

    #[test]
    fn test_identifiers() {
        let token = Token::new("gOHM", "Ethereum", Address::new("0x0ab8"), 18);
        assert_eq!(token.id, "gOHM/Ethereum");

        let holder = HolderAccount::new(&token.id, Address::new("0xABC"));
        assert_eq!(holder.id, "gOHM/Ethereum/0xabc");

        let day = DayKey::parse("2022-10-09").unwrap();
        assert_eq!(
            DailyBalanceRecord::id_for(&holder.id, day),
            "gOHM/Ethereum/0xabc/2022-10-09"
        );
        assert_eq!(
            TransactionLogEntry::id_for(&holder.id, "0xdead", 1),
            "gOHM/Ethereum/0xabc/0xdead/1"
        );
        assert_eq!(DailySnapshot::id_for(&token.id, day), "gOHM/Ethereum/2022-10-09");
    }

    #[test]
    fn test_balance_list_set_semantics() {
        let mut list = BalanceList::default();
        assert!(list.insert("a"));
        assert!(list.insert("b"));
        assert!(!list.insert("a"));
        assert!(list.insert("c"));
        assert_eq!(list.as_slice(), &["a", "b", "c"]);

        assert!(list.remove("b"));
        assert!(!list.remove("b"));
        assert!(!list.contains("b"));
        assert_eq!(list.as_slice(), &["a", "c"]);
    }

    #[test]
    fn test_balance_list_serializes_as_list() {
        let list = BalanceList::from(vec!["x".to_string(), "y".to_string(), "x".to_string()]);
        assert_eq!(list.len(), 2);

        let bytes = bincode::serialize(&list).unwrap();
        let restored: BalanceList = bincode::deserialize(&bytes).unwrap();
        assert!(restored.contains("y"));
        assert_eq!(restored, list);
    }
}
