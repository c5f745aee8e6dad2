//! Typed inputs delivered by the event source
//!
//! Decoding chain logs happens upstream; the ledger only sees these values, in
//! ascending (block, log position) order.

use crate::types::Address;
use serde::{Deserialize, Serialize};

/// ERC20 `Transfer` log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Token contract
    pub token_address: Address,
    /// Sender
    pub from: Address,
    /// Receiver
    pub to: Address,
    /// Raw amount
    #[serde(with = "raw_amount")]
    pub value: u128,
    /// Block number
    pub block: u64,
    /// Block timestamp (unix seconds)
    pub timestamp: i64,
    /// Transaction hash
    pub tx_hash: String,
    /// Log position within the transaction
    pub log_position: u64,
}

/// Mint call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintEvent {
    /// Token contract
    pub token_address: Address,
    /// Receiver
    pub to: Address,
    /// Raw amount
    #[serde(with = "raw_amount")]
    pub amount: u128,
    /// Block number
    pub block: u64,
    /// Block timestamp (unix seconds)
    pub timestamp: i64,
    /// Transaction hash
    pub tx_hash: String,
}

/// Burn call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurnEvent {
    /// Token contract
    pub token_address: Address,
    /// Holder losing the tokens
    pub from: Address,
    /// Raw amount
    #[serde(with = "raw_amount")]
    pub amount: u128,
    /// Block number
    pub block: u64,
    /// Block timestamp (unix seconds)
    pub timestamp: i64,
    /// Transaction hash
    pub tx_hash: String,
}

/// Request to reconcile a rebasing token against its contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebaseTrigger {
    /// Token contract
    pub token_address: Address,
    /// Block number
    pub block: u64,
    /// Block timestamp (unix seconds)
    pub timestamp: i64,
    /// Identity of the synthetic entries (block or rebase transaction hash)
    pub block_hash: String,
}

/// Periodic chain-time signal driving backfill and rebase cadences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCheckpoint {
    /// Block number
    pub block: u64,
    /// Block timestamp (unix seconds)
    pub timestamp: i64,
    /// Block hash
    pub block_hash: String,
}

/// Any input the ledger accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// Token transfer
    Transfer(TransferEvent),
    /// Token mint
    Mint(MintEvent),
    /// Token burn
    Burn(BurnEvent),
    /// Explicit reconciliation request
    Rebase(RebaseTrigger),
    /// Block cadence tick
    Block(BlockCheckpoint),
}

impl ChainEvent {
    /// Block number of the event
    pub fn block(&self) -> u64 {
        match self {
            ChainEvent::Transfer(e) => e.block,
            ChainEvent::Mint(e) => e.block,
            ChainEvent::Burn(e) => e.block,
            ChainEvent::Rebase(e) => e.block,
            ChainEvent::Block(e) => e.block,
        }
    }
}

/// Raw amounts exceed `u64`, so they travel as decimal strings in JSON.
/// Plain numbers are still accepted on input.
mod raw_amount {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct RawAmount;

        impl<'de> Visitor<'de> for RawAmount {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an unsigned integer or a decimal string")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<u128, E> {
                Ok(value.into())
            }

            fn visit_u128<E: de::Error>(self, value: u128) -> Result<u128, E> {
                Ok(value)
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<u128, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(RawAmount)
    }
}
