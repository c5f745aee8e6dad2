//! Static token metadata
//!
//! The registry is built once from [`Config`] and handed to the ledger at
//! construction. It never changes while events are processed.

use crate::amount::MAX_DECIMALS;
use crate::config::{Config, TokenConfig};
use crate::types::{Address, Token};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// Metadata for one token contract
#[derive(Debug, Clone)]
pub struct TokenMetadata {
    /// Display name
    pub name: String,

    /// Chain name
    pub chain: String,

    /// Contract address
    pub address: Address,

    /// Decimal precision
    pub decimals: u32,

    /// Needs periodic reconciliation
    pub rebasing: bool,

    /// Reconciliation cadence in blocks
    pub rebase_interval_blocks: u64,

    /// Staking contract exempt from the non-negative check
    pub staking_contract: Option<Address>,

    ignored: HashSet<Address>,
}

impl TokenMetadata {
    /// Ledger id of the token
    pub fn token_id(&self) -> String {
        Token::id_for(&self.name, &self.chain)
    }

    /// Whether `holder` must never get a ledger account for this token
    pub fn is_ignored(&self, holder: &Address) -> bool {
        self.ignored.contains(holder)
    }

    /// Whether `holder` is this token's staking contract
    pub fn is_staking_contract(&self, holder: &Address) -> bool {
        self.staking_contract.as_ref() == Some(holder)
    }

    /// Fresh token record
    pub fn new_token(&self) -> Token {
        Token::new(&self.name, &self.chain, self.address.clone(), self.decimals)
    }
}

/// Address-keyed token metadata
#[derive(Debug, Clone, Default)]
pub struct TokenRegistry {
    tokens: HashMap<Address, TokenMetadata>,
    order: Vec<Address>,
    ignored: HashSet<Address>,
}

impl TokenRegistry {
    /// Build from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.chain, &config.tokens, &config.ignored_addresses)
    }

    /// Build from token definitions and a global ignore list
    pub fn new(chain: &str, tokens: &[TokenConfig], ignored_addresses: &[String]) -> Result<Self> {
        let mut global_ignored: HashSet<Address> =
            ignored_addresses.iter().map(|a| Address::new(a.as_str())).collect();
        global_ignored.insert(Address::zero());

        let mut registry = TokenRegistry {
            ignored: global_ignored.clone(),
            ..TokenRegistry::default()
        };
        let mut ids = HashSet::new();

        for token in tokens {
            if token.name.is_empty() {
                return Err(Error::Config(format!("Token {} has no name", token.address)));
            }
            if token.decimals > MAX_DECIMALS {
                return Err(Error::Config(format!(
                    "Token {} has {} decimals, max is {}",
                    token.name, token.decimals, MAX_DECIMALS
                )));
            }
            if token.rebasing && token.rebase_interval_blocks == 0 {
                return Err(Error::Config(format!(
                    "Rebasing token {} needs a nonzero rebase interval",
                    token.name
                )));
            }

            let address = Address::new(token.address.as_str());
            let mut ignored = global_ignored.clone();
            if token.ignore_own_address {
                ignored.insert(address.clone());
            }
            ignored.extend(token.ignored_holders.iter().map(|a| Address::new(a.as_str())));

            let metadata = TokenMetadata {
                name: token.name.clone(),
                chain: chain.to_string(),
                address: address.clone(),
                decimals: token.decimals,
                rebasing: token.rebasing,
                rebase_interval_blocks: token.rebase_interval_blocks,
                staking_contract: token.staking_contract.as_deref().map(Address::new),
                ignored,
            };

            if !ids.insert(metadata.token_id()) {
                return Err(Error::Config(format!("Duplicate token id {}", metadata.token_id())));
            }
            if registry.tokens.insert(address.clone(), metadata).is_some() {
                return Err(Error::Config(format!("Duplicate token address {}", address)));
            }
            registry.order.push(address);
        }

        Ok(registry)
    }

    /// Look up a token
    pub fn get(&self, address: &Address) -> Option<&TokenMetadata> {
        self.tokens.get(address)
    }

    /// Look up a token, failing if unknown
    pub fn resolve(&self, address: &Address) -> Result<&TokenMetadata> {
        self.get(address)
            .ok_or_else(|| Error::UnknownToken(address.to_string()))
    }

    /// Whether `holder` is ignored for every token
    pub fn is_globally_ignored(&self, holder: &Address) -> bool {
        self.ignored.contains(holder)
    }

    /// Decimal precision of a token
    pub fn decimals(&self, address: &Address) -> Result<u32> {
        self.resolve(address).map(|token| token.decimals)
    }

    /// Tokens in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &TokenMetadata> {
        self.order.iter().filter_map(|address| self.tokens.get(address))
    }

    /// Number of tokens
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no tokens are configured
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
