//! Conversion between raw token integers and exact decimals
//!
//! Balances are `BigDecimal`, so any `u128` amount at any token precision is
//! represented and summed without rounding.

use crate::{Error, Result};
use bigdecimal::num_bigint::BigInt;
use bigdecimal::{BigDecimal, ToPrimitive};

/// Largest precision an ERC20 `decimals()` (a `uint8`) can report
pub const MAX_DECIMALS: u32 = 255;

/// Convert a raw on-chain amount to a decimal at `decimals` precision
///
/// The result is canonical, so `1100000000000000000` at 18 decimals is `1.1`.
pub fn to_decimal(raw: u128, decimals: u32) -> BigDecimal {
    canonical(BigDecimal::new(BigInt::from(raw), i64::from(decimals)))
}

/// Convert the magnitude of a decimal back to a raw amount
///
/// Digits beyond `decimals` are truncated.
pub fn to_raw(value: &BigDecimal, decimals: u32) -> Result<u128> {
    let (digits, _) = value.abs().with_scale(i64::from(decimals)).into_bigint_and_exponent();
    digits
        .to_u128()
        .ok_or_else(|| Error::InvalidAmount(format!("{} does not fit a raw amount at {} decimals", value, decimals)))
}

/// Strip trailing zeros without switching whole numbers to exponent form
pub fn canonical(value: BigDecimal) -> BigDecimal {
    let normalized = value.normalized();
    if normalized.as_bigint_and_exponent().1 < 0 {
        normalized.with_scale(0)
    } else {
        normalized
    }
}

/// Serde helper storing decimals as their exact string form
pub mod decimal_str {
    use bigdecimal::BigDecimal;
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};
    use std::str::FromStr;

    /// Serialize as a plain decimal string
    pub fn serialize<S: Serializer>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    /// Parse a decimal string
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigDecimal, D::Error> {
        let value = String::deserialize(deserializer)?;
        BigDecimal::from_str(&value).map_err(D::Error::custom)
    }
}

/// Parse a decimal literal in tests
#[cfg(test)]
pub(crate) fn dec(value: &str) -> BigDecimal {
    use std::str::FromStr;
    BigDecimal::from_str(value).unwrap()
}
