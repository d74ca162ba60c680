//! Identifiers used throughout DexCore.
//!
//! Orders and markets use fixed-width integers so that they can be encoded
//! big-endian into ledger keys and iterate in numeric order. Accounts are
//! opaque strings owned by the host chain.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants;

// ---------------------------------------------------------------------------
// OrderId
// ---------------------------------------------------------------------------

/// Order identifier. Assigned monotonically by the order ledger, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl OrderId {
    /// Big-endian key encoding.
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OrderId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// MarketId
// ---------------------------------------------------------------------------

/// Market identifier (32-bit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct MarketId(pub u32);

impl MarketId {
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// The account that receives settlement fees for this market.
    ///
    /// Derived deterministically from the id; the host is expected to treat
    /// it as a module-style account that nobody holds keys for.
    #[must_use]
    pub fn account(self) -> AccountId {
        AccountId(format!("{}{}", constants::MARKET_ACCOUNT_PREFIX, self.0))
    }
}

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for MarketId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// AccountId
// ---------------------------------------------------------------------------

/// Account identifier (bech32 address or module account name on the host).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct AccountId(pub String);

impl AccountId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_id_big_endian_roundtrip() {
        let id = OrderId(0x0102_0304_0506_0708);
        assert_eq!(id.to_be_bytes(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(OrderId::from_be_bytes(id.to_be_bytes()), id);
    }

    #[test]
    fn market_id_orders_numerically_as_bytes() {
        let low = MarketId(255).to_be_bytes();
        let high = MarketId(256).to_be_bytes();
        assert!(low < high);
    }

    #[test]
    fn market_account_is_derived_from_id() {
        assert_eq!(MarketId(7).account(), MarketId(7).account());
        assert_ne!(MarketId(7).account(), MarketId(8).account());
        assert_eq!(MarketId(3).account().as_str(), "market/3");
    }
}
