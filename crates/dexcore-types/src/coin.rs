//! Single- and multi-denomination amounts.
//!
//! Amounts are whole units held in a [`Decimal`] with scale zero. Every
//! operation that could leave the representable range is checked and
//! reported as [`DexError::Overflow`]; nothing here panics on bad input.
//!
//! Text form follows the host chain: `"12apple"` for a coin and
//! `"12apple,3plum"` for a set of coins, sorted by denom.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{DexError, Result};

/// Minimum denom length accepted by [`validate_denom`].
pub const MIN_DENOM_LEN: usize = 3;
/// Maximum denom length accepted by [`validate_denom`].
pub const MAX_DENOM_LEN: usize = 128;

/// Check that a denom is 3-128 chars, starts with a letter, and only uses
/// alphanumerics and `/:._-`.
pub fn validate_denom(denom: &str) -> Result<()> {
    let invalid = |reason: &str| DexError::InvalidCoin {
        input: denom.to_string(),
        reason: reason.to_string(),
    };
    if denom.len() < MIN_DENOM_LEN || denom.len() > MAX_DENOM_LEN {
        return Err(invalid("denom must be between 3 and 128 characters"));
    }
    if !denom.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(invalid("denom must start with a letter"));
    }
    if !denom
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | ':' | '.' | '_' | '-'))
    {
        return Err(invalid("denom contains an invalid character"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Integer arithmetic on whole-unit decimals
// ---------------------------------------------------------------------------

/// `floor(a * b / c)` and its remainder, for non-negative `a`, `b` and positive `c`.
pub fn mul_div_floor(a: Decimal, b: Decimal, c: Decimal) -> Result<(Decimal, Decimal)> {
    if c <= Decimal::ZERO {
        return Err(DexError::overflow(format!("cannot divide {a} * {b} by {c}")));
    }
    let product = a
        .checked_mul(b)
        .ok_or_else(|| DexError::overflow(format!("{a} * {b}")))?;
    let mut quotient = product
        .checked_div(c)
        .ok_or_else(|| DexError::overflow(format!("{product} / {c}")))?
        .trunc();
    let mut remainder = quotient
        .checked_mul(c)
        .and_then(|q| product.checked_sub(q))
        .ok_or_else(|| DexError::overflow(format!("{product} mod {c}")))?;
    // Decimal division rounds at 28 significant digits; settle on the exact integer result.
    while remainder < Decimal::ZERO {
        quotient -= Decimal::ONE;
        remainder += c;
    }
    while remainder >= c {
        quotient += Decimal::ONE;
        remainder -= c;
    }
    Ok((quotient.normalize(), remainder.normalize()))
}

/// `ceil(a * b / c)` for non-negative `a`, `b` and positive `c`.
pub fn mul_div_ceil(a: Decimal, b: Decimal, c: Decimal) -> Result<Decimal> {
    let (quotient, remainder) = mul_div_floor(a, b, c)?;
    if remainder.is_zero() {
        Ok(quotient)
    } else {
        Ok(quotient + Decimal::ONE)
    }
}

fn checked_add(a: Decimal, b: Decimal, denom: &str) -> Result<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| DexError::overflow(format!("{a}{denom} + {b}{denom}")))
}

// ---------------------------------------------------------------------------
// Coin
// ---------------------------------------------------------------------------

/// An amount of a single denomination.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coin {
    pub denom: String,
    pub amount: Decimal,
}

impl Coin {
    #[must_use]
    pub fn new(amount: impl Into<Decimal>, denom: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount: amount.into().normalize(),
        }
    }

    #[must_use]
    pub fn zero(denom: impl Into<String>) -> Self {
        Self::new(Decimal::ZERO, denom)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amount.is_zero()
    }

    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.amount < Decimal::ZERO
    }

    /// Denom is well formed and the amount is a whole, non-negative number.
    pub fn validate(&self) -> Result<()> {
        validate_denom(&self.denom)?;
        if self.is_negative() {
            return Err(DexError::InvalidCoin {
                input: self.to_string(),
                reason: "negative amount".into(),
            });
        }
        if !self.amount.fract().is_zero() {
            return Err(DexError::InvalidCoin {
                input: self.to_string(),
                reason: "amount must be a whole number".into(),
            });
        }
        Ok(())
    }

    /// Same denom, amount replaced.
    #[must_use]
    pub fn with_amount(&self, amount: Decimal) -> Self {
        Self::new(amount, self.denom.clone())
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount.normalize(), self.denom)
    }
}

impl fmt::Debug for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

impl FromStr for Coin {
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(trimmed.len());
        let (amount, denom) = trimmed.split_at(split);
        if amount.is_empty() {
            return Err(DexError::InvalidCoin {
                input: s.to_string(),
                reason: "missing amount".into(),
            });
        }
        let amount = Decimal::from_str(amount).map_err(|e| DexError::InvalidCoin {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        validate_denom(denom)?;
        Ok(Self::new(amount, denom))
    }
}

impl TryFrom<String> for Coin {
    type Error = DexError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Coin> for String {
    fn from(value: Coin) -> Self {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// Coins
// ---------------------------------------------------------------------------

/// A multi-denomination amount. Zero entries are never stored, so an empty
/// set and a set of zeros are the same value.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coins {
    amounts: BTreeMap<String, Decimal>,
}

impl Coins {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list of coins, summing repeated denoms.
    pub fn from_coins<'a>(coins: impl IntoIterator<Item = &'a Coin>) -> Result<Self> {
        let mut rv = Self::new();
        for coin in coins {
            rv.add_coin(coin)?;
        }
        Ok(rv)
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.amounts.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    #[must_use]
    pub fn amount_of(&self, denom: &str) -> Decimal {
        self.amounts.get(denom).copied().unwrap_or(Decimal::ZERO)
    }

    #[must_use]
    pub fn is_any_negative(&self) -> bool {
        self.amounts.values().any(|a| *a < Decimal::ZERO)
    }

    /// Coins in denom order.
    pub fn iter(&self) -> impl Iterator<Item = Coin> + '_ {
        self.amounts
            .iter()
            .map(|(denom, amount)| Coin::new(*amount, denom.clone()))
    }

    pub fn denoms(&self) -> impl Iterator<Item = &str> {
        self.amounts.keys().map(String::as_str)
    }

    pub fn add_coin(&mut self, coin: &Coin) -> Result<()> {
        if coin.is_zero() {
            return Ok(());
        }
        let current = self.amount_of(&coin.denom);
        let sum = checked_add(current, coin.amount, &coin.denom)?;
        self.set_amount(&coin.denom, sum);
        Ok(())
    }

    /// `self + other`.
    pub fn checked_add(&self, other: &Coins) -> Result<Coins> {
        let mut rv = self.clone();
        for coin in other.iter() {
            rv.add_coin(&coin)?;
        }
        Ok(rv)
    }

    /// `self - other`, or `None` if any denom would go negative.
    #[must_use]
    pub fn checked_sub(&self, other: &Coins) -> Option<Coins> {
        let mut rv = self.clone();
        for (denom, amount) in &other.amounts {
            let left = rv.amount_of(denom).checked_sub(*amount)?;
            if left < Decimal::ZERO {
                return None;
            }
            rv.set_amount(denom, left);
        }
        Some(rv)
    }

    /// Every denom of `other` is present here with at least that amount.
    #[must_use]
    pub fn is_all_gte(&self, other: &Coins) -> bool {
        other
            .amounts
            .iter()
            .all(|(denom, amount)| self.amount_of(denom) >= *amount)
    }

    fn set_amount(&mut self, denom: &str, amount: Decimal) {
        if amount.is_zero() {
            self.amounts.remove(denom);
        } else {
            self.amounts.insert(denom.to_string(), amount.normalize());
        }
    }
}

impl From<Coin> for Coins {
    fn from(coin: Coin) -> Self {
        let mut rv = Self::new();
        rv.set_amount(&coin.denom, coin.amount);
        rv
    }
}

impl From<Option<Coin>> for Coins {
    fn from(coin: Option<Coin>) -> Self {
        coin.map(Coins::from).unwrap_or_default()
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for coin in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{coin}")?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

impl FromStr for Coins {
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self> {
        let mut rv = Self::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let coin: Coin = part.parse()?;
            if rv.amounts.contains_key(&coin.denom) {
                return Err(DexError::InvalidCoin {
                    input: s.to_string(),
                    reason: format!("duplicate denom {}", coin.denom),
                });
            }
            rv.add_coin(&coin)?;
        }
        Ok(rv)
    }
}

impl TryFrom<String> for Coins {
    type Error = DexError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Coins> for String {
    fn from(value: Coins) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn coin_parse_and_display() {
        let coin: Coin = "12apple".parse().unwrap();
        assert_eq!(coin, Coin::new(12, "apple"));
        assert_eq!(coin.to_string(), "12apple");
    }

    #[test]
    fn coin_parse_rejects_garbage() {
        assert!("apple".parse::<Coin>().is_err());
        assert!("12".parse::<Coin>().is_err());
        assert!("12ap".parse::<Coin>().is_err());
        assert!("12 apple!".parse::<Coin>().is_err());
        assert!("-3apple".parse::<Coin>().is_err());
    }

    #[test]
    fn coins_sorted_and_summed() {
        let coins = Coins::from_coins(&[
            Coin::new(3, "plum"),
            Coin::new(12, "apple"),
            Coin::new(4, "plum"),
            Coin::zero("fig"),
        ])
        .unwrap();
        assert_eq!(coins.to_string(), "12apple,7plum");
        assert_eq!(coins.amount_of("fig"), Decimal::ZERO);
    }

    #[test]
    fn coins_parse_rejects_duplicates() {
        assert!("1apple,2apple".parse::<Coins>().is_err());
        assert!("".parse::<Coins>().unwrap().is_zero());
    }

    #[test]
    fn checked_sub_refuses_negative() {
        let have: Coins = "112apple,5plum".parse().unwrap();
        let less: Coins = "12apple".parse().unwrap();
        let more: Coins = "12apple,6plum".parse().unwrap();
        assert_eq!(have.checked_sub(&less).unwrap().to_string(), "100apple,5plum");
        assert!(have.checked_sub(&more).is_none());
        assert!(have.checked_sub(&have).unwrap().is_zero());
    }

    #[test]
    fn mul_div_rounding() {
        assert_eq!(mul_div_floor(dec(60), dec(1), dec(30)).unwrap(), (dec(2), dec(0)));
        assert_eq!(mul_div_floor(dec(750), dec(250), dec(10_000)).unwrap(), (dec(18), dec(7500)));
        assert_eq!(mul_div_ceil(dec(750), dec(250), dec(10_000)).unwrap(), dec(19));
        assert_eq!(mul_div_ceil(dec(5000), dec(1000), dec(10_000)).unwrap(), dec(500));
        assert!(mul_div_floor(dec(1), dec(1), dec(0)).is_err());
    }

    #[test]
    fn mul_div_exact_on_large_values() {
        let big = Decimal::from(u64::MAX);
        let (q, r) = mul_div_floor(big, dec(3), dec(7)).unwrap();
        assert_eq!(q * dec(7) + r, big * dec(3));
        assert!(r < dec(7));
    }

    #[test]
    fn coins_serde_as_string() {
        let coins: Coins = "123apple,4plum".parse().unwrap();
        let json = serde_json::to_string(&coins).unwrap();
        assert_eq!(json, "\"123apple,4plum\"");
        let back: Coins = serde_json::from_str(&json).unwrap();
        assert_eq!(back, coins);
    }
}
