//! Fee ratio model.
//!
//! A ratio reads "for every `price` charge `fee`": `30plum:1plum` charges one
//! plum per thirty plum of price, rounded up.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::coin::{mul_div_ceil, mul_div_floor};
use crate::{Coin, DexError, Result};

/// Which side of a trade pays a settlement fee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeSide {
    Seller,
    Buyer,
}

impl fmt::Display for FeeSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Seller => write!(f, "seller"),
            Self::Buyer => write!(f, "buyer"),
        }
    }
}

/// How strictly a ratio must fit a price before it may be applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatioPolicy {
    /// Any price in the ratio's price denom; the fee rounds up.
    #[default]
    Loose,
    /// The price amount must be a whole multiple of the ratio's price amount.
    Strict,
}

/// Proportional fee: `fee` per `price`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeeRatio {
    pub price: Coin,
    pub fee: Coin,
}

impl FeeRatio {
    #[must_use]
    pub fn new(price: Coin, fee: Coin) -> Self {
        Self { price, fee }
    }

    pub fn validate(&self) -> Result<()> {
        self.price.validate()?;
        if self.fee.is_negative() {
            return Err(DexError::Configuration(format!(
                "fee ratio {self} fee amount cannot be negative"
            )));
        }
        self.fee.validate()?;
        if !self.price.is_positive() {
            return Err(DexError::Configuration(format!(
                "fee ratio {self} price amount must be positive"
            )));
        }
        if self.price.denom == self.fee.denom && self.fee.amount > self.price.amount {
            return Err(DexError::Configuration(format!(
                "fee ratio {self} fee amount cannot be greater than price amount"
            )));
        }
        Ok(())
    }

    /// Fee for `price` under `policy`.
    pub fn apply(&self, price: &Coin, policy: RatioPolicy) -> Result<Coin> {
        match policy {
            RatioPolicy::Loose => self.apply_loosely(price),
            RatioPolicy::Strict => self.apply_strictly(price),
        }
    }

    /// `ceil(price * fee / ratio_price)`. Only the denom and a zero ratio
    /// price can make this fail.
    pub fn apply_loosely(&self, price: &Coin) -> Result<Coin> {
        self.check_applicable(price)?;
        let amount = mul_div_ceil(price.amount, self.fee.amount, self.price.amount)?;
        Ok(self.fee.with_amount(amount))
    }

    /// Like [`Self::apply_loosely`], but the price must be an exact multiple
    /// of the ratio price so no rounding happens.
    pub fn apply_strictly(&self, price: &Coin) -> Result<Coin> {
        self.check_applicable(price)?;
        let (_, remainder) = mul_div_floor(price.amount, rust_decimal::Decimal::ONE, self.price.amount)?;
        if !remainder.is_zero() {
            return Err(self.not_applicable(
                price,
                format!("price amount {} is not a multiple of {}", price.amount, self.price.amount),
            ));
        }
        self.apply_loosely(price)
    }

    fn check_applicable(&self, price: &Coin) -> Result<()> {
        if price.denom != self.price.denom {
            return Err(self.not_applicable(price, "price denom does not match ratio price denom".into()));
        }
        if self.price.amount.is_zero() {
            return Err(self.not_applicable(price, "ratio price amount is zero".into()));
        }
        Ok(())
    }

    fn not_applicable(&self, price: &Coin, reason: String) -> DexError {
        DexError::RatioNotApplicable {
            ratio: self.to_string(),
            price: price.clone(),
            reason,
        }
    }
}

impl fmt::Display for FeeRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.price, self.fee)
    }
}

impl fmt::Debug for FeeRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.to_string())
    }
}

impl FromStr for FeeRatio {
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self> {
        let (price, fee) = s.split_once(':').ok_or_else(|| DexError::Configuration(format!(
            "invalid fee ratio {s:?}: expected <price>:<fee>"
        )))?;
        Ok(Self::new(price.parse()?, fee.parse()?))
    }
}

/// Comma-joined display of a set of ratios.
#[must_use]
pub fn ratios_string(ratios: &[FeeRatio]) -> String {
    ratios
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
