//! Order types for the DexCore settlement core.
//!
//! Asks and bids share one id space and one store prefix, but almost no
//! behavior, so they are modelled as a sum type with the kind byte as the
//! explicit discriminant. Every read and write site matches exhaustively.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{constants, AccountId, Coin, Coins, DexError, MarketId, OrderId, Result};

/// Ask or bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum OrderKind {
    Ask,
    Bid,
}

impl OrderKind {
    /// Discriminant byte used in ledger keys.
    #[must_use]
    pub fn type_byte(self) -> u8 {
        match self {
            Self::Ask => 0x00,
            Self::Bid => 0x01,
        }
    }

    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Ask => Self::Bid,
            Self::Bid => Self::Ask,
        }
    }
}

impl TryFrom<u8> for OrderKind {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0x00 => Ok(Self::Ask),
            0x01 => Ok(Self::Bid),
            other => Err(other),
        }
    }
}

impl fmt::Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ask => write!(f, "ask"),
            Self::Bid => write!(f, "bid"),
        }
    }
}

/// An offer to sell `assets` for at least `price`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskOrder {
    pub market_id: MarketId,
    pub seller: AccountId,
    pub assets: Coin,
    pub price: Coin,
    /// Flat settlement fee the seller pays. Taken out of the price when it
    /// has the price denom, held separately otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seller_settlement_flat_fee: Option<Coin>,
    #[serde(default)]
    pub allow_partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// An offer to buy `assets` for exactly `price`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidOrder {
    pub market_id: MarketId,
    pub buyer: AccountId,
    pub assets: Coin,
    pub price: Coin,
    #[serde(default, skip_serializing_if = "Coins::is_zero")]
    pub buyer_settlement_fees: Coins,
    #[serde(default)]
    pub allow_partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

/// The kind-specific part of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDetails {
    Ask(AskOrder),
    Bid(BidOrder),
}

/// An order as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub details: OrderDetails,
}

impl Order {
    #[must_use]
    pub fn new(id: OrderId, details: OrderDetails) -> Self {
        Self { id, details }
    }

    #[must_use]
    pub fn ask(id: OrderId, ask: AskOrder) -> Self {
        Self::new(id, OrderDetails::Ask(ask))
    }

    #[must_use]
    pub fn bid(id: OrderId, bid: BidOrder) -> Self {
        Self::new(id, OrderDetails::Bid(bid))
    }

    #[must_use]
    pub fn kind(&self) -> OrderKind {
        match &self.details {
            OrderDetails::Ask(_) => OrderKind::Ask,
            OrderDetails::Bid(_) => OrderKind::Bid,
        }
    }

    #[must_use]
    pub fn market_id(&self) -> MarketId {
        match &self.details {
            OrderDetails::Ask(a) => a.market_id,
            OrderDetails::Bid(b) => b.market_id,
        }
    }

    #[must_use]
    pub fn owner(&self) -> &AccountId {
        match &self.details {
            OrderDetails::Ask(a) => &a.seller,
            OrderDetails::Bid(b) => &b.buyer,
        }
    }

    #[must_use]
    pub fn assets(&self) -> &Coin {
        match &self.details {
            OrderDetails::Ask(a) => &a.assets,
            OrderDetails::Bid(b) => &b.assets,
        }
    }

    #[must_use]
    pub fn price(&self) -> &Coin {
        match &self.details {
            OrderDetails::Ask(a) => &a.price,
            OrderDetails::Bid(b) => &b.price,
        }
    }

    /// Seller flat fee for asks, buyer fees for bids.
    #[must_use]
    pub fn settlement_fees(&self) -> Coins {
        match &self.details {
            OrderDetails::Ask(a) => Coins::from(a.seller_settlement_flat_fee.clone()),
            OrderDetails::Bid(b) => b.buyer_settlement_fees.clone(),
        }
    }

    #[must_use]
    pub fn allow_partial(&self) -> bool {
        match &self.details {
            OrderDetails::Ask(a) => a.allow_partial,
            OrderDetails::Bid(b) => b.allow_partial,
        }
    }

    #[must_use]
    pub fn external_id(&self) -> Option<&str> {
        match &self.details {
            OrderDetails::Ask(a) => a.external_id.as_deref(),
            OrderDetails::Bid(b) => b.external_id.as_deref(),
        }
    }

    #[must_use]
    pub fn as_ask(&self) -> Option<&AskOrder> {
        match &self.details {
            OrderDetails::Ask(a) => Some(a),
            OrderDetails::Bid(_) => None,
        }
    }

    #[must_use]
    pub fn as_bid(&self) -> Option<&BidOrder> {
        match &self.details {
            OrderDetails::Ask(_) => None,
            OrderDetails::Bid(b) => Some(b),
        }
    }

    /// Funds that must be held while this order is open.
    ///
    /// Ask: the assets, plus the flat fee when it is not in the price denom
    /// (a same-denom fee is paid out of the price). Bid: price plus fees.
    pub fn hold_amount(&self) -> Result<Coins> {
        match &self.details {
            OrderDetails::Ask(a) => {
                let mut rv = Coins::from(a.assets.clone());
                if let Some(fee) = &a.seller_settlement_flat_fee {
                    if fee.denom != a.price.denom {
                        rv.add_coin(fee)?;
                    }
                }
                Ok(rv)
            }
            OrderDetails::Bid(b) => Coins::from(b.price.clone()).checked_add(&b.buyer_settlement_fees),
        }
    }

    /// Structural validation of a caller-constructed order.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| DexError::InvalidOrder { reason };
        if self.id.is_zero() {
            return Err(invalid("order id cannot be zero".into()));
        }
        if self.market_id().is_zero() {
            return Err(invalid("market id cannot be zero".into()));
        }
        if self.owner().is_empty() {
            return Err(invalid(format!("{} order {} has no owner", self.kind(), self.id)));
        }
        if self.owner().as_bytes().len() > usize::from(u8::MAX) {
            return Err(invalid(format!("owner of {} order {} exceeds 255 bytes", self.kind(), self.id)));
        }
        let (assets, price) = (self.assets(), self.price());
        price.validate()?;
        assets.validate()?;
        if !price.is_positive() {
            return Err(invalid(format!("price {price} must be positive")));
        }
        if !assets.is_positive() {
            return Err(invalid(format!("assets {assets} must be positive")));
        }
        if assets.denom == price.denom {
            return Err(invalid(format!(
                "price denom {} cannot be the same as assets denom {}",
                price.denom, assets.denom
            )));
        }
        match &self.details {
            OrderDetails::Ask(a) => {
                if let Some(fee) = &a.seller_settlement_flat_fee {
                    fee.validate()?;
                    if !fee.is_positive() {
                        return Err(invalid(format!("invalid seller settlement flat fee {fee}: must be positive")));
                    }
                }
            }
            OrderDetails::Bid(b) => {
                if b.buyer_settlement_fees.is_any_negative() {
                    return Err(invalid(format!(
                        "invalid buyer settlement fees {}: cannot be negative",
                        b.buyer_settlement_fees
                    )));
                }
            }
        }
        if let Some(ext) = self.external_id() {
            if ext.len() > constants::MAX_EXTERNAL_ID_LENGTH {
                return Err(invalid(format!(
                    "external id {ext:?} exceeds {} characters",
                    constants::MAX_EXTERNAL_ID_LENGTH
                )));
            }
        }
        Ok(())
    }

    /// Copy of this order with its quantities replaced.
    ///
    /// `fees` replaces the ask flat fee (first coin, if any) or the bid fees.
    #[must_use]
    pub fn with_amounts(&self, assets: Decimal, price: Decimal, fees: &Coins) -> Self {
        let details = match &self.details {
            OrderDetails::Ask(a) => OrderDetails::Ask(AskOrder {
                assets: a.assets.with_amount(assets),
                price: a.price.with_amount(price),
                seller_settlement_flat_fee: fees.iter().next(),
                ..a.clone()
            }),
            OrderDetails::Bid(b) => OrderDetails::Bid(BidOrder {
                assets: b.assets.with_amount(assets),
                price: b.price.with_amount(price),
                buyer_settlement_fees: fees.clone(),
                ..b.clone()
            }),
        };
        Self::new(self.id, details)
    }
}

#[cfg(any(test, feature = "test-helpers"))]
impl Order {
    /// An ask in market 1 with no fee and no partial fills.
    pub fn dummy_ask(id: u64, seller: &str, assets: Coin, price: Coin) -> Self {
        Self::ask(
            OrderId(id),
            AskOrder {
                market_id: MarketId(1),
                seller: AccountId::from(seller),
                assets,
                price,
                seller_settlement_flat_fee: None,
                allow_partial: false,
                external_id: None,
            },
        )
    }

    /// A bid in market 1 with no fee and no partial fills.
    pub fn dummy_bid(id: u64, buyer: &str, assets: Coin, price: Coin) -> Self {
        Self::bid(
            OrderId(id),
            BidOrder {
                market_id: MarketId(1),
                buyer: AccountId::from(buyer),
                assets,
                price,
                buyer_settlement_fees: Coins::new(),
                allow_partial: false,
                external_id: None,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_byte_roundtrip() {
        for kind in [OrderKind::Ask, OrderKind::Bid] {
            assert_eq!(OrderKind::try_from(kind.type_byte()), Ok(kind));
        }
        assert_eq!(OrderKind::try_from(0x07), Err(0x07));
    }

    #[test]
    fn ask_hold_includes_foreign_denom_fee_only() {
        let mut order = Order::dummy_ask(1, "seller", Coin::new(12, "apple"), Coin::new(60, "plum"));
        assert_eq!(order.hold_amount().unwrap().to_string(), "12apple");

        if let OrderDetails::Ask(a) = &mut order.details {
            a.seller_settlement_flat_fee = Some(Coin::new(3, "plum"));
        }
        assert_eq!(order.hold_amount().unwrap().to_string(), "12apple");

        if let OrderDetails::Ask(a) = &mut order.details {
            a.seller_settlement_flat_fee = Some(Coin::new(3, "fig"));
        }
        assert_eq!(order.hold_amount().unwrap().to_string(), "12apple,3fig");
    }

    #[test]
    fn bid_hold_is_price_plus_fees() {
        let mut order = Order::dummy_bid(2, "buyer", Coin::new(12, "apple"), Coin::new(60, "plum"));
        if let OrderDetails::Bid(b) = &mut order.details {
            b.buyer_settlement_fees = "2plum,1fig".parse().unwrap();
        }
        assert_eq!(order.hold_amount().unwrap().to_string(), "1fig,62plum");
    }

    #[test]
    fn validate_rejects_same_denoms_and_zero_ids() {
        let ok = Order::dummy_ask(1, "seller", Coin::new(12, "apple"), Coin::new(60, "plum"));
        assert!(ok.validate().is_ok());

        let same = Order::dummy_ask(1, "seller", Coin::new(12, "apple"), Coin::new(60, "apple"));
        assert!(matches!(same.validate().unwrap_err(), DexError::InvalidOrder { .. }));

        let zero = Order::dummy_bid(0, "buyer", Coin::new(12, "apple"), Coin::new(60, "plum"));
        assert!(matches!(zero.validate().unwrap_err(), DexError::InvalidOrder { .. }));

        let free = Order::dummy_bid(3, "buyer", Coin::new(12, "apple"), Coin::zero("plum"));
        assert!(free.validate().is_err());
    }

    #[test]
    fn with_amounts_keeps_identity() {
        let order = Order::dummy_bid(9, "buyer", Coin::new(10, "apple"), Coin::new(50, "plum"));
        let smaller = order.with_amounts(Decimal::from(4), Decimal::from(20), &Coins::new());
        assert_eq!(smaller.id, order.id);
        assert_eq!(smaller.owner(), order.owner());
        assert_eq!(smaller.market_id(), order.market_id());
        assert_eq!(smaller.assets(), &Coin::new(4, "apple"));
        assert_eq!(smaller.price(), &Coin::new(20, "plum"));
    }
}
