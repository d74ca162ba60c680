//! Fee calculator.
//!
//! Resolves a market's flat fee options and fee ratios into required
//! amounts, validates what a party offers against them, and computes the
//! exchange's cut of any fee a market collects.
//!
//! Ratio lookups distinguish three outcomes:
//! - the side has no ratios at all: no ratio fee is due
//! - the side has ratios, none for the price denom: [`DexError::NoRatioForDenom`]
//! - ratios exist for the denom but none applies to the price:
//!   every per-ratio error followed by [`DexError::NoApplicableRatio`]

use dexcore_types::coin::mul_div_ceil;
use dexcore_types::constants::{DEFAULT_SPLIT_BPS, MAX_SPLIT_BPS};
use dexcore_types::{Coin, Coins, DexError, FeeRatio, FeeSide, MarketId, OrderKind, RatioPolicy, Result, ratios_string};
use rust_decimal::Decimal;

use crate::keys::{AttrKind, MarketSubtype};
use crate::{KvStore, Ledger};

/// Check an offered flat fee against a table of options.
///
/// No options means no fee is required. Otherwise the offer must be in one
/// of the option denoms, for at least that option's amount.
pub fn validate_flat_fee(name: &'static str, options: &[Coin], offered: Option<&Coin>) -> Result<()> {
    if options.is_empty() {
        return Ok(());
    }
    let all = || Coins::from_coins(options);
    let Some(fee) = offered else {
        return Err(DexError::MissingFee { name, options: all()? });
    };
    match options.iter().find(|opt| opt.denom == fee.denom) {
        None => Err(DexError::InvalidFeeDenom {
            name,
            fee: fee.clone(),
            options: all()?,
        }),
        Some(required) if fee.amount < required.amount => Err(DexError::InsufficientFee {
            name,
            fee: fee.clone(),
            required: required.clone(),
        }),
        Some(_) => Ok(()),
    }
}

fn creation_subtype(kind: AttrKind) -> (MarketSubtype, &'static str) {
    match kind {
        AttrKind::CreateAsk => (MarketSubtype::CreateAskFlat, "ask order creation"),
        AttrKind::CreateBid => (MarketSubtype::CreateBidFlat, "bid order creation"),
        AttrKind::CreateCommitment => (MarketSubtype::CreateCommitmentFlat, "commitment creation"),
    }
}

fn settlement_subtypes(side: FeeSide) -> (MarketSubtype, MarketSubtype) {
    match side {
        FeeSide::Seller => (MarketSubtype::SellerSettlementFlat, MarketSubtype::SellerSettlementRatio),
        FeeSide::Buyer => (MarketSubtype::BuyerSettlementFlat, MarketSubtype::BuyerSettlementRatio),
    }
}

fn requirement(reason: String) -> DexError {
    DexError::FeeRequirement { reason }
}

impl<S: KvStore> Ledger<S> {
    // ---------------------------------------------------------------------
    // Flat fees
    // ---------------------------------------------------------------------

    /// Acceptable creation fees for an order kind (or a commitment).
    pub fn required_creation_fee(&self, market_id: MarketId, kind: AttrKind) -> Result<Vec<Coin>> {
        self.flat_fee_options(market_id, creation_subtype(kind).0)
    }

    pub fn validate_creation_fee(&self, market_id: MarketId, kind: AttrKind, offered: Option<&Coin>) -> Result<()> {
        let (subtype, name) = creation_subtype(kind);
        validate_flat_fee(name, &self.flat_fee_options(market_id, subtype)?, offered)
    }

    /// Acceptable flat settlement fees for one side.
    pub fn required_flat_settlement_fee(&self, market_id: MarketId, side: FeeSide) -> Result<Vec<Coin>> {
        self.flat_fee_options(market_id, settlement_subtypes(side).0)
    }

    pub fn validate_seller_settlement_flat_fee(&self, market_id: MarketId, offered: Option<&Coin>) -> Result<()> {
        let options = self.required_flat_settlement_fee(market_id, FeeSide::Seller)?;
        validate_flat_fee("seller settlement flat", &options, offered)
    }

    // ---------------------------------------------------------------------
    // Ratio fees
    // ---------------------------------------------------------------------

    /// The seller ratio for a price denom. Seller fees are paid out of the
    /// price, so the only candidate is the ratio from the denom to itself.
    pub fn seller_settlement_ratio(&self, market_id: MarketId, price_denom: &str) -> Result<Option<FeeRatio>> {
        let subtype = MarketSubtype::SellerSettlementRatio;
        match self.fee_ratio(market_id, subtype, price_denom, price_denom)? {
            Some(ratio) => Ok(Some(ratio)),
            None if self.has_fee_entries(market_id, subtype) => Err(DexError::NoRatioForDenom {
                side: FeeSide::Seller,
                denom: price_denom.to_string(),
            }),
            None => Ok(None),
        }
    }

    /// Seller ratio fee owed on `price`, `None` when the market charges none.
    pub fn seller_ratio_fee(&self, market_id: MarketId, price: &Coin, policy: RatioPolicy) -> Result<Option<Coin>> {
        match self.seller_settlement_ratio(market_id, &price.denom)? {
            Some(ratio) => ratio.apply(price, policy).map(Some),
            None => Ok(None),
        }
    }

    /// Every buyer ratio fee the buyer may choose from for `price`.
    ///
    /// Per-ratio failures are only reported when no ratio applies.
    pub fn buyer_ratio_fee_options(&self, market_id: MarketId, price: &Coin, policy: RatioPolicy) -> Result<Vec<Coin>> {
        let subtype = MarketSubtype::BuyerSettlementRatio;
        let ratios = self.fee_ratios_for_price_denom(market_id, subtype, &price.denom)?;
        if ratios.is_empty() {
            if self.has_fee_entries(market_id, subtype) {
                return Err(DexError::NoRatioForDenom {
                    side: FeeSide::Buyer,
                    denom: price.denom.clone(),
                });
            }
            return Ok(Vec::new());
        }

        let mut options = Vec::with_capacity(ratios.len());
        let mut errs = Vec::new();
        for ratio in &ratios {
            match ratio.apply(price, policy) {
                Ok(fee) => options.push(fee),
                Err(err) => errs.push(err),
            }
        }
        if options.is_empty() {
            errs.push(DexError::NoApplicableRatio {
                side: FeeSide::Buyer,
                price: price.clone(),
            });
            DexError::join_result(errs)?;
        }
        Ok(options)
    }

    /// Ratio fee options for either side: at most one for sellers.
    pub fn ratio_fee(&self, market_id: MarketId, side: FeeSide, price: &Coin, policy: RatioPolicy) -> Result<Vec<Coin>> {
        match side {
            FeeSide::Seller => Ok(self.seller_ratio_fee(market_id, price, policy)?.into_iter().collect()),
            FeeSide::Buyer => self.buyer_ratio_fee_options(market_id, price, policy),
        }
    }

    // ---------------------------------------------------------------------
    // Combined requirements
    // ---------------------------------------------------------------------

    /// Check that an ask's price exceeds every fee paid out of it.
    ///
    /// Only a flat fee in the price denom comes out of the price; others
    /// are held separately.
    pub fn validate_ask_price(
        &self,
        market_id: MarketId,
        price: &Coin,
        flat_fee: Option<&Coin>,
        policy: RatioPolicy,
    ) -> Result<()> {
        let ratio = self.seller_settlement_ratio(market_id, &price.denom)?;
        let flat = flat_fee.filter(|f| !f.is_zero() && f.denom == price.denom);

        let Some(ratio) = ratio else {
            if let Some(flat) = flat {
                if price.amount <= flat.amount {
                    return Err(requirement(format!(
                        "price {price} is not more than seller settlement flat fee {flat}"
                    )));
                }
            }
            return Ok(());
        };

        let ratio_fee = ratio.apply(price, policy)?;
        let Some(flat) = flat else {
            if price.amount <= ratio_fee.amount {
                return Err(requirement(format!(
                    "price {price} is not more than seller settlement ratio fee {ratio_fee}"
                )));
            }
            return Ok(());
        };

        let required = flat
            .amount
            .checked_add(ratio_fee.amount)
            .ok_or_else(|| DexError::overflow(format!("{flat} + {ratio_fee}")))?;
        if price.amount <= required {
            return Err(requirement(format!(
                "price {price} is not more than total required seller settlement fee {} = {flat} flat + {ratio_fee} ratio",
                price.with_amount(required)
            )));
        }
        Ok(())
    }

    /// Check that a bid's settlement fees cover the buyer flat fee and the
    /// buyer ratio fee for `price`.
    ///
    /// One coin may cover both (its amount must reach the sum when they
    /// share a denom), or one coin may cover each. On failure every reason
    /// found is reported along with the valid options.
    pub fn validate_buyer_settlement_fee(
        &self,
        market_id: MarketId,
        price: &Coin,
        fee: &Coins,
        policy: RatioPolicy,
    ) -> Result<()> {
        let (flat_subtype, ratio_subtype) = settlement_subtypes(FeeSide::Buyer);
        let flat_required = self.has_fee_entries(market_id, flat_subtype);
        let ratio_required = self.has_fee_entries(market_id, ratio_subtype);
        if !flat_required && !ratio_required {
            return Ok(());
        }

        let (mut flat_ok, mut ratio_ok) = (false, false);
        let mut flat_errs = Vec::new();
        let mut ratio_errs = Vec::new();
        let mut combined_errs = Vec::new();

        for fee_coin in fee.iter() {
            let mut flat_amount: Option<Decimal> = None;
            let mut ratio_amount: Option<Decimal> = None;

            if flat_required {
                match self.flat_fee(market_id, flat_subtype, &fee_coin.denom)? {
                    None => flat_errs.push(requirement(format!(
                        "no flat fee options available for denom {}",
                        fee_coin.denom
                    ))),
                    Some(flat) if fee_coin.amount < flat.amount => {
                        flat_errs.push(requirement(format!("{fee_coin} is less than required flat fee {flat}")));
                    }
                    // Covers the flat fee, and the ratio fee is not needed or already covered.
                    Some(_) if !ratio_required || ratio_ok => return Ok(()),
                    Some(flat) => flat_amount = Some(flat.amount),
                }
            }

            if ratio_required {
                match self.fee_ratio(market_id, ratio_subtype, &price.denom, &fee_coin.denom)? {
                    None => ratio_errs.push(requirement(format!(
                        "no ratio from price denom {} to fee denom {}",
                        price.denom, fee_coin.denom
                    ))),
                    Some(ratio) => match ratio.apply(price, policy) {
                        Err(err) => ratio_errs.push(err),
                        Ok(ratio_fee) if fee_coin.amount < ratio_fee.amount => {
                            ratio_errs.push(requirement(format!(
                                "{fee_coin} is less than required ratio fee {ratio_fee} (based on price {price} and ratio {ratio})"
                            )));
                        }
                        Ok(_) if !flat_required || flat_ok => return Ok(()),
                        Ok(ratio_fee) => ratio_amount = Some(ratio_fee.amount),
                    },
                }
            }

            if let (Some(flat), Some(ratio)) = (flat_amount, ratio_amount) {
                let required = flat
                    .checked_add(ratio)
                    .ok_or_else(|| DexError::overflow(format!("{flat} + {ratio}")))?;
                if fee_coin.amount >= required {
                    return Ok(());
                }
                let denom = &fee_coin.denom;
                combined_errs.push(requirement(format!(
                    "{fee_coin} is less than combined fee {required}{denom} = {flat}{denom} (flat) + {ratio}{denom} (ratio based on price {price})"
                )));
            }

            flat_ok |= flat_amount.is_some();
            ratio_ok |= ratio_amount.is_some();
        }

        let mut errs = Vec::new();
        if flat_required && !flat_ok {
            errs.append(&mut flat_errs);
            let options = Coins::from_coins(&self.flat_fee_options(market_id, flat_subtype)?)?;
            errs.push(requirement(format!(
                "required flat fee not satisfied, valid options: {options}"
            )));
        }
        if ratio_required && !ratio_ok {
            errs.append(&mut ratio_errs);
            let ratios = self.fee_ratios(market_id, ratio_subtype)?;
            errs.push(requirement(format!(
                "required ratio fee not satisfied, valid ratios: {}",
                ratios_string(&ratios)
            )));
        }
        if !combined_errs.is_empty() {
            errs.append(&mut flat_errs);
            errs.append(&mut ratio_errs);
            errs.append(&mut combined_errs);
        }
        errs.push(requirement(if fee.is_zero() {
            "insufficient buyer settlement fee: no fee provided".to_string()
        } else {
            format!("insufficient buyer settlement fee {fee}")
        }));
        DexError::join_result(errs)
    }

    /// Settlement fee checks for a new order.
    pub fn validate_order_fees(&self, market_id: MarketId, kind: OrderKind, price: &Coin, fees: &Coins, policy: RatioPolicy) -> Result<()> {
        match kind {
            OrderKind::Ask => {
                let flat = fees.iter().next();
                self.validate_seller_settlement_flat_fee(market_id, flat.as_ref())?;
                self.validate_ask_price(market_id, price, flat.as_ref(), policy)
            }
            OrderKind::Bid => self.validate_buyer_settlement_fee(market_id, price, fees, policy),
        }
    }

    // ---------------------------------------------------------------------
    // Exchange split
    // ---------------------------------------------------------------------

    /// Split in basis points for a denom: its own entry, else the default
    /// entry, else the built-in default.
    pub fn exchange_split_bps(&self, denom: &str) -> Result<u16> {
        Ok(self.stored_split(denom)?.unwrap_or(DEFAULT_SPLIT_BPS))
    }

    /// The exchange's cut of a collected fee, rounded up per denom.
    pub fn exchange_split(&self, fee: &Coins) -> Result<Coins> {
        let mut rv = Coins::new();
        for coin in fee.iter() {
            let bps = self.exchange_split_bps(&coin.denom)?;
            if bps == 0 || !coin.is_positive() {
                continue;
            }
            let amount = mul_div_ceil(coin.amount, Decimal::from(bps), Decimal::from(MAX_SPLIT_BPS))?;
            rv.add_coin(&coin.with_amount(amount))?;
        }
        Ok(rv)
    }
}

#[cfg(test)]
mod tests {
    use dexcore_types::{DenomSplit, MarketConfig, Params};

    use super::*;
    use crate::MemStore;

    fn coins(s: &str) -> Coins {
        s.parse().unwrap()
    }

    fn coin(s: &str) -> Coin {
        s.parse().unwrap()
    }

    fn ledger_with(f: impl FnOnce(&mut MarketConfig)) -> Ledger<MemStore> {
        let mut cfg = MarketConfig::open(MarketId(1));
        f(&mut cfg);
        let mut l = Ledger::new(MemStore::new());
        l.store_market(&cfg);
        l
    }

    const M: MarketId = MarketId(1);
    const LOOSE: RatioPolicy = RatioPolicy::Loose;

    // =====================================================================
    // Exchange split
    // =====================================================================

    #[test]
    fn split_rounds_up() {
        let mut l = Ledger::new(MemStore::new());
        l.set_params(Some(&Params::new(250, vec![])));
        assert_eq!(l.exchange_split(&coins("750plum")).unwrap(), coins("19plum"));
        assert_eq!(l.exchange_split(&coins("1005plum")).unwrap(), coins("26plum"));

        l.set_params(Some(&Params::new(1000, vec![])));
        assert_eq!(l.exchange_split(&coins("5000plum")).unwrap(), coins("500plum"));

        l.set_params(Some(&Params::new(100, vec![])));
        assert_eq!(l.exchange_split(&coins("501plum")).unwrap(), coins("6plum"));
    }

    #[test]
    fn split_defaults_without_params() {
        let l = Ledger::new(MemStore::new());
        assert_eq!(l.exchange_split_bps("apple").unwrap(), 500);
        assert_eq!(
            l.exchange_split(&coins("100apple,20banana")).unwrap(),
            coins("5apple,1banana")
        );
    }

    #[test]
    fn zero_split_contributes_nothing() {
        let mut l = Ledger::new(MemStore::new());
        l.set_params(Some(&Params::new(
            300,
            vec![DenomSplit { denom: "plum".into(), split: 0 }],
        )));
        assert_eq!(
            l.exchange_split(&coins("1000000000plum,1000fig")).unwrap(),
            coins("30fig")
        );
        l.set_params(Some(&Params::new(0, vec![])));
        assert!(l.exchange_split(&coins("1000000000plum")).unwrap().is_zero());
    }

    // =====================================================================
    // Flat fees
    // =====================================================================

    #[test]
    fn flat_fee_validation() {
        let options = vec![coin("10fig"), coin("1plum")];
        assert!(validate_flat_fee("x", &[], None).is_ok());
        assert!(validate_flat_fee("x", &options, Some(&coin("10fig"))).is_ok());
        assert!(validate_flat_fee("x", &options, Some(&coin("2plum"))).is_ok());
        assert!(matches!(
            validate_flat_fee("x", &options, None).unwrap_err(),
            DexError::MissingFee { .. }
        ));
        assert!(matches!(
            validate_flat_fee("x", &options, Some(&coin("10pear"))).unwrap_err(),
            DexError::InvalidFeeDenom { .. }
        ));
        assert!(matches!(
            validate_flat_fee("x", &options, Some(&coin("9fig"))).unwrap_err(),
            DexError::InsufficientFee { .. }
        ));
    }

    #[test]
    fn creation_fee_by_kind() {
        let l = ledger_with(|c| c.fees.create_bid_flat = vec![coin("5fig")]);
        assert!(l.validate_creation_fee(M, AttrKind::CreateAsk, None).is_ok());
        let err = l.validate_creation_fee(M, AttrKind::CreateBid, None).unwrap_err();
        assert!(err.to_string().contains("bid order creation"), "Got: {err}");
        assert_eq!(l.required_creation_fee(M, AttrKind::CreateBid).unwrap(), vec![coin("5fig")]);
    }

    // =====================================================================
    // Ratio fees
    // =====================================================================

    #[test]
    fn seller_ratio_fee_scenarios() {
        let l = ledger_with(|c| c.fees.seller_settlement_ratios = vec!["30plum:1plum".parse().unwrap()]);
        assert_eq!(l.seller_ratio_fee(M, &coin("60plum"), LOOSE).unwrap(), Some(coin("2plum")));

        let err = l.seller_ratio_fee(M, &coin("60pear"), LOOSE).unwrap_err();
        assert!(matches!(err, DexError::NoRatioForDenom { side: FeeSide::Seller, .. }));

        let none = ledger_with(|_| {});
        assert_eq!(none.seller_ratio_fee(M, &coin("60pear"), LOOSE).unwrap(), None);
        assert!(none.ratio_fee(M, FeeSide::Seller, &coin("60pear"), LOOSE).unwrap().is_empty());
    }

    #[test]
    fn buyer_ratio_options() {
        let l = ledger_with(|c| {
            c.fees.buyer_settlement_ratios = vec![
                "30plum:1fig".parse().unwrap(),
                "20plum:1plum".parse().unwrap(),
            ];
        });
        let options = l.buyer_ratio_fee_options(M, &coin("60plum"), LOOSE).unwrap();
        assert_eq!(options, vec![coin("2fig"), coin("3plum")]);

        let err = l.buyer_ratio_fee_options(M, &coin("60pear"), LOOSE).unwrap_err();
        assert!(matches!(err, DexError::NoRatioForDenom { side: FeeSide::Buyer, .. }));
    }

    #[test]
    fn buyer_ratio_none_applicable_lists_each_reason() {
        let l = ledger_with(|c| {
            c.fees.buyer_settlement_ratios = vec![
                "30plum:1fig".parse().unwrap(),
                "20plum:1plum".parse().unwrap(),
            ];
        });
        let err = l
            .buyer_ratio_fee_options(M, &coin("61plum"), RatioPolicy::Strict)
            .unwrap_err();
        let parts = err.flatten();
        assert_eq!(parts.len(), 3);
        assert!(matches!(parts[0], DexError::RatioNotApplicable { .. }));
        assert!(matches!(parts[2], DexError::NoApplicableRatio { .. }));
        assert!(err.to_string().contains("no applicable buyer settlement fee ratios found for price 61plum"));
    }

    // =====================================================================
    // Combined requirements
    // =====================================================================

    #[test]
    fn ask_price_must_exceed_fees_taken_from_it() {
        let flat_only = ledger_with(|_| {});
        assert!(flat_only.validate_ask_price(M, &coin("5plum"), Some(&coin("5plum")), LOOSE).is_err());
        assert!(flat_only.validate_ask_price(M, &coin("5plum"), Some(&coin("5fig")), LOOSE).is_ok());

        let l = ledger_with(|c| c.fees.seller_settlement_ratios = vec!["2plum:1plum".parse().unwrap()]);
        // ratio fee on 1plum is 1plum
        let err = l.validate_ask_price(M, &coin("1plum"), None, LOOSE).unwrap_err();
        assert!(err.to_string().contains("not more than seller settlement ratio fee 1plum"), "Got: {err}");
        assert!(l.validate_ask_price(M, &coin("10plum"), Some(&coin("4plum")), LOOSE).is_ok());
        let err = l
            .validate_ask_price(M, &coin("10plum"), Some(&coin("5plum")), LOOSE)
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("total required seller settlement fee 10plum = 5plum flat + 5plum ratio"),
            "Got: {err}"
        );
    }

    #[test]
    fn buyer_fee_not_required() {
        let l = ledger_with(|_| {});
        assert!(l.validate_buyer_settlement_fee(M, &coin("60plum"), &Coins::new(), LOOSE).is_ok());
    }

    #[test]
    fn buyer_fee_one_coin_covers_both() {
        let l = ledger_with(|c| {
            c.fees.buyer_settlement_flat = vec![coin("5plum")];
            c.fees.buyer_settlement_ratios = vec!["30plum:1plum".parse().unwrap()];
        });
        let price = coin("60plum");
        assert!(l.validate_buyer_settlement_fee(M, &price, &coins("7plum"), LOOSE).is_ok());
        let err = l
            .validate_buyer_settlement_fee(M, &price, &coins("6plum"), LOOSE)
            .unwrap_err();
        assert!(err.to_string().contains("is less than combined fee 7plum"), "Got: {err}");
        assert!(err.to_string().ends_with("insufficient buyer settlement fee 6plum"), "Got: {err}");
    }

    #[test]
    fn buyer_fee_separate_coins_cover_each() {
        let l = ledger_with(|c| {
            c.fees.buyer_settlement_flat = vec![coin("5fig")];
            c.fees.buyer_settlement_ratios = vec!["30plum:1plum".parse().unwrap()];
        });
        let price = coin("60plum");
        assert!(l.validate_buyer_settlement_fee(M, &price, &coins("5fig,2plum"), LOOSE).is_ok());

        let err = l
            .validate_buyer_settlement_fee(M, &price, &coins("5fig,1plum"), LOOSE)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("1plum is less than required ratio fee 2plum"), "Got: {msg}");
        assert!(msg.contains("required ratio fee not satisfied, valid ratios: 30plum:1plum"), "Got: {msg}");
        assert!(!msg.contains("required flat fee not satisfied"), "Got: {msg}");
    }

    #[test]
    fn buyer_fee_missing_entirely() {
        let l = ledger_with(|c| c.fees.buyer_settlement_flat = vec![coin("5fig"), coin("3pear")]);
        let err = l
            .validate_buyer_settlement_fee(M, &coin("60plum"), &Coins::new(), LOOSE)
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("valid options: 5fig,3pear"), "Got: {msg}");
        assert!(msg.ends_with("insufficient buyer settlement fee: no fee provided"), "Got: {msg}");
    }
}
