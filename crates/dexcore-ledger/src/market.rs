//! Market state: existence, flags, required attributes, fee tables, and the
//! module-wide split params.

use dexcore_types::{Coin, DenomSplit, DexError, FeeRatio, MarketConfig, MarketFees, MarketId, Params, Result};
use rust_decimal::Decimal;

use crate::keys::{self, AttrKind, MarketSubtype};
use crate::{KvStore, Ledger};

fn decode_flat_fee(denom_bytes: &[u8], value: &[u8]) -> Result<Coin> {
    let corrupt = |reason: String| DexError::CorruptValue {
        entity: "flat fee".into(),
        reason,
    };
    let denom = std::str::from_utf8(denom_bytes).map_err(|e| corrupt(e.to_string()))?;
    let text = std::str::from_utf8(value).map_err(|e| corrupt(e.to_string()))?;
    let amount = text
        .parse::<Decimal>()
        .map_err(|e| corrupt(format!("{denom} amount {text:?}: {e}")))?;
    Ok(Coin::new(amount, denom))
}

impl<S: KvStore> Ledger<S> {
    // ---------------------------------------------------------------------
    // Existence and flags
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn market_exists(&self, market_id: MarketId) -> bool {
        self.store.has(&keys::key_known_market(market_id))
    }

    pub fn validate_market_exists(&self, market_id: MarketId) -> Result<()> {
        if self.market_exists(market_id) {
            Ok(())
        } else {
            Err(DexError::MarketNotFound(market_id))
        }
    }

    pub fn set_market_known(&mut self, market_id: MarketId) {
        self.store.set(keys::key_known_market(market_id), Vec::new());
    }

    /// Every market id ever created, ascending.
    #[must_use]
    pub fn known_market_ids(&self) -> Vec<MarketId> {
        self.store
            .scan_prefix(&[keys::KEY_TYPE_KNOWN_MARKET_ID])
            .into_iter()
            .filter_map(|(key, _)| keys::parse_known_market_key(&key))
            .collect()
    }

    fn flag(&self, market_id: MarketId, subtype: MarketSubtype) -> bool {
        self.store.has(&keys::key_market_subtype(market_id, subtype))
    }

    fn set_flag(&mut self, market_id: MarketId, subtype: MarketSubtype, on: bool) {
        let key = keys::key_market_subtype(market_id, subtype);
        if on {
            self.store.set(key, Vec::new());
        } else {
            self.store.delete(&key);
        }
    }

    /// Stored inverted: only closed markets carry the flag.
    #[must_use]
    pub fn is_accepting_orders(&self, market_id: MarketId) -> bool {
        !self.flag(market_id, MarketSubtype::NotAcceptingOrders)
    }

    pub fn set_accepting_orders(&mut self, market_id: MarketId, accepting: bool) {
        self.set_flag(market_id, MarketSubtype::NotAcceptingOrders, !accepting);
    }

    #[must_use]
    pub fn is_user_settlement_allowed(&self, market_id: MarketId) -> bool {
        self.flag(market_id, MarketSubtype::UserSettle)
    }

    pub fn set_user_settlement_allowed(&mut self, market_id: MarketId, allowed: bool) {
        self.set_flag(market_id, MarketSubtype::UserSettle, allowed);
    }

    #[must_use]
    pub fn is_accepting_commitments(&self, market_id: MarketId) -> bool {
        self.flag(market_id, MarketSubtype::AcceptingCommitments)
    }

    pub fn set_accepting_commitments(&mut self, market_id: MarketId, accepting: bool) {
        self.set_flag(market_id, MarketSubtype::AcceptingCommitments, accepting);
    }

    // ---------------------------------------------------------------------
    // Required attributes
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn required_attributes(&self, market_id: MarketId, kind: AttrKind) -> Vec<String> {
        self.store
            .get(&keys::key_market_req_attr(market_id, kind))
            .map(|value| keys::decode_req_attrs(&value))
            .unwrap_or_default()
    }

    pub fn set_required_attributes(&mut self, market_id: MarketId, kind: AttrKind, attrs: &[String]) {
        let key = keys::key_market_req_attr(market_id, kind);
        if attrs.is_empty() {
            self.store.delete(&key);
        } else {
            self.store.set(key, keys::encode_req_attrs(attrs));
        }
    }

    // ---------------------------------------------------------------------
    // Flat fee tables
    // ---------------------------------------------------------------------

    /// Whether any entry exists under a fee-table subtype.
    #[must_use]
    pub fn has_fee_entries(&self, market_id: MarketId, subtype: MarketSubtype) -> bool {
        let prefix = keys::key_market_subtype(market_id, subtype);
        !self.store.scan(&prefix, None, Some(1)).is_empty()
    }

    /// The flat fee option for one denom, if the table has one.
    pub fn flat_fee(&self, market_id: MarketId, subtype: MarketSubtype, denom: &str) -> Result<Option<Coin>> {
        self.store
            .get(&keys::key_market_flat_fee(market_id, subtype, denom))
            .map(|value| decode_flat_fee(denom.as_bytes(), &value))
            .transpose()
    }

    /// Every flat fee option in a table, in denom order.
    pub fn flat_fee_options(&self, market_id: MarketId, subtype: MarketSubtype) -> Result<Vec<Coin>> {
        let prefix = keys::key_market_subtype(market_id, subtype);
        self.store
            .scan_prefix(&prefix)
            .into_iter()
            .map(|(key, value)| decode_flat_fee(&key[prefix.len()..], &value))
            .collect()
    }

    /// Replace a flat fee table.
    pub fn set_flat_fee_options(&mut self, market_id: MarketId, subtype: MarketSubtype, options: &[Coin]) {
        self.clear_subtype(market_id, subtype);
        for coin in options {
            self.store.set(
                keys::key_market_flat_fee(market_id, subtype, &coin.denom),
                coin.amount.normalize().to_string().into_bytes(),
            );
        }
    }

    fn clear_subtype(&mut self, market_id: MarketId, subtype: MarketSubtype) {
        let prefix = keys::key_market_subtype(market_id, subtype);
        for (key, _) in self.store.scan_prefix(&prefix) {
            self.store.delete(&key);
        }
    }

    // ---------------------------------------------------------------------
    // Ratio tables
    // ---------------------------------------------------------------------

    fn decode_ratio_entry(suffix: &[u8], value: &[u8]) -> Result<FeeRatio> {
        let (price_denom, fee_denom) =
            keys::parse_ratio_key_suffix(suffix).ok_or_else(|| DexError::CorruptValue {
                entity: "fee ratio key".into(),
                reason: format!("cannot split denoms from suffix of length {}", suffix.len()),
            })?;
        let (price_amount, fee_amount) = keys::decode_ratio_value(value)?;
        Ok(FeeRatio::new(
            Coin::new(price_amount, price_denom),
            Coin::new(fee_amount, fee_denom),
        ))
    }

    /// Every ratio in a table, ordered by price denom then fee denom.
    pub fn fee_ratios(&self, market_id: MarketId, subtype: MarketSubtype) -> Result<Vec<FeeRatio>> {
        let prefix = keys::key_market_subtype(market_id, subtype);
        self.store
            .scan_prefix(&prefix)
            .into_iter()
            .map(|(key, value)| Self::decode_ratio_entry(&key[prefix.len()..], &value))
            .collect()
    }

    /// Ratios whose price denom is `price_denom`.
    pub fn fee_ratios_for_price_denom(
        &self,
        market_id: MarketId,
        subtype: MarketSubtype,
        price_denom: &str,
    ) -> Result<Vec<FeeRatio>> {
        let table = keys::key_market_subtype(market_id, subtype);
        let prefix = keys::key_prefix_market_ratio_for_price_denom(market_id, subtype, price_denom);
        self.store
            .scan_prefix(&prefix)
            .into_iter()
            .map(|(key, value)| Self::decode_ratio_entry(&key[table.len()..], &value))
            .collect()
    }

    /// The ratio from `price_denom` to `fee_denom`, if any.
    pub fn fee_ratio(
        &self,
        market_id: MarketId,
        subtype: MarketSubtype,
        price_denom: &str,
        fee_denom: &str,
    ) -> Result<Option<FeeRatio>> {
        let key = keys::key_market_ratio(market_id, subtype, price_denom, fee_denom);
        let Some(value) = self.store.get(&key) else {
            return Ok(None);
        };
        let (price_amount, fee_amount) = keys::decode_ratio_value(&value)?;
        Ok(Some(FeeRatio::new(
            Coin::new(price_amount, price_denom),
            Coin::new(fee_amount, fee_denom),
        )))
    }

    /// Replace a ratio table.
    pub fn set_fee_ratios(&mut self, market_id: MarketId, subtype: MarketSubtype, ratios: &[FeeRatio]) {
        self.clear_subtype(market_id, subtype);
        for ratio in ratios {
            self.store.set(
                keys::key_market_ratio(market_id, subtype, &ratio.price.denom, &ratio.fee.denom),
                keys::encode_ratio_value(ratio.price.amount, ratio.fee.amount),
            );
        }
    }

    // ---------------------------------------------------------------------
    // Whole market
    // ---------------------------------------------------------------------

    pub fn market_fees(&self, market_id: MarketId) -> Result<MarketFees> {
        Ok(MarketFees {
            create_ask_flat: self.flat_fee_options(market_id, MarketSubtype::CreateAskFlat)?,
            create_bid_flat: self.flat_fee_options(market_id, MarketSubtype::CreateBidFlat)?,
            create_commitment_flat: self.flat_fee_options(market_id, MarketSubtype::CreateCommitmentFlat)?,
            seller_settlement_flat: self.flat_fee_options(market_id, MarketSubtype::SellerSettlementFlat)?,
            seller_settlement_ratios: self.fee_ratios(market_id, MarketSubtype::SellerSettlementRatio)?,
            buyer_settlement_flat: self.flat_fee_options(market_id, MarketSubtype::BuyerSettlementFlat)?,
            buyer_settlement_ratios: self.fee_ratios(market_id, MarketSubtype::BuyerSettlementRatio)?,
        })
    }

    /// Replace every fee table of a market.
    pub fn set_market_fees(&mut self, market_id: MarketId, fees: &MarketFees) {
        self.set_flat_fee_options(market_id, MarketSubtype::CreateAskFlat, &fees.create_ask_flat);
        self.set_flat_fee_options(market_id, MarketSubtype::CreateBidFlat, &fees.create_bid_flat);
        self.set_flat_fee_options(market_id, MarketSubtype::CreateCommitmentFlat, &fees.create_commitment_flat);
        self.set_flat_fee_options(market_id, MarketSubtype::SellerSettlementFlat, &fees.seller_settlement_flat);
        self.set_fee_ratios(market_id, MarketSubtype::SellerSettlementRatio, &fees.seller_settlement_ratios);
        self.set_flat_fee_options(market_id, MarketSubtype::BuyerSettlementFlat, &fees.buyer_settlement_flat);
        self.set_fee_ratios(market_id, MarketSubtype::BuyerSettlementRatio, &fees.buyer_settlement_ratios);
    }

    /// Write a market's complete state and mark it known.
    pub fn store_market(&mut self, config: &MarketConfig) {
        let id = config.market_id;
        self.set_market_known(id);
        self.set_accepting_orders(id, config.accepting_orders);
        self.set_user_settlement_allowed(id, config.allow_user_settlement);
        self.set_accepting_commitments(id, config.accepting_commitments);
        self.set_required_attributes(id, AttrKind::CreateAsk, &config.req_attr_create_ask);
        self.set_required_attributes(id, AttrKind::CreateBid, &config.req_attr_create_bid);
        self.set_required_attributes(id, AttrKind::CreateCommitment, &config.req_attr_create_commitment);
        self.set_market_fees(id, &config.fees);
    }

    /// Read a market's complete state back, `None` if it was never created.
    pub fn market_config(&self, market_id: MarketId) -> Result<Option<MarketConfig>> {
        if !self.market_exists(market_id) {
            return Ok(None);
        }
        Ok(Some(MarketConfig {
            market_id,
            accepting_orders: self.is_accepting_orders(market_id),
            allow_user_settlement: self.is_user_settlement_allowed(market_id),
            accepting_commitments: self.is_accepting_commitments(market_id),
            req_attr_create_ask: self.required_attributes(market_id, AttrKind::CreateAsk),
            req_attr_create_bid: self.required_attributes(market_id, AttrKind::CreateBid),
            req_attr_create_commitment: self.required_attributes(market_id, AttrKind::CreateCommitment),
            fees: self.market_fees(market_id)?,
        }))
    }

    // ---------------------------------------------------------------------
    // Params
    // ---------------------------------------------------------------------

    /// Stored split params, `None` if none have been set.
    pub fn params(&self) -> Result<Option<Params>> {
        let Some(default) = self.store.get(&keys::key_param_split_default()) else {
            return Ok(None);
        };
        let default_split = keys::decode_split(&default)?;
        let mut denom_splits = Vec::new();
        for (key, value) in self.store.scan_prefix(&keys::key_param_split_default()) {
            if let Some(denom) = keys::parse_param_split_key(&key) {
                denom_splits.push(DenomSplit {
                    denom,
                    split: keys::decode_split(&value)?,
                });
            }
        }
        Ok(Some(Params::new(default_split, denom_splits)))
    }

    /// Replace the split params. `None` clears them, restoring the built-in default.
    pub fn set_params(&mut self, params: Option<&Params>) {
        for (key, _) in self.store.scan_prefix(&keys::key_param_split_default()) {
            self.store.delete(&key);
        }
        let Some(params) = params else {
            return;
        };
        self.store
            .set(keys::key_param_split_default(), keys::encode_split(params.default_split));
        for ds in &params.denom_splits {
            self.store
                .set(keys::key_param_split(&ds.denom), keys::encode_split(ds.split));
        }
    }

    /// Split for one denom, if stored: the denom entry, else the default entry.
    pub fn stored_split(&self, denom: &str) -> Result<Option<u16>> {
        if let Some(value) = self.store.get(&keys::key_param_split(denom)) {
            return keys::decode_split(&value).map(Some);
        }
        match self.store.get(&keys::key_param_split_default()) {
            Some(value) => keys::decode_split(&value).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStore;

    fn ledger() -> Ledger<MemStore> {
        Ledger::new(MemStore::new())
    }

    fn configured_market() -> MarketConfig {
        let mut cfg = MarketConfig::open(MarketId(3));
        cfg.allow_user_settlement = false;
        cfg.req_attr_create_bid = vec!["kyc.passport".into(), "*.accredited".into()];
        cfg.fees.create_ask_flat = vec![Coin::new(10, "fig"), Coin::new(1, "plum")];
        cfg.fees.seller_settlement_ratios = vec!["30plum:1plum".parse().unwrap()];
        cfg.fees.buyer_settlement_flat = vec![Coin::new(5, "fig")];
        cfg.fees.buyer_settlement_ratios = vec![
            "100plum:1fig".parse().unwrap(),
            "50plum:1plum".parse().unwrap(),
            "10pear:1fig".parse().unwrap(),
        ];
        cfg
    }

    #[test]
    fn market_config_roundtrip() {
        let mut l = ledger();
        assert!(l.market_config(MarketId(3)).unwrap().is_none());
        let cfg = configured_market();
        l.store_market(&cfg);

        let back = l.market_config(MarketId(3)).unwrap().unwrap();
        assert_eq!(back.accepting_orders, cfg.accepting_orders);
        assert_eq!(back.allow_user_settlement, cfg.allow_user_settlement);
        assert_eq!(back.req_attr_create_bid, cfg.req_attr_create_bid);
        assert!(back.req_attr_create_ask.is_empty());
        assert_eq!(back.fees.create_ask_flat, cfg.fees.create_ask_flat);
        assert_eq!(back.fees.seller_settlement_ratios, cfg.fees.seller_settlement_ratios);
        // Stored order is by price denom, then fee denom.
        let ratio_strings: Vec<_> = back.fees.buyer_settlement_ratios.iter().map(ToString::to_string).collect();
        assert_eq!(ratio_strings, vec!["10pear:1fig", "100plum:1fig", "50plum:1plum"]);
        assert_eq!(l.known_market_ids(), vec![MarketId(3)]);
    }

    #[test]
    fn flags_toggle() {
        let mut l = ledger();
        let m = MarketId(1);
        assert!(l.is_accepting_orders(m));
        l.set_accepting_orders(m, false);
        assert!(!l.is_accepting_orders(m));
        l.set_accepting_orders(m, true);
        assert!(l.is_accepting_orders(m));
        assert!(!l.is_user_settlement_allowed(m));
        l.set_user_settlement_allowed(m, true);
        assert!(l.is_user_settlement_allowed(m));
        assert!(l.validate_market_exists(m).is_err());
    }

    #[test]
    fn ratio_lookups_by_price_denom() {
        let mut l = ledger();
        l.store_market(&configured_market());
        let m = MarketId(3);
        let plum = l
            .fee_ratios_for_price_denom(m, MarketSubtype::BuyerSettlementRatio, "plum")
            .unwrap();
        assert_eq!(plum.len(), 2);
        assert!(l
            .fee_ratios_for_price_denom(m, MarketSubtype::BuyerSettlementRatio, "plu")
            .unwrap()
            .is_empty());
        let r = l
            .fee_ratio(m, MarketSubtype::BuyerSettlementRatio, "pear", "fig")
            .unwrap()
            .unwrap();
        assert_eq!(r.to_string(), "10pear:1fig");
        assert!(l
            .fee_ratio(m, MarketSubtype::SellerSettlementRatio, "pear", "pear")
            .unwrap()
            .is_none());
    }

    #[test]
    fn replacing_fee_table_drops_old_entries() {
        let mut l = ledger();
        let m = MarketId(3);
        l.store_market(&configured_market());
        l.set_flat_fee_options(m, MarketSubtype::CreateAskFlat, &[Coin::new(7, "pear")]);
        assert_eq!(
            l.flat_fee_options(m, MarketSubtype::CreateAskFlat).unwrap(),
            vec![Coin::new(7, "pear")]
        );
        assert!(l.flat_fee(m, MarketSubtype::CreateAskFlat, "fig").unwrap().is_none());
        l.set_fee_ratios(m, MarketSubtype::SellerSettlementRatio, &[]);
        assert!(!l.has_fee_entries(m, MarketSubtype::SellerSettlementRatio));
        assert!(l.has_fee_entries(m, MarketSubtype::BuyerSettlementRatio));
    }

    #[test]
    fn params_roundtrip_and_clear() {
        let mut l = ledger();
        assert!(l.params().unwrap().is_none());
        assert_eq!(l.stored_split("plum").unwrap(), None);

        let params = Params::new(
            250,
            vec![DenomSplit { denom: "plum".into(), split: 0 }],
        );
        l.set_params(Some(&params));
        assert_eq!(l.params().unwrap(), Some(params));
        assert_eq!(l.stored_split("plum").unwrap(), Some(0));
        assert_eq!(l.stored_split("fig").unwrap(), Some(250));

        l.set_params(None);
        assert!(l.params().unwrap().is_none());
        assert!(l.store().is_empty());
    }
}
