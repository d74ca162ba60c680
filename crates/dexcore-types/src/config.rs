//! Configuration types for the module and for individual markets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{constants, Coin, DexError, FeeRatio, MarketId, RatioPolicy, Result};

/// Module-level settings supplied by the host at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    /// Module account that receives the exchange split.
    pub fee_collector: String,
    /// How ratio fees are applied to prices.
    pub ratio_policy: RatioPolicy,
    /// Commitments released per store scan when closing a market.
    pub release_batch_size: usize,
    /// Source tag for valuation records.
    pub nav_source: String,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            fee_collector: constants::DEFAULT_FEE_COLLECTOR.to_string(),
            ratio_policy: RatioPolicy::default(),
            release_batch_size: constants::DEFAULT_RELEASE_BATCH_SIZE,
            nav_source: constants::DEFAULT_NAV_SOURCE.to_string(),
        }
    }
}

impl ModuleConfig {
    /// Parse from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| DexError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fee_collector.is_empty() {
            return Err(DexError::Configuration("fee collector cannot be empty".into()));
        }
        if self.release_batch_size == 0 {
            return Err(DexError::Configuration("release batch size must be positive".into()));
        }
        Ok(())
    }
}

/// Fee tables for one market.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketFees {
    pub create_ask_flat: Vec<Coin>,
    pub create_bid_flat: Vec<Coin>,
    pub create_commitment_flat: Vec<Coin>,
    pub seller_settlement_flat: Vec<Coin>,
    pub seller_settlement_ratios: Vec<FeeRatio>,
    pub buyer_settlement_flat: Vec<Coin>,
    pub buyer_settlement_ratios: Vec<FeeRatio>,
}

impl MarketFees {
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();
        for (name, options) in [
            ("create-ask flat fee", &self.create_ask_flat),
            ("create-bid flat fee", &self.create_bid_flat),
            ("create-commitment flat fee", &self.create_commitment_flat),
            ("seller settlement flat fee", &self.seller_settlement_flat),
            ("buyer settlement flat fee", &self.buyer_settlement_flat),
        ] {
            validate_flat_options(name, options, &mut errs);
        }
        validate_ratios("seller", &self.seller_settlement_ratios, &mut errs);
        validate_ratios("buyer", &self.buyer_settlement_ratios, &mut errs);
        for ratio in &self.seller_settlement_ratios {
            if ratio.price.denom != ratio.fee.denom {
                errs.push(DexError::Configuration(format!(
                    "seller fee ratio fee denom {:?} does not equal price denom {:?}",
                    ratio.fee.denom, ratio.price.denom
                )));
            }
        }
        DexError::join_result(errs)
    }
}

fn validate_flat_options(name: &str, options: &[Coin], errs: &mut Vec<DexError>) {
    let mut seen = BTreeSet::new();
    for coin in options {
        if let Err(err) = coin.validate() {
            errs.push(err);
        }
        if !seen.insert(coin.denom.as_str()) {
            errs.push(DexError::Configuration(format!(
                "denom {} defined multiple times in {name} options",
                coin.denom
            )));
        }
    }
}

fn validate_ratios(side: &str, ratios: &[FeeRatio], errs: &mut Vec<DexError>) {
    let mut seen = BTreeSet::new();
    for ratio in ratios {
        if let Err(err) = ratio.validate() {
            errs.push(err);
        }
        if !seen.insert((ratio.price.denom.as_str(), ratio.fee.denom.as_str())) {
            errs.push(DexError::Configuration(format!(
                "{side} fee ratio for {} to {} defined multiple times",
                ratio.price.denom, ratio.fee.denom
            )));
        }
    }
}

/// Seed for a new market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub market_id: MarketId,
    #[serde(default)]
    pub accepting_orders: bool,
    #[serde(default)]
    pub allow_user_settlement: bool,
    #[serde(default)]
    pub accepting_commitments: bool,
    #[serde(default)]
    pub req_attr_create_ask: Vec<String>,
    #[serde(default)]
    pub req_attr_create_bid: Vec<String>,
    #[serde(default)]
    pub req_attr_create_commitment: Vec<String>,
    #[serde(default)]
    pub fees: MarketFees,
}

impl MarketConfig {
    /// Open market with no fees and no attribute requirements.
    #[must_use]
    pub fn open(market_id: MarketId) -> Self {
        Self {
            market_id,
            accepting_orders: true,
            allow_user_settlement: true,
            accepting_commitments: true,
            req_attr_create_ask: Vec::new(),
            req_attr_create_bid: Vec::new(),
            req_attr_create_commitment: Vec::new(),
            fees: MarketFees::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.market_id.is_zero() {
            return Err(DexError::Configuration("market id cannot be zero".into()));
        }
        self.fees.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_config_defaults() {
        let cfg = ModuleConfig::default();
        assert_eq!(cfg.fee_collector, "fee_collector");
        assert_eq!(cfg.ratio_policy, RatioPolicy::Loose);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn module_config_from_partial_json() {
        let cfg = ModuleConfig::from_json(r#"{"ratio_policy":"strict"}"#).unwrap();
        assert_eq!(cfg.ratio_policy, RatioPolicy::Strict);
        assert_eq!(cfg.release_batch_size, constants::DEFAULT_RELEASE_BATCH_SIZE);

        let err = ModuleConfig::from_json(r#"{"release_batch_size":0}"#).unwrap_err();
        assert!(matches!(err, DexError::Configuration(_)));
    }

    #[test]
    fn market_config_serde_roundtrip() {
        let mut cfg = MarketConfig::open(MarketId(3));
        cfg.fees.seller_settlement_ratios = vec!["30plum:1plum".parse().unwrap()];
        cfg.fees.create_ask_flat = vec![Coin::new(10, "fig")];
        let json = serde_json::to_string(&cfg).unwrap();
        let back: MarketConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }

    #[test]
    fn seller_ratio_must_use_price_denom() {
        let mut fees = MarketFees::default();
        fees.seller_settlement_ratios = vec!["30plum:1fig".parse().unwrap()];
        assert!(fees.validate().is_err());
        fees.seller_settlement_ratios = vec!["30plum:1plum".parse().unwrap()];
        assert!(fees.validate().is_ok());
    }

    #[test]
    fn ratio_charging_more_than_price_is_rejected() {
        let mut fees = MarketFees::default();
        fees.seller_settlement_ratios = vec!["10plum:20plum".parse().unwrap()];
        fees.buyer_settlement_ratios = vec!["5plum:6plum".parse().unwrap()];
        let err = fees.validate().unwrap_err();
        assert_eq!(err.flatten().len(), 2, "Got: {err}");
    }
}
