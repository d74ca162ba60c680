//! Best-effort price recording.
//!
//! After a settlement moves funds, the observed price of each asset pair is
//! reported to the valuation service. Recording never fails a settlement:
//! every failure is logged and returned for the caller to surface as a
//! diagnostic event.

use std::collections::BTreeMap;

use dexcore_types::{BlockInfo, Coin, DexError, ExchangeEvent, NavRecorder, NetAssetValue, OrderKind, Result};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::plan::FilledOrder;

/// A valuation the recorder rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavFailure {
    pub assets_denom: String,
    pub price_denom: String,
    pub reason: String,
}

impl NavFailure {
    #[must_use]
    pub fn event(&self) -> ExchangeEvent {
        ExchangeEvent::NavRecordFailed {
            assets_denom: self.assets_denom.clone(),
            price_denom: self.price_denom.clone(),
            reason: self.reason.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavOutcome {
    pub recorded: Vec<NetAssetValue>,
    pub failures: Vec<NavFailure>,
}

impl NavOutcome {
    pub fn events(&self) -> impl Iterator<Item = ExchangeEvent> + '_ {
        self.failures.iter().map(NavFailure::event)
    }
}

/// One valuation per (assets denom, price denom) pair, summed over the fills.
///
/// Each trade is observed once: from its ask, or from its bid when a
/// seller filled bids directly and there is no ask.
pub fn navs_from_fills<'a>(fills: impl IntoIterator<Item = &'a FilledOrder>) -> Result<Vec<(Coin, Coin)>> {
    let fills: Vec<&FilledOrder> = fills.into_iter().collect();
    let side = if fills.iter().any(|f| f.order.kind() == OrderKind::Ask) {
        OrderKind::Ask
    } else {
        OrderKind::Bid
    };
    let mut totals: BTreeMap<(String, String), (Decimal, Decimal)> = BTreeMap::new();
    for fill in fills {
        if fill.order.kind() != side {
            continue;
        }
        let slot = totals
            .entry((fill.assets.denom.clone(), fill.price.denom.clone()))
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        slot.0 = slot
            .0
            .checked_add(fill.assets.amount)
            .ok_or_else(|| DexError::overflow(format!("nav volume of {}", fill.assets.denom)))?;
        slot.1 = slot
            .1
            .checked_add(fill.price.amount)
            .ok_or_else(|| DexError::overflow(format!("nav price in {}", fill.price.denom)))?;
    }
    Ok(totals
        .into_iter()
        .map(|((assets_denom, price_denom), (assets, price))| {
            (Coin::new(assets, assets_denom), Coin::new(price, price_denom))
        })
        .collect())
}

/// Record each `(assets, price)` pair with the valuation service.
///
/// Each pair is looked up before it is recorded; a pair whose lookup or
/// record fails is skipped and reported, and the rest are still recorded.
pub fn record_navs(
    recorder: &mut dyn NavRecorder,
    pairs: &[(Coin, Coin)],
    source: &str,
    block: &BlockInfo,
) -> NavOutcome {
    let mut outcome = NavOutcome::default();
    for (assets, price) in pairs {
        let fail = |reason: String| NavFailure {
            assets_denom: assets.denom.clone(),
            price_denom: price.denom.clone(),
            reason,
        };
        if assets.is_zero() || price.is_zero() {
            continue;
        }
        let Some(volume) = assets.amount.to_u64() else {
            outcome.failures.push(fail(format!("volume {assets} does not fit in a valuation")));
            continue;
        };
        let nav = NetAssetValue {
            assets_denom: assets.denom.clone(),
            price: price.clone(),
            volume,
        };
        let previous = match recorder.lookup_value(&assets.denom, &price.denom) {
            Ok(previous) => previous,
            Err(err) => {
                outcome.failures.push(fail(err.message().to_string()));
                continue;
            }
        };
        if let Some(previous) = &previous {
            tracing::debug!(
                assets_denom = %assets.denom,
                previous_price = %previous.price,
                previous_volume = previous.volume,
                price = %price,
                volume,
                "replacing net asset value"
            );
        }
        match recorder.record_value(&nav, source, block) {
            Ok(()) => outcome.recorded.push(nav),
            Err(err) => outcome.failures.push(fail(err.message().to_string())),
        }
    }

    for failure in &outcome.failures {
        tracing::warn!(
            assets_denom = %failure.assets_denom,
            price_denom = %failure.price_denom,
            reason = %failure.reason,
            "could not record net asset value"
        );
    }
    outcome
}
