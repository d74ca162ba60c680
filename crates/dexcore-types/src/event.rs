//! Events emitted by the settlement core.

use serde::{Deserialize, Serialize};

use crate::{AccountId, Coin, Coins, MarketId, OrderId, OrderKind};

/// Typed events; the host maps them onto its own event system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    OrderCreated {
        order_id: OrderId,
        kind: OrderKind,
        market_id: MarketId,
        external_id: Option<String>,
    },
    OrderCancelled {
        order_id: OrderId,
        cancelled_by: AccountId,
        market_id: MarketId,
        external_id: Option<String>,
    },
    /// An order was completely filled and removed.
    OrderFilled {
        order_id: OrderId,
        assets: Coin,
        price: Coin,
        fees: Coins,
        market_id: MarketId,
        external_id: Option<String>,
    },
    /// Part of an order was filled; amounts describe the filled part.
    OrderPartiallyFilled {
        order_id: OrderId,
        assets: Coin,
        price: Coin,
        fees: Coins,
        market_id: MarketId,
        external_id: Option<String>,
    },
    FundsCommitted {
        account: AccountId,
        market_id: MarketId,
        amount: Coins,
        tag: String,
    },
    CommitmentReleased {
        account: AccountId,
        market_id: MarketId,
        amount: Coins,
        tag: String,
    },
    MarketCreated {
        market_id: MarketId,
    },
    MarketFeesUpdated {
        market_id: MarketId,
    },
    MarketOrdersDisabled {
        market_id: MarketId,
        updated_by: AccountId,
    },
    ParamsUpdated,
    /// Diagnostic for a valuation that could not be recorded.
    NavRecordFailed {
        assets_denom: String,
        price_denom: String,
        reason: String,
    },
}

impl ExchangeEvent {
    /// Event type name as emitted to the host.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "order_created",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::OrderFilled { .. } => "order_filled",
            Self::OrderPartiallyFilled { .. } => "order_partially_filled",
            Self::FundsCommitted { .. } => "funds_committed",
            Self::CommitmentReleased { .. } => "commitment_released",
            Self::MarketCreated { .. } => "market_created",
            Self::MarketFeesUpdated { .. } => "market_fees_updated",
            Self::MarketOrdersDisabled { .. } => "market_orders_disabled",
            Self::ParamsUpdated => "params_updated",
            Self::NavRecordFailed { .. } => "nav_record_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = ExchangeEvent::OrderFilled {
            order_id: OrderId(4),
            assets: Coin::new(12, "apple"),
            price: Coin::new(60, "plum"),
            fees: "2plum".parse().unwrap(),
            market_id: MarketId(1),
            external_id: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_filled");
        assert_eq!(json["fees"], "2plum");
        assert_eq!(event.name(), "order_filled");
    }
}
