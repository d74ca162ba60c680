//! Error types for the DexCore settlement core.
//!
//! All errors use the `DX_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by subsystem:
//! - 1xx: Order errors
//! - 2xx: Amount / commitment errors
//! - 3xx: Fee and configuration errors
//! - 4xx: Market and eligibility errors
//! - 5xx: Settlement errors
//! - 6xx: Collaborator (escrow, custody, attribute, valuation) failures
//! - 7xx: Data integrity errors
//! - 9xx: General / internal errors

use thiserror::Error;

use crate::{AccountId, Coin, Coins, FeeSide, MarketId, OrderId, OrderKind, ServiceError};

/// Central error enum for all DexCore operations.
#[derive(Debug, Error)]
pub enum DexError {
    // =================================================================
    // Order Errors (1xx)
    // =================================================================
    /// The requested order does not exist in the ledger.
    #[error("DX_ERR_100: order {0} not found")]
    OrderNotFound(OrderId),

    /// The order failed validation (missing fields, bad values, etc.).
    #[error("DX_ERR_101: invalid order: {reason}")]
    InvalidOrder { reason: String },

    /// An order of one kind was supplied where the other kind is required.
    #[error("DX_ERR_102: order {order_id} is type {actual}: expected {expected}")]
    WrongOrderKind {
        order_id: OrderId,
        actual: OrderKind,
        expected: OrderKind,
    },

    /// The order belongs to a different market than the request.
    #[error("DX_ERR_103: order {order_id} market id {order_market} does not equal requested market id {requested}")]
    OrderMarketMismatch {
        order_id: OrderId,
        order_market: MarketId,
        requested: MarketId,
    },

    /// The initiator of a fill owns one of the orders being filled.
    #[error("DX_ERR_104: order {order_id} has the same {role} {owner} as the requester")]
    SelfTrade {
        order_id: OrderId,
        role: &'static str,
        owner: AccountId,
    },

    /// The supplied list of order ids is empty, has zeros, or has duplicates.
    #[error("DX_ERR_105: invalid order ids: {reason}")]
    InvalidOrderIds { reason: String },

    /// Another order in the market already uses this external id.
    #[error("DX_ERR_106: external id {external_id:?} is already in use on order {order_id} in market {market_id}")]
    DuplicateExternalId {
        market_id: MarketId,
        external_id: String,
        order_id: OrderId,
    },

    /// The signer may not act on the order.
    #[error("DX_ERR_107: account {signer} cannot cancel order {order_id}")]
    NotOrderOwner { order_id: OrderId, signer: AccountId },

    /// An account cannot be encoded into a ledger key.
    #[error("DX_ERR_108: invalid address {address}: {reason}")]
    InvalidAddress { address: AccountId, reason: String },

    // =================================================================
    // Amount / Commitment Errors (2xx)
    // =================================================================
    /// A commitment delta contained a negative amount.
    #[error("DX_ERR_200: cannot {action} negative commitment amount {amount:?} for {account} in market {market_id}")]
    NegativeCommitment {
        action: &'static str,
        amount: Coins,
        account: AccountId,
        market_id: MarketId,
    },

    /// A release was requested but nothing is committed.
    #[error("DX_ERR_201: account {account} does not have any funds committed to market {market_id}")]
    NothingCommitted {
        account: AccountId,
        market_id: MarketId,
    },

    /// A release asked for more than the committed balance in some denom.
    #[error("DX_ERR_202: commitment amount to release {requested:?} is more than currently committed amount {committed:?} for {account} in market {market_id}")]
    ReleaseExceedsCommitment {
        requested: Coins,
        committed: Coins,
        account: AccountId,
        market_id: MarketId,
    },

    /// A coin or coins string could not be parsed or is malformed.
    #[error("DX_ERR_203: invalid coin {input:?}: {reason}")]
    InvalidCoin { input: String, reason: String },

    /// Transfer inputs and outputs do not balance.
    #[error("DX_ERR_204: input coins {inputs:?} does not equal output coins {outputs:?}")]
    TransferImbalance { inputs: Coins, outputs: Coins },

    /// Arithmetic left the representable range.
    #[error("DX_ERR_205: arithmetic overflow: {context}")]
    Overflow { context: String },

    // =================================================================
    // Fee / Configuration Errors (3xx)
    // =================================================================
    /// The side has ratios configured, just none for this price denom.
    #[error("DX_ERR_300: no {side} settlement fee ratio found for denom {denom:?}")]
    NoRatioForDenom { side: FeeSide, denom: String },

    /// Ratios exist for the price denom but none can be applied to the price.
    #[error("DX_ERR_301: no applicable {side} settlement fee ratios found for price {price}")]
    NoApplicableRatio { side: FeeSide, price: Coin },

    /// A ratio could not be applied to a price.
    #[error("DX_ERR_302: cannot apply ratio {ratio} to price {price}: {reason}")]
    RatioNotApplicable {
        ratio: String,
        price: Coin,
        reason: String,
    },

    /// A flat fee is required but none was offered.
    #[error("DX_ERR_303: no {name} fee provided, must be one of: {options}")]
    MissingFee { name: &'static str, options: Coins },

    /// The offered flat fee is in a denom with no option.
    #[error("DX_ERR_304: invalid {name} fee {fee:?}, must be one of: {options}")]
    InvalidFeeDenom {
        name: &'static str,
        fee: Coin,
        options: Coins,
    },

    /// The offered flat fee is below the minimum for its denom.
    #[error("DX_ERR_305: insufficient {name} fee: {fee:?} is less than required amount {required:?}")]
    InsufficientFee {
        name: &'static str,
        fee: Coin,
        required: Coin,
    },

    /// A combined fee requirement (flat + ratio, or price vs fees) is not met.
    #[error("DX_ERR_306: {reason}")]
    FeeRequirement { reason: String },

    /// Module params failed validation.
    #[error("DX_ERR_307: invalid params: {reason}")]
    InvalidParams { reason: String },

    /// Configuration error (bad config file, missing fields, etc.).
    #[error("DX_ERR_308: configuration error: {0}")]
    Configuration(String),

    // =================================================================
    // Market / Eligibility Errors (4xx)
    // =================================================================
    #[error("DX_ERR_400: market {0} does not exist")]
    MarketNotFound(MarketId),

    #[error("DX_ERR_401: market {0} is not accepting orders")]
    MarketNotAcceptingOrders(MarketId),

    #[error("DX_ERR_402: market {0} does not allow user settlement")]
    UserSettlementNotAllowed(MarketId),

    #[error("DX_ERR_403: market {0} is not accepting commitments")]
    MarketNotAcceptingCommitments(MarketId),

    /// The account lacks the attributes the market requires for the action.
    #[error("DX_ERR_404: account {account} is not allowed to {action} in market {market_id}")]
    Ineligible {
        account: AccountId,
        action: &'static str,
        market_id: MarketId,
    },

    /// The signer failed governance-authority validation.
    #[error("DX_ERR_405: {signer} is not authorized: {reason}")]
    Unauthorized { signer: AccountId, reason: String },

    #[error("DX_ERR_406: market {0} already exists")]
    MarketExists(MarketId),

    // =================================================================
    // Settlement Errors (5xx)
    // =================================================================
    /// The declared aggregate amount does not match the referenced orders.
    #[error("DX_ERR_500: total {what} {declared:?} does not equal sum of {what} of orders {actual:?}")]
    TotalMismatch {
        what: &'static str,
        declared: Coin,
        actual: Coins,
    },

    #[error("DX_ERR_501: settlement resulted in unexpected partial order {0}")]
    UnexpectedPartial(OrderId),

    #[error("DX_ERR_502: settlement unexpectedly resulted in all orders fully filled")]
    UnexpectedFullFill,

    /// The asks and bids cannot be paired into a valid settlement.
    #[error("DX_ERR_503: {reason}")]
    Fulfillment { reason: String },

    // =================================================================
    // Collaborator Errors (6xx)
    // =================================================================
    /// A call into escrow, custody, attribute, or valuation service failed.
    #[error("DX_ERR_600: {context}: {source}")]
    Collaborator {
        context: String,
        #[source]
        source: ServiceError,
    },

    // =================================================================
    // Data Integrity Errors (7xx)
    // =================================================================
    /// A stored order could not be decoded.
    #[error("DX_ERR_700: failed to read order {order_id}: {cause}")]
    OrderRead { order_id: OrderId, cause: String },

    /// Some other stored value could not be decoded.
    #[error("DX_ERR_701: corrupt {entity} value: {reason}")]
    CorruptValue { entity: String, reason: String },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Several independent failures, one per line.
    #[error("{}", join_lines(.0))]
    Multiple(Vec<DexError>),

    /// Serialization / deserialization error.
    #[error("DX_ERR_901: serialization error: {0}")]
    Serialization(String),

    #[error("DX_ERR_902: internal error: {0}")]
    Internal(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, DexError>;

fn join_lines(errors: &[DexError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl DexError {
    /// Combine independent failures. Returns `None` when there are none,
    /// the error itself when there is one, and a flattened
    /// [`DexError::Multiple`] otherwise.
    #[must_use]
    pub fn join(errors: Vec<DexError>) -> Option<DexError> {
        let mut flat = Vec::with_capacity(errors.len());
        for err in errors {
            match err {
                Self::Multiple(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(Self::Multiple(flat)),
        }
    }

    /// `Ok(())` when `errors` is empty, the joined error otherwise.
    pub fn join_result(errors: Vec<DexError>) -> Result<()> {
        match Self::join(errors) {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Wrap a collaborator failure with context.
    pub fn collaborator(context: impl Into<String>, source: ServiceError) -> Self {
        Self::Collaborator {
            context: context.into(),
            source,
        }
    }

    pub fn overflow(context: impl Into<String>) -> Self {
        Self::Overflow {
            context: context.into(),
        }
    }

    /// The individual failures carried by this error.
    #[must_use]
    pub fn flatten(&self) -> Vec<&DexError> {
        match self {
            Self::Multiple(inner) => inner.iter().collect(),
            other => vec![other],
        }
    }
}

impl From<serde_json::Error> for DexError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = DexError::OrderNotFound(OrderId(5));
        let msg = format!("{err}");
        assert_eq!(msg, "DX_ERR_100: order 5 not found");
    }

    #[test]
    fn join_of_nothing_is_none() {
        assert!(DexError::join(Vec::new()).is_none());
        assert!(DexError::join_result(Vec::new()).is_ok());
    }

    #[test]
    fn join_of_one_is_that_error() {
        let err = DexError::join(vec![DexError::UnexpectedFullFill]).unwrap();
        assert!(matches!(err, DexError::UnexpectedFullFill));
    }

    #[test]
    fn join_flattens_and_lists_every_error() {
        let inner = DexError::join(vec![
            DexError::OrderNotFound(OrderId(1)),
            DexError::OrderNotFound(OrderId(2)),
        ])
        .unwrap();
        let err = DexError::join(vec![inner, DexError::MarketNotFound(MarketId(3))]).unwrap();
        assert_eq!(err.flatten().len(), 3);
        let msg = err.to_string();
        assert_eq!(msg.lines().count(), 3);
        assert!(msg.contains("order 1 not found"));
        assert!(msg.contains("order 2 not found"));
        assert!(msg.contains("market 3 does not exist"));
    }

    #[test]
    fn release_exceeds_names_both_amounts() {
        let err = DexError::ReleaseExceedsCommitment {
            requested: "300apple".parse().unwrap(),
            committed: "112apple".parse().unwrap(),
            account: AccountId::from("addr1"),
            market_id: MarketId(2),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"300apple\""), "Got: {msg}");
        assert!(msg.contains("\"112apple\""), "Got: {msg}");
    }

    #[test]
    fn collaborator_keeps_source() {
        let err = DexError::collaborator("error releasing hold", ServiceError::new("boom"));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "DX_ERR_600: error releasing hold: boom");
    }

    #[test]
    fn all_errors_have_dx_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(DexError::UnexpectedFullFill),
            Box::new(DexError::MarketNotFound(MarketId(1))),
            Box::new(DexError::Internal("test".into())),
            Box::new(DexError::OrderRead {
                order_id: OrderId(9),
                cause: "unknown order type byte 0x07".into(),
            }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("DX_ERR_"),
                "Error missing DX_ERR_ prefix: {msg}"
            );
        }
    }
}
