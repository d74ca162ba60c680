//! Interfaces of the collaborators the settlement core calls out to.
//!
//! Escrow holds, fund custody, account attributes, asset valuation and
//! governance authority all live in sibling state-machine modules. They are
//! injected as trait objects so the core can run against in-memory fakes.
//! Calls are synchronous and share the caller's unit of work: if the core
//! returns an error the host discards every write, including theirs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AccountAmount, AccountId, Coin, Coins};

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServiceError {
    message: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Escrow service: marks funds as unavailable for spending.
pub trait HoldKeeper {
    fn place_hold(&mut self, account: &AccountId, amount: &Coins, reason: &str) -> ServiceResult<()>;
    fn release_hold(&mut self, account: &AccountId, amount: &Coins) -> ServiceResult<()>;
}

/// Fund custody service: moves balances between accounts.
pub trait BankKeeper {
    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: &Coins) -> ServiceResult<()>;
    /// Requires `sum(inputs) == sum(outputs)`.
    fn transfer_many(&mut self, inputs: &[AccountAmount], outputs: &[AccountAmount]) -> ServiceResult<()>;
    fn transfer_to_module(&mut self, from: &AccountId, module: &str, amount: &Coins) -> ServiceResult<()>;
}

/// Attribute service gating who may trade in a market.
pub trait AttributeKeeper {
    /// True when `account` carries every attribute in `required`. An empty
    /// requirement is satisfied by everyone.
    fn is_eligible(&self, account: &AccountId, required: &[String]) -> bool;
}

/// Governance-authority check for administrative operations.
pub trait AuthorityKeeper {
    fn validate_authority(&self, signer: &AccountId) -> ServiceResult<()>;
}

/// Observed value of `volume` units of an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAssetValue {
    pub assets_denom: String,
    pub price: Coin,
    pub volume: u64,
}

/// Height and time of the block being executed, supplied by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub height: u64,
    pub time: DateTime<Utc>,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            height: 0,
            time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Valuation service recording observed prices.
pub trait NavRecorder {
    /// The last recorded value for the pair, `None` if nothing is recorded
    /// yet. Fails if the asset itself is unknown.
    fn lookup_value(&mut self, assets_denom: &str, price_denom: &str) -> ServiceResult<Option<NetAssetValue>>;
    fn record_value(&mut self, nav: &NetAssetValue, source: &str, block: &BlockInfo) -> ServiceResult<()>;
}
