//! # dexcore-types
//!
//! Shared types, errors, and configuration for the **DexCore** settlement core.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Identifiers**: [`OrderId`], [`MarketId`], [`AccountId`]
//! - **Amounts**: [`Coin`], [`Coins`] with checked whole-unit arithmetic
//! - **Order model**: [`Order`], [`OrderDetails`], [`AskOrder`], [`BidOrder`], [`OrderKind`]
//! - **Fee model**: [`FeeRatio`], [`FeeSide`], [`RatioPolicy`], [`Params`]
//! - **Transfers**: [`AccountAmount`], [`Transfer`], [`IndexedAmounts`]
//! - **Events**: [`ExchangeEvent`]
//! - **Collaborators**: [`HoldKeeper`], [`BankKeeper`], [`AttributeKeeper`], [`NavRecorder`], [`AuthorityKeeper`]
//! - **Configuration**: [`ModuleConfig`], [`MarketConfig`], [`MarketFees`]
//! - **Errors**: [`DexError`] with `DX_ERR_` prefix codes
//! - **Constants**: system-wide limits and defaults

pub mod coin;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod fee;
pub mod ids;
pub mod order;
pub mod params;
pub mod services;
pub mod transfer;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use coin::{Coin, Coins};
pub use config::*;
pub use error::*;
pub use event::*;
pub use fee::*;
pub use ids::*;
pub use order::*;
pub use params::*;
pub use services::*;
pub use transfer::*;

// Constants are accessed via `dexcore_types::constants::FOO`
// (not re-exported to avoid name collisions).
