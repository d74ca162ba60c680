//! # dexcore-settlement
//!
//! **Settlement plane**: turns matched orders into fund movements.
//!
//! ## Architecture
//!
//! Every settlement entry point builds a [`SettlementPlan`] and hands it to
//! the same close-out sequence:
//! 1. Release the holds of every order the plan fills (abort on any failure)
//! 2. Execute the asset and price transfers
//! 3. Collect settlement fees, then any creation fee
//! 4. Persist the partial remainder and delete the filled orders
//! 5. Emit fill events
//! 6. Record observed prices with the valuation service (best effort)
//!
//! ## Entry points
//!
//! - **User fills**: [`Exchange::fill_bids`], [`Exchange::fill_asks`]
//! - **Administrative**: [`Exchange::settle_orders`], [`Exchange::settle_commitments`]
//! - **Order and commitment lifecycle**: placement, cancellation, commitments,
//!   market creation and closing, fee and param updates

pub mod conservation;
pub mod custody;
pub mod engine;
pub mod nav;
pub mod plan;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use engine::{
    CloseMarketSummary, Collaborators, Exchange, FillAsksRequest, FillBidsRequest, SettleCommitmentsRequest,
    SettleOrdersRequest, SettlementReport,
};
pub use nav::{NavFailure, NavOutcome};
pub use plan::{FilledOrder, PartialFill, SettlementPlan};
