//! # dexcore-ledger
//!
//! **State plane**: everything the settlement core persists, laid out in a
//! byte-ordered key-value store.
//!
//! ## Layout
//!
//! - [`keys`]: the keyspace codec (pure functions, no state)
//! - [`store`]: the [`KvStore`] abstraction and the in-memory [`MemStore`]
//! - [`orders`]: order records and their market/owner/asset/external-id indexes
//! - [`commitments`]: per-(market, account) committed balances
//! - [`market`]: market flags, required attributes, fee tables, and params
//! - [`fees`]: the fee calculator on top of the market tables
//!
//! All of it hangs off one [`Ledger`] handle so a request sees a single view
//! of the store. The ledger never commits or rolls back; the host discards
//! every write of a request that returns an error.

pub mod commitments;
pub mod fees;
pub mod keys;
pub mod market;
pub mod orders;
pub mod store;

use dexcore_types::ExchangeEvent;

pub use fees::validate_flat_fee;
pub use keys::{AttrKind, MarketSubtype};
pub use store::{KvStore, MemStore};

/// Typed access to the exchange state held in a [`KvStore`].
///
/// Ledger operations that have observable side effects (commitment changes)
/// buffer their events here; the caller drains them with
/// [`Ledger::take_events`] once the request succeeds.
#[derive(Debug, Clone, Default)]
pub struct Ledger<S> {
    store: S,
    events: Vec<ExchangeEvent>,
}

impl<S: KvStore> Ledger<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[must_use]
    pub fn into_store(self) -> S {
        self.store
    }

    pub fn emit(&mut self, event: ExchangeEvent) {
        tracing::trace!(event = event.name(), "event buffered");
        self.events.push(event);
    }

    /// Events buffered since the last drain.
    #[must_use]
    pub fn events(&self) -> &[ExchangeEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<ExchangeEvent> {
        std::mem::take(&mut self.events)
    }
}
