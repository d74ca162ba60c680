//! Order ledger.
//!
//! An order is stored once under `0x02 id kind` with its kind-specific
//! payload as JSON. Market, owner, asset and external-id indexes are written
//! when the order is first stored and removed when it is deleted. Partial
//! fills rewrite only the primary record: the indexed fields never change.

use std::ops::ControlFlow;

use dexcore_types::{AccountId, DexError, MarketId, Order, OrderDetails, OrderId, OrderKind, Result};

use crate::keys;
use crate::{KvStore, Ledger};

fn read_error(order_id: OrderId, cause: impl ToString) -> DexError {
    DexError::OrderRead {
        order_id,
        cause: cause.to_string(),
    }
}

/// Key and value of an order's primary record.
fn encode_order(order: &Order) -> Result<(Vec<u8>, Vec<u8>)> {
    let value = match &order.details {
        OrderDetails::Ask(ask) => serde_json::to_vec(ask)?,
        OrderDetails::Bid(bid) => serde_json::to_vec(bid)?,
    };
    Ok((keys::key_order(order.id, order.kind()), value))
}

/// Decode a primary record. Unknown kind bytes are reported as-is.
fn decode_order(order_id: OrderId, type_byte: u8, value: &[u8]) -> Result<Order> {
    let kind = OrderKind::try_from(type_byte)
        .map_err(|byte| read_error(order_id, format!("unknown type byte {byte:#04x}")))?;
    let details = match kind {
        OrderKind::Ask => OrderDetails::Ask(serde_json::from_slice(value).map_err(|e| read_error(order_id, e))?),
        OrderKind::Bid => OrderDetails::Bid(serde_json::from_slice(value).map_err(|e| read_error(order_id, e))?),
    };
    Ok(Order::new(order_id, details))
}

impl<S: KvStore> Ledger<S> {
    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Load an order by id, whatever its kind.
    ///
    /// # Errors
    /// [`DexError::OrderRead`] if the stored record cannot be decoded.
    pub fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let prefix = keys::key_prefix_order(order_id);
        let Some((key, value)) = self.store.scan(&prefix, None, Some(1)).into_iter().next() else {
            return Ok(None);
        };
        let type_byte = key
            .get(prefix.len())
            .copied()
            .ok_or_else(|| read_error(order_id, "missing type byte"))?;
        decode_order(order_id, type_byte, &value).map(Some)
    }

    /// Load the order a market knows by `external_id`.
    pub fn get_order_by_external_id(&self, market_id: MarketId, external_id: &str) -> Result<Option<Order>> {
        if external_id.is_empty() {
            return Ok(None);
        }
        let Some(value) = self.store.get(&keys::key_market_external_id(market_id, external_id)) else {
            return Ok(None);
        };
        let order_id = keys::decode_order_id(&value)?;
        self.get_order(order_id)
    }

    /// Highest order id handed out so far (zero before the first).
    pub fn last_order_id(&self) -> Result<OrderId> {
        match self.store.get(&keys::key_last_order_id()) {
            Some(value) => keys::decode_order_id(&value),
            None => Ok(OrderId(0)),
        }
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// The id [`Self::next_order_id`] would hand out, without reserving it.
    pub fn peek_next_order_id(&self) -> Result<OrderId> {
        self.last_order_id()?
            .0
            .checked_add(1)
            .map(OrderId)
            .ok_or_else(|| DexError::overflow("order id space exhausted"))
    }

    /// Reserve the next order id. Ids are never reused, even after deletion.
    pub fn next_order_id(&mut self) -> Result<OrderId> {
        let next = self.peek_next_order_id()?;
        self.store.set(keys::key_last_order_id(), keys::encode_order_id(next));
        Ok(next)
    }

    /// Store an order.
    ///
    /// The first write of an id also writes its index entries; rewrites
    /// (partial fills) replace only the primary record.
    ///
    /// # Errors
    /// - [`DexError::InvalidOrder`] if the id is already stored as the other kind
    /// - [`DexError::DuplicateExternalId`] if another order in the market uses the external id
    /// - [`DexError::InvalidAddress`] if the owner cannot be encoded into the owner index
    pub fn set_order(&mut self, order: &Order) -> Result<()> {
        let (key, value) = encode_order(order)?;
        let prefix = keys::key_prefix_order(order.id);
        let existing = self.store.scan(&prefix, None, Some(1)).into_iter().next();

        match existing {
            Some((existing_key, _)) if existing_key != key => Err(DexError::InvalidOrder {
                reason: format!("order {} is already stored as a different order type", order.id),
            }),
            Some(_) => {
                self.store.set(key, value);
                Ok(())
            }
            None => {
                if let Some(external_id) = order.external_id() {
                    self.check_external_id_free(order.market_id(), external_id, order.id)?;
                }
                let owner_key = keys::key_address_to_order(order.owner(), order.id)?;
                self.store.set(key, value);
                self.write_indexes(order, owner_key);
                Ok(())
            }
        }
    }

    /// Remove an order and its index entries, returning what was removed.
    ///
    /// The primary record is always removed. If it cannot be decoded its
    /// index entries cannot be located; that is logged as an integrity
    /// failure and the read error is returned.
    pub fn delete_order(&mut self, order_id: OrderId) -> Result<Option<Order>> {
        let prefix = keys::key_prefix_order(order_id);
        let entries = self.store.scan_prefix(&prefix);
        let mut deleted = None;
        let mut errs = Vec::new();
        for (key, value) in entries {
            self.store.delete(&key);
            let decoded = match key.get(prefix.len()) {
                Some(type_byte) => decode_order(order_id, *type_byte, &value),
                None => Err(read_error(order_id, "missing type byte")),
            };
            match decoded {
                Ok(order) => {
                    self.delete_indexes(&order);
                    deleted = Some(order);
                }
                Err(err) => {
                    tracing::error!(
                        order_id = order_id.0,
                        error = %err,
                        "order record removed but its index entries could not be located"
                    );
                    errs.push(err);
                }
            }
        }
        DexError::join_result(errs)?;
        Ok(deleted)
    }

    fn check_external_id_free(&self, market_id: MarketId, external_id: &str, order_id: OrderId) -> Result<()> {
        let key = keys::key_market_external_id(market_id, external_id);
        match self.store.get(&key) {
            Some(value) => {
                let holder = keys::decode_order_id(&value)?;
                if holder == order_id {
                    Ok(())
                } else {
                    Err(DexError::DuplicateExternalId {
                        market_id,
                        external_id: external_id.to_string(),
                        order_id: holder,
                    })
                }
            }
            None => Ok(()),
        }
    }

    fn write_indexes(&mut self, order: &Order, owner_key: Vec<u8>) {
        let id = order.id;
        self.store
            .set(keys::key_market_to_order(order.market_id(), id), Vec::new());
        self.store.set(owner_key, Vec::new());
        self.store.set(
            keys::key_asset_to_order(&order.assets().denom, order.kind(), id),
            Vec::new(),
        );
        if let Some(external_id) = order.external_id() {
            self.store.set(
                keys::key_market_external_id(order.market_id(), external_id),
                keys::encode_order_id(id),
            );
        }
    }

    fn delete_indexes(&mut self, order: &Order) {
        let id = order.id;
        self.store
            .delete(&keys::key_market_to_order(order.market_id(), id));
        // An unencodable owner was never indexed.
        if let Ok(owner_key) = keys::key_address_to_order(order.owner(), id) {
            self.store.delete(&owner_key);
        }
        self.store
            .delete(&keys::key_asset_to_order(&order.assets().denom, order.kind(), id));
        if let Some(external_id) = order.external_id() {
            let key = keys::key_market_external_id(order.market_id(), external_id);
            // Only drop the external id entry if it still points here.
            let points_here = self
                .store
                .get(&key)
                .and_then(|v| keys::decode_order_id(&v).ok())
                == Some(id);
            if points_here {
                self.store.delete(&key);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Iteration
    // ---------------------------------------------------------------------

    /// Visit every order in id order.
    ///
    /// Undecodable records are skipped and reported together once the walk
    /// finishes (or `f` breaks).
    pub fn iterate_orders(&self, mut f: impl FnMut(&Order) -> ControlFlow<()>) -> Result<()> {
        let mut errs = Vec::new();
        for (key, value) in self.store.scan_prefix(&keys::key_prefix_orders()) {
            let decoded = match keys::parse_order_key(&key) {
                Some((order_id, type_byte)) => decode_order(order_id, type_byte, &value),
                None => Err(DexError::CorruptValue {
                    entity: "order key".into(),
                    reason: format!("unexpected key length {}", key.len()),
                }),
            };
            match decoded {
                Ok(order) => {
                    if f(&order).is_break() {
                        break;
                    }
                }
                Err(err) => errs.push(err),
            }
        }
        DexError::join_result(errs)
    }

    /// Visit every order in a market.
    pub fn iterate_market_orders(
        &self,
        market_id: MarketId,
        f: impl FnMut(&Order) -> ControlFlow<()>,
    ) -> Result<()> {
        let prefix = keys::key_prefix_market_to_order(market_id);
        let expected_len = prefix.len() + 8;
        self.iterate_index(&prefix, |key| {
            (key.len() == expected_len)
                .then(|| keys::parse_index_order_id(key))
                .flatten()
        }, f)
    }

    /// Visit every order owned by `owner`.
    pub fn iterate_owner_orders(
        &self,
        owner: &AccountId,
        f: impl FnMut(&Order) -> ControlFlow<()>,
    ) -> Result<()> {
        let prefix = keys::key_prefix_address_to_order(owner)?;
        let expected_len = prefix.len() + 8;
        self.iterate_index(&prefix, |key| {
            (key.len() == expected_len)
                .then(|| keys::parse_index_order_id(key))
                .flatten()
        }, f)
    }

    /// Visit every order whose assets are `denom`, optionally of one kind only.
    pub fn iterate_asset_orders(
        &self,
        denom: &str,
        kind: Option<OrderKind>,
        f: impl FnMut(&Order) -> ControlFlow<()>,
    ) -> Result<()> {
        let prefix = match kind {
            Some(kind) => keys::key_prefix_asset_to_order_kind(denom, kind),
            None => keys::key_prefix_asset_to_order(denom),
        };
        self.iterate_index(&prefix, |key| {
            keys::parse_asset_to_order_key(key, denom).map(|(_, order_id)| order_id)
        }, f)
    }

    /// Ids of every order in a market, without loading them.
    #[must_use]
    pub fn order_ids_for_market(&self, market_id: MarketId) -> Vec<OrderId> {
        let prefix = keys::key_prefix_market_to_order(market_id);
        self.store
            .scan_prefix(&prefix)
            .into_iter()
            .filter(|(key, _)| key.len() == prefix.len() + 8)
            .filter_map(|(key, _)| keys::parse_index_order_id(&key))
            .collect()
    }

    fn iterate_index(
        &self,
        prefix: &[u8],
        parse: impl Fn(&[u8]) -> Option<OrderId>,
        mut f: impl FnMut(&Order) -> ControlFlow<()>,
    ) -> Result<()> {
        let mut errs = Vec::new();
        for (key, _) in self.store.scan_prefix(prefix) {
            let Some(order_id) = parse(&key) else {
                continue;
            };
            match self.get_order(order_id) {
                Ok(Some(order)) => {
                    if f(&order).is_break() {
                        break;
                    }
                }
                Ok(None) => errs.push(DexError::OrderNotFound(order_id)),
                Err(err) => errs.push(err),
            }
        }
        DexError::join_result(errs)
    }
}
