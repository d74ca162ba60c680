//! The exchange: every request the settlement core accepts.
//!
//! [`Exchange`] owns the [`Ledger`] and the injected collaborators. Each
//! method is one unit of work; when it returns an error the host discards
//! every write it made, so methods validate up front but do not undo
//! partial progress themselves.

use std::collections::BTreeSet;

use dexcore_ledger::{AttrKind, KvStore, Ledger};
use dexcore_types::constants::CLOSE_MARKET_TAG;
use dexcore_types::{
    AccountAmount, AccountId, AttributeKeeper, AuthorityKeeper, BankKeeper, BlockInfo, Coin, Coins, DexError,
    ExchangeEvent, HoldKeeper, IndexedAmounts, MarketConfig, MarketFees, MarketId, ModuleConfig, NavRecorder,
    NetAssetValue, Order, OrderDetails, OrderId, OrderKind, Params, Result, Transfer,
};
use serde::{Deserialize, Serialize};

use crate::nav::{self, NavOutcome};
use crate::plan::{self, SettlementPlan};
use crate::{conservation, custody};

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The sibling services an [`Exchange`] calls out to.
pub trait Collaborators {
    fn holds(&mut self) -> &mut dyn HoldKeeper;
    fn bank(&mut self) -> &mut dyn BankKeeper;
    fn attributes(&self) -> &dyn AttributeKeeper;
    fn navs(&mut self) -> &mut dyn NavRecorder;
    fn authority(&self) -> &dyn AuthorityKeeper;
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// A seller fills bid orders with their own assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillBidsRequest {
    pub seller: AccountId,
    pub market_id: MarketId,
    /// Must equal the sum of the bids' assets.
    pub total_assets: Coin,
    pub bid_order_ids: Vec<OrderId>,
    pub seller_settlement_flat_fee: Option<Coin>,
    pub ask_order_creation_fee: Option<Coin>,
}

impl FillBidsRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();
        if self.seller.is_empty() {
            errs.push(invalid_request("seller cannot be empty"));
        }
        if let Err(err) = validate_total("assets", &self.total_assets) {
            errs.push(err);
        }
        if let Err(err) = validate_order_ids("bid", &self.bid_order_ids) {
            errs.push(err);
        }
        for fee in [&self.seller_settlement_flat_fee, &self.ask_order_creation_fee].into_iter().flatten() {
            if let Err(err) = fee.validate() {
                errs.push(err);
            }
        }
        DexError::join_result(errs)
    }
}

/// A buyer fills ask orders with their own funds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillAsksRequest {
    pub buyer: AccountId,
    pub market_id: MarketId,
    /// Must equal the sum of the asks' prices.
    pub total_price: Coin,
    pub ask_order_ids: Vec<OrderId>,
    pub buyer_settlement_fees: Coins,
    pub bid_order_creation_fee: Option<Coin>,
}

impl FillAsksRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();
        if self.buyer.is_empty() {
            errs.push(invalid_request("buyer cannot be empty"));
        }
        if let Err(err) = validate_total("price", &self.total_price) {
            errs.push(err);
        }
        if let Err(err) = validate_order_ids("ask", &self.ask_order_ids) {
            errs.push(err);
        }
        if self.buyer_settlement_fees.is_any_negative() {
            errs.push(invalid_request(format!(
                "buyer settlement fees {} cannot be negative",
                self.buyer_settlement_fees
            )));
        }
        if let Some(Err(err)) = self.bid_order_creation_fee.as_ref().map(Coin::validate) {
            errs.push(err);
        }
        DexError::join_result(errs)
    }
}

/// An administrator matches asks against bids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleOrdersRequest {
    pub admin: AccountId,
    pub market_id: MarketId,
    pub ask_order_ids: Vec<OrderId>,
    pub bid_order_ids: Vec<OrderId>,
    /// Whether the administrator expects one order to be left partially filled.
    pub expect_partial: bool,
}

impl SettleOrdersRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();
        if let Err(err) = validate_order_ids("ask", &self.ask_order_ids) {
            errs.push(err);
        }
        if let Err(err) = validate_order_ids("bid", &self.bid_order_ids) {
            errs.push(err);
        }
        let asks: BTreeSet<OrderId> = self.ask_order_ids.iter().copied().collect();
        let both: Vec<String> = self
            .bid_order_ids
            .iter()
            .filter(|id| asks.contains(id))
            .map(ToString::to_string)
            .collect();
        if !both.is_empty() {
            errs.push(DexError::InvalidOrderIds {
                reason: format!("order ids duplicated as both bid and ask: {}", both.join(", ")),
            });
        }
        DexError::join_result(errs)
    }
}

/// An administrator moves committed funds.
///
/// Inputs and fees are taken out of commitments; outputs are committed to
/// the market again for their new owners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettleCommitmentsRequest {
    pub admin: AccountId,
    pub market_id: MarketId,
    pub inputs: Vec<AccountAmount>,
    pub outputs: Vec<AccountAmount>,
    pub fees: Vec<AccountAmount>,
    /// Prices observed off-book, recorded best effort.
    pub navs: Vec<NetAssetValue>,
    pub tag: String,
}

impl SettleCommitmentsRequest {
    pub fn validate(&self) -> Result<()> {
        let mut errs = Vec::new();
        if self.inputs.is_empty() {
            errs.push(invalid_request("no inputs provided"));
        }
        if self.outputs.is_empty() {
            errs.push(invalid_request("no outputs provided"));
        }
        for entry in self.inputs.iter().chain(&self.outputs).chain(&self.fees) {
            if entry.amount.is_any_negative() {
                errs.push(invalid_request(format!(
                    "amount {} for {} cannot be negative",
                    entry.amount, entry.account
                )));
            }
        }
        if let Err(err) = conservation::check_balanced(&self.inputs, &self.outputs) {
            errs.push(err);
        }
        DexError::join_result(errs)
    }
}

/// What a settlement did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReport {
    /// Orders filled and removed.
    pub filled: Vec<OrderId>,
    /// The order left on the book with a smaller quantity.
    pub partial: Option<OrderId>,
    pub navs: NavOutcome,
    /// Digest of the executed plan.
    pub digest: String,
}

/// What closing a market cleaned up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseMarketSummary {
    pub commitments_released: usize,
    pub orders_cancelled: usize,
    /// Failures are logged; closing carries on past them.
    pub failures: usize,
}

fn invalid_request(reason: impl Into<String>) -> DexError {
    DexError::InvalidOrder { reason: reason.into() }
}

fn validate_total(what: &str, total: &Coin) -> Result<()> {
    total.validate()?;
    if !total.is_positive() {
        return Err(invalid_request(format!("total {what} {total} must be positive")));
    }
    Ok(())
}

fn validate_order_ids(kind: &str, ids: &[OrderId]) -> Result<()> {
    if ids.is_empty() {
        return Err(DexError::InvalidOrderIds {
            reason: format!("no {kind} order ids provided"),
        });
    }
    let mut errs = Vec::new();
    if ids.iter().any(|id| id.is_zero()) {
        errs.push(DexError::InvalidOrderIds {
            reason: format!("{kind} order id cannot be zero"),
        });
    }
    let mut seen = BTreeSet::new();
    let mut dups = BTreeSet::new();
    for id in ids {
        if !seen.insert(*id) {
            dups.insert(*id);
        }
    }
    if !dups.is_empty() {
        let dups: Vec<String> = dups.iter().map(ToString::to_string).collect();
        errs.push(DexError::InvalidOrderIds {
            reason: format!("duplicate {kind} order ids provided: {}", dups.join(", ")),
        });
    }
    DexError::join_result(errs)
}

fn eligibility_action(kind: AttrKind) -> &'static str {
    match kind {
        AttrKind::CreateAsk => "create ask orders",
        AttrKind::CreateBid => "create bid orders",
        AttrKind::CreateCommitment => "commit funds",
    }
}

// ---------------------------------------------------------------------------
// Exchange
// ---------------------------------------------------------------------------

/// The settlement core bound to a store and its collaborators.
pub struct Exchange<S, C> {
    ledger: Ledger<S>,
    services: C,
    config: ModuleConfig,
    block: BlockInfo,
}

impl<S: KvStore, C: Collaborators> Exchange<S, C> {
    /// # Errors
    /// Returns [`DexError::Configuration`] if `config` is invalid.
    pub fn new(ledger: Ledger<S>, services: C, config: ModuleConfig) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            fee_collector = %config.fee_collector,
            ratio_policy = ?config.ratio_policy,
            "exchange initialized"
        );
        Ok(Self {
            ledger,
            services,
            config,
            block: BlockInfo::default(),
        })
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut Ledger<S> {
        &mut self.ledger
    }

    pub fn services(&self) -> &C {
        &self.services
    }

    pub fn services_mut(&mut self) -> &mut C {
        &mut self.services
    }

    pub fn config(&self) -> &ModuleConfig {
        &self.config
    }

    /// Set the block every following request executes in.
    pub fn begin_block(&mut self, block: BlockInfo) {
        self.block = block;
    }

    /// Drain the events of the requests executed so far.
    pub fn take_events(&mut self) -> Vec<ExchangeEvent> {
        self.ledger.take_events()
    }

    // -----------------------------------------------------------------------
    // Shared checks
    // -----------------------------------------------------------------------

    fn require_authority(&self, signer: &AccountId) -> Result<()> {
        self.services
            .authority()
            .validate_authority(signer)
            .map_err(|e| DexError::Unauthorized {
                signer: signer.clone(),
                reason: e.message().to_string(),
            })
    }

    fn require_eligible(&self, account: &AccountId, market_id: MarketId, kind: AttrKind) -> Result<()> {
        let required = self.ledger.required_attributes(market_id, kind);
        if self.services.attributes().is_eligible(account, &required) {
            Ok(())
        } else {
            Err(DexError::Ineligible {
                account: account.clone(),
                action: eligibility_action(kind),
                market_id,
            })
        }
    }

    /// Checks shared by both user fills, all reported together.
    fn validate_user_fill(
        &self,
        market_id: MarketId,
        initiator: &AccountId,
        kind: AttrKind,
        creation_fee: Option<&Coin>,
    ) -> Vec<DexError> {
        let mut errs = Vec::new();
        if !self.ledger.is_accepting_orders(market_id) {
            errs.push(DexError::MarketNotAcceptingOrders(market_id));
        }
        if !self.ledger.is_user_settlement_allowed(market_id) {
            errs.push(DexError::UserSettlementNotAllowed(market_id));
        }
        if let Err(err) = self.require_eligible(initiator, market_id, kind) {
            errs.push(err);
        }
        if let Err(err) = self.ledger.validate_creation_fee(market_id, kind, creation_fee) {
            errs.push(err);
        }
        errs
    }

    /// Load orders by id, checking kind, market, and that the initiator
    /// owns none of them. Every problem is reported.
    fn load_orders(
        &self,
        market_id: MarketId,
        ids: &[OrderId],
        expected: OrderKind,
        initiator: Option<(&AccountId, &'static str)>,
    ) -> Result<Vec<Order>> {
        let mut orders = Vec::with_capacity(ids.len());
        let mut errs = Vec::new();
        for id in ids {
            let order = match self.ledger.get_order(*id) {
                Ok(Some(order)) => order,
                Ok(None) => {
                    errs.push(DexError::OrderNotFound(*id));
                    continue;
                }
                Err(err) => {
                    errs.push(err);
                    continue;
                }
            };
            if order.kind() != expected {
                errs.push(DexError::WrongOrderKind {
                    order_id: *id,
                    actual: order.kind(),
                    expected,
                });
                continue;
            }
            if order.market_id() != market_id {
                errs.push(DexError::OrderMarketMismatch {
                    order_id: *id,
                    order_market: order.market_id(),
                    requested: market_id,
                });
                continue;
            }
            if let Some((account, role)) = initiator {
                if order.owner() == account {
                    errs.push(DexError::SelfTrade {
                        order_id: *id,
                        role,
                        owner: account.clone(),
                    });
                    continue;
                }
            }
            orders.push(order);
        }
        DexError::join_result(errs)?;
        Ok(orders)
    }

    // -----------------------------------------------------------------------
    // Settlement
    // -----------------------------------------------------------------------

    /// Fill bid orders with the seller's assets.
    ///
    /// # Errors
    /// Every validation failure is reported at once; see
    /// [`FillBidsRequest::validate`] and the market, eligibility, fee, and
    /// order checks. Collaborator failures abort the fill.
    pub fn fill_bids(&mut self, req: &FillBidsRequest) -> Result<SettlementReport> {
        req.validate()?;
        let market_id = req.market_id;
        let policy = self.config.ratio_policy;
        self.ledger.validate_market_exists(market_id)?;

        let mut errs = self.validate_user_fill(
            market_id,
            &req.seller,
            AttrKind::CreateAsk,
            req.ask_order_creation_fee.as_ref(),
        );
        let flat_fee = req.seller_settlement_flat_fee.as_ref();
        if let Err(err) = self.ledger.validate_seller_settlement_flat_fee(market_id, flat_fee) {
            errs.push(err);
        }
        DexError::join_result(errs)?;

        let bids = self.load_orders(market_id, &req.bid_order_ids, OrderKind::Bid, Some((&req.seller, "buyer")))?;

        let mut errs = Vec::new();
        let mut total_assets = Coins::new();
        let mut total_price = Coins::new();
        let mut seller_fee = Coins::from(req.seller_settlement_flat_fee.clone());
        for bid in &bids {
            total_assets.add_coin(bid.assets())?;
            total_price.add_coin(bid.price())?;
            match self.ledger.seller_ratio_fee(market_id, bid.price(), policy) {
                Ok(Some(fee)) => seller_fee.add_coin(&fee)?,
                Ok(None) => {}
                Err(err) => errs.push(err),
            }
        }
        if total_assets != Coins::from(req.total_assets.clone()) {
            errs.push(DexError::TotalMismatch {
                what: "assets",
                declared: req.total_assets.clone(),
                actual: total_assets,
            });
        }
        for price in total_price.iter() {
            if let Err(err) = self.ledger.validate_ask_price(market_id, &price, flat_fee, policy) {
                errs.push(err);
            }
        }
        DexError::join_result(errs)?;

        let plan = plan::fill_bids_plan(
            market_id,
            &req.seller,
            bids,
            &seller_fee,
            req.ask_order_creation_fee.as_ref(),
        )?;
        self.close_settlement(plan)
    }

    /// Fill ask orders with the buyer's funds.
    ///
    /// # Errors
    /// As [`Exchange::fill_bids`], with the buyer's settlement fees checked
    /// against the total price.
    pub fn fill_asks(&mut self, req: &FillAsksRequest) -> Result<SettlementReport> {
        req.validate()?;
        let market_id = req.market_id;
        let policy = self.config.ratio_policy;
        self.ledger.validate_market_exists(market_id)?;

        let mut errs = self.validate_user_fill(
            market_id,
            &req.buyer,
            AttrKind::CreateBid,
            req.bid_order_creation_fee.as_ref(),
        );
        if let Err(err) =
            self.ledger
                .validate_buyer_settlement_fee(market_id, &req.total_price, &req.buyer_settlement_fees, policy)
        {
            errs.push(err);
        }
        DexError::join_result(errs)?;

        let asks = self.load_orders(market_id, &req.ask_order_ids, OrderKind::Ask, Some((&req.buyer, "seller")))?;

        let mut errs = Vec::new();
        let mut total_price = Coins::new();
        let mut priced = Vec::with_capacity(asks.len());
        for ask in asks {
            total_price.add_coin(ask.price())?;
            let mut seller_fee = ask.settlement_fees();
            match self.ledger.seller_ratio_fee(market_id, ask.price(), policy) {
                Ok(Some(fee)) => seller_fee.add_coin(&fee)?,
                Ok(None) => {}
                Err(err) => errs.push(err),
            }
            priced.push((ask, seller_fee));
        }
        if total_price != Coins::from(req.total_price.clone()) {
            errs.push(DexError::TotalMismatch {
                what: "price",
                declared: req.total_price.clone(),
                actual: total_price,
            });
        }
        DexError::join_result(errs)?;

        let plan = plan::fill_asks_plan(
            market_id,
            &req.buyer,
            priced,
            &req.buyer_settlement_fees,
            req.bid_order_creation_fee.as_ref(),
        )?;
        self.close_settlement(plan)
    }

    /// Match asks against bids on an administrator's instruction.
    ///
    /// # Errors
    /// - [`DexError::Unauthorized`] unless `admin` is the authority
    /// - [`DexError::Fulfillment`] if the orders cannot be matched
    /// - [`DexError::UnexpectedPartial`] / [`DexError::UnexpectedFullFill`]
    ///   when the result disagrees with `expect_partial`
    pub fn settle_orders(&mut self, req: &SettleOrdersRequest) -> Result<SettlementReport> {
        self.require_authority(&req.admin)?;
        req.validate()?;
        let market_id = req.market_id;
        self.ledger.validate_market_exists(market_id)?;

        let mut errs = Vec::new();
        let asks = self
            .load_orders(market_id, &req.ask_order_ids, OrderKind::Ask, None)
            .unwrap_or_else(|err| {
                errs.push(err);
                Vec::new()
            });
        let bids = self
            .load_orders(market_id, &req.bid_order_ids, OrderKind::Bid, None)
            .unwrap_or_else(|err| {
                errs.push(err);
                Vec::new()
            });
        DexError::join_result(errs)?;

        let policy = self.config.ratio_policy;
        let ledger = &self.ledger;
        let plan = plan::build_settlement(market_id, asks, bids, |price| {
            ledger.seller_ratio_fee(market_id, price, policy)
        })?;

        match (&plan.partial, req.expect_partial) {
            (Some(partial), false) => return Err(DexError::UnexpectedPartial(partial.remainder.id)),
            (None, true) => return Err(DexError::UnexpectedFullFill),
            _ => {}
        }
        self.close_settlement(plan)
    }

    /// Execute a plan: release holds, move funds, collect fees, update the
    /// book, emit events, and record prices.
    fn close_settlement(&mut self, plan: SettlementPlan) -> Result<SettlementReport> {
        let market_id = plan.market_id;

        let mut errs = Vec::new();
        for (order, amount) in plan.holds_to_release()? {
            if let Err(err) = custody::release_hold_on_order(self.services.holds(), order, &amount) {
                errs.push(err);
            }
        }
        DexError::join_result(errs)?;

        for transfer in &plan.transfers {
            custody::do_transfer(self.services.bank(), transfer)?;
        }
        let fee_collector = self.config.fee_collector.as_str();
        custody::collect_fees(&self.ledger, self.services.bank(), fee_collector, market_id, &plan.fee_inputs)?;
        if let Some(creation) = &plan.creation_fee {
            custody::collect_fee(
                &self.ledger,
                self.services.bank(),
                fee_collector,
                market_id,
                &creation.account,
                &creation.amount,
            )?;
        }

        if let Some(partial) = &plan.partial {
            self.ledger.set_order(&partial.remainder)?;
        }
        for filled in &plan.fully_filled {
            self.ledger.delete_order(filled.order.id)?;
        }
        for event in plan.events() {
            self.ledger.emit(event);
        }

        let navs = match nav::navs_from_fills(plan.filled_orders()) {
            Ok(pairs) => nav::record_navs(self.services.navs(), &pairs, &self.config.nav_source, &self.block),
            Err(err) => {
                tracing::warn!(market_id = market_id.0, error = %err, "could not total observed prices");
                NavOutcome::default()
            }
        };
        for event in navs.events() {
            self.ledger.emit(event);
        }

        let digest = plan.digest();
        tracing::info!(
            market_id = market_id.0,
            filled = plan.fully_filled.len(),
            partial = plan.partial.is_some(),
            nav_failures = navs.failures.len(),
            digest = %digest,
            "settlement complete"
        );
        Ok(SettlementReport {
            filled: plan.fully_filled.iter().map(|f| f.order.id).collect(),
            partial: plan.partial.as_ref().map(|p| p.remainder.id),
            navs,
            digest,
        })
    }

    /// Move committed funds on an administrator's instruction.
    ///
    /// Returns the outcome of recording the request's prices, which never
    /// fails the settlement.
    pub fn settle_commitments(&mut self, req: &SettleCommitmentsRequest) -> Result<NavOutcome> {
        self.require_authority(&req.admin)?;
        req.validate()?;
        let market_id = req.market_id;
        self.ledger.validate_market_exists(market_id)?;

        let mut to_release = IndexedAmounts::new();
        for entry in req.inputs.iter().chain(&req.fees) {
            to_release.add_coins(&entry.account, &entry.amount)?;
        }
        let to_release = to_release.into_entries();
        self.ledger
            .release_commitments(self.services.holds(), market_id, &to_release, &req.tag)?;

        custody::do_transfer(
            self.services.bank(),
            &Transfer {
                inputs: req.inputs.clone(),
                outputs: req.outputs.clone(),
            },
        )?;
        custody::collect_fees(
            &self.ledger,
            self.services.bank(),
            &self.config.fee_collector,
            market_id,
            &req.fees,
        )?;
        self.ledger
            .add_commitments(self.services.holds(), market_id, &req.outputs, &req.tag)?;

        let pairs: Vec<(Coin, Coin)> = req
            .navs
            .iter()
            .map(|nav| (Coin::new(nav.volume, nav.assets_denom.clone()), nav.price.clone()))
            .collect();
        let navs = nav::record_navs(self.services.navs(), &pairs, &self.config.nav_source, &self.block);
        for event in navs.events() {
            self.ledger.emit(event);
        }
        tracing::info!(
            market_id = market_id.0,
            inputs = req.inputs.len(),
            outputs = req.outputs.len(),
            tag = %req.tag,
            "commitments settled"
        );
        Ok(navs)
    }

    // -----------------------------------------------------------------------
    // Orders
    // -----------------------------------------------------------------------

    /// Place a new order and hold its funds.
    ///
    /// Validates, collects the creation fee, reserves the id, stores the
    /// order, then places the hold. A rejected order reserves no id.
    ///
    /// # Errors
    /// Market, eligibility, and fee problems are reported together.
    pub fn place_order(&mut self, details: OrderDetails, creation_fee: Option<Coin>) -> Result<OrderId> {
        let order = Order::new(self.ledger.peek_next_order_id()?, details);
        order.validate()?;
        let market_id = order.market_id();
        let kind = order.kind();
        let attr_kind = match kind {
            OrderKind::Ask => AttrKind::CreateAsk,
            OrderKind::Bid => AttrKind::CreateBid,
        };
        self.ledger.validate_market_exists(market_id)?;

        let mut errs = Vec::new();
        if !self.ledger.is_accepting_orders(market_id) {
            errs.push(DexError::MarketNotAcceptingOrders(market_id));
        }
        if let Err(err) = self.require_eligible(order.owner(), market_id, attr_kind) {
            errs.push(err);
        }
        if let Err(err) = self.ledger.validate_creation_fee(market_id, attr_kind, creation_fee.as_ref()) {
            errs.push(err);
        }
        if let Err(err) = self.ledger.validate_order_fees(
            market_id,
            kind,
            order.price(),
            &order.settlement_fees(),
            self.config.ratio_policy,
        ) {
            errs.push(err);
        }
        DexError::join_result(errs)?;

        custody::collect_fee(
            &self.ledger,
            self.services.bank(),
            &self.config.fee_collector,
            market_id,
            order.owner(),
            &Coins::from(creation_fee),
        )?;
        let order_id = self.ledger.next_order_id()?;
        if order_id != order.id {
            return Err(DexError::Internal(format!(
                "reserved order id {order_id} does not match validated order {}",
                order.id
            )));
        }
        self.ledger.set_order(&order)?;
        custody::place_hold_on_order(self.services.holds(), &order)?;
        self.ledger.emit(ExchangeEvent::OrderCreated {
            order_id,
            kind,
            market_id,
            external_id: order.external_id().map(str::to_string),
        });
        tracing::debug!(order_id = order_id.0, market_id = market_id.0, %kind, "order placed");
        Ok(order_id)
    }

    /// Cancel an order. Only its owner or the authority may.
    pub fn cancel_order(&mut self, order_id: OrderId, signer: &AccountId) -> Result<()> {
        let order = self.ledger.get_order(order_id)?.ok_or(DexError::OrderNotFound(order_id))?;
        if order.owner() != signer && self.services.authority().validate_authority(signer).is_err() {
            return Err(DexError::NotOrderOwner {
                order_id,
                signer: signer.clone(),
            });
        }
        self.cancel_loaded(&order, signer)
    }

    fn cancel_loaded(&mut self, order: &Order, cancelled_by: &AccountId) -> Result<()> {
        custody::release_hold_on_order(self.services.holds(), order, &order.hold_amount()?)?;
        self.ledger.delete_order(order.id)?;
        self.ledger.emit(ExchangeEvent::OrderCancelled {
            order_id: order.id,
            cancelled_by: cancelled_by.clone(),
            market_id: order.market_id(),
            external_id: order.external_id().map(str::to_string),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commitments
    // -----------------------------------------------------------------------

    /// Commit funds to a market, paying its commitment creation fee first.
    pub fn add_commitment(
        &mut self,
        account: &AccountId,
        market_id: MarketId,
        amount: &Coins,
        creation_fee: Option<&Coin>,
        tag: &str,
    ) -> Result<()> {
        self.ledger.validate_market_exists(market_id)?;
        let mut errs = Vec::new();
        if !self.ledger.is_accepting_commitments(market_id) {
            errs.push(DexError::MarketNotAcceptingCommitments(market_id));
        }
        if let Err(err) = self.require_eligible(account, market_id, AttrKind::CreateCommitment) {
            errs.push(err);
        }
        if let Err(err) = self
            .ledger
            .validate_creation_fee(market_id, AttrKind::CreateCommitment, creation_fee)
        {
            errs.push(err);
        }
        DexError::join_result(errs)?;

        custody::collect_fee(
            &self.ledger,
            self.services.bank(),
            &self.config.fee_collector,
            market_id,
            account,
            &Coins::from(creation_fee.cloned()),
        )?;
        self.ledger
            .add_commitment(self.services.holds(), market_id, account, amount, tag)
    }

    /// Release an account's own commitment. A zero `amount` releases all.
    pub fn release_commitment(&mut self, account: &AccountId, market_id: MarketId, amount: &Coins, tag: &str) -> Result<()> {
        self.ledger
            .release_commitment(self.services.holds(), market_id, account, amount, tag)
    }

    /// Release several accounts' commitments on the authority's instruction.
    pub fn release_commitments(
        &mut self,
        signer: &AccountId,
        market_id: MarketId,
        entries: &[AccountAmount],
        tag: &str,
    ) -> Result<()> {
        self.require_authority(signer)?;
        self.ledger.validate_market_exists(market_id)?;
        self.ledger
            .release_commitments(self.services.holds(), market_id, entries, tag)
    }

    // -----------------------------------------------------------------------
    // Markets and params
    // -----------------------------------------------------------------------

    pub fn create_market(&mut self, signer: &AccountId, config: &MarketConfig) -> Result<()> {
        self.require_authority(signer)?;
        config.validate()?;
        if self.ledger.market_exists(config.market_id) {
            return Err(DexError::MarketExists(config.market_id));
        }
        self.ledger.store_market(config);
        self.ledger.emit(ExchangeEvent::MarketCreated {
            market_id: config.market_id,
        });
        tracing::info!(market_id = config.market_id.0, "market created");
        Ok(())
    }

    /// Replace a market's fee tables.
    pub fn update_fees(&mut self, signer: &AccountId, market_id: MarketId, fees: &MarketFees) -> Result<()> {
        self.require_authority(signer)?;
        self.ledger.validate_market_exists(market_id)?;
        fees.validate()?;
        self.ledger.set_market_fees(market_id, fees);
        self.ledger.emit(ExchangeEvent::MarketFeesUpdated { market_id });
        Ok(())
    }

    /// Replace the exchange split params; `None` clears them.
    pub fn set_params(&mut self, signer: &AccountId, params: Option<&Params>) -> Result<()> {
        self.require_authority(signer)?;
        if let Some(params) = params {
            params.validate()?;
        }
        self.ledger.set_params(params);
        self.ledger.emit(ExchangeEvent::ParamsUpdated);
        Ok(())
    }

    /// Close a market: stop new orders, user settlement, and commitments,
    /// then release every commitment and cancel every order.
    ///
    /// Only authority and existence failures are returned; cleanup failures
    /// are logged and counted.
    pub fn close_market(&mut self, signer: &AccountId, market_id: MarketId) -> Result<CloseMarketSummary> {
        self.require_authority(signer)?;
        self.ledger.validate_market_exists(market_id)?;

        self.ledger.set_accepting_orders(market_id, false);
        self.ledger.set_user_settlement_allowed(market_id, false);
        self.ledger.set_accepting_commitments(market_id, false);
        self.ledger.emit(ExchangeEvent::MarketOrdersDisabled {
            market_id,
            updated_by: signer.clone(),
        });

        let mut summary = CloseMarketSummary::default();
        let (released, result) = self.ledger.release_all_commitments_for_market(
            self.services.holds(),
            market_id,
            self.config.release_batch_size,
            CLOSE_MARKET_TAG,
        );
        summary.commitments_released = released;
        if let Err(err) = result {
            summary.failures += err.flatten().len();
        }

        for order_id in self.ledger.order_ids_for_market(market_id) {
            let cancelled = self
                .ledger
                .get_order(order_id)
                .and_then(|order| order.ok_or(DexError::OrderNotFound(order_id)))
                .and_then(|order| self.cancel_loaded(&order, signer));
            match cancelled {
                Ok(()) => summary.orders_cancelled += 1,
                Err(err) => {
                    tracing::error!(market_id = market_id.0, order_id = order_id.0, error = %err, "could not cancel order");
                    summary.failures += 1;
                }
            }
        }

        tracing::info!(
            market_id = market_id.0,
            commitments_released = summary.commitments_released,
            orders_cancelled = summary.orders_cancelled,
            failures = summary.failures,
            "market closed"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use dexcore_ledger::MemStore;
    use dexcore_types::{AskOrder, BidOrder, FeeRatio};
    use rust_decimal::Decimal;

    use super::*;
    use crate::testing::TestServices;

    fn coin(s: &str) -> Coin {
        s.parse().unwrap()
    }

    fn coins(s: &str) -> Coins {
        s.parse().unwrap()
    }

    fn acct(s: &str) -> AccountId {
        AccountId::from(s)
    }

    fn exchange() -> Exchange<MemStore, TestServices> {
        let mut ex = Exchange::new(Ledger::new(MemStore::new()), TestServices::new("gov"), ModuleConfig::default()).unwrap();
        ex.create_market(&acct("gov"), &MarketConfig::open(MarketId(1))).unwrap();
        ex
    }

    fn ask(seller: &str, assets: &str, price: &str) -> OrderDetails {
        OrderDetails::Ask(AskOrder {
            market_id: MarketId(1),
            seller: acct(seller),
            assets: coin(assets),
            price: coin(price),
            seller_settlement_flat_fee: None,
            allow_partial: false,
            external_id: None,
        })
    }

    fn bid(buyer: &str, assets: &str, price: &str) -> OrderDetails {
        OrderDetails::Bid(BidOrder {
            market_id: MarketId(1),
            buyer: acct(buyer),
            assets: coin(assets),
            price: coin(price),
            buyer_settlement_fees: Coins::new(),
            allow_partial: false,
            external_id: None,
        })
    }

    // =====================================================================
    // Requests
    // =====================================================================

    #[test]
    fn order_ids_must_be_unique_and_nonzero() {
        let err = validate_order_ids("bid", &[OrderId(3), OrderId(0), OrderId(3)]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("bid order id cannot be zero"), "Got: {msg}");
        assert!(msg.contains("duplicate bid order ids provided: 3"), "Got: {msg}");
        assert!(validate_order_ids("ask", &[]).is_err());
    }

    #[test]
    fn settle_orders_rejects_id_on_both_sides() {
        let req = SettleOrdersRequest {
            admin: acct("gov"),
            market_id: MarketId(1),
            ask_order_ids: vec![OrderId(1), OrderId(2)],
            bid_order_ids: vec![OrderId(2)],
            expect_partial: false,
        };
        let err = req.validate().unwrap_err();
        assert!(err.to_string().contains("duplicated as both bid and ask: 2"), "Got: {err}");
    }

    #[test]
    fn commitment_settlement_must_balance() {
        let req = SettleCommitmentsRequest {
            admin: acct("gov"),
            market_id: MarketId(1),
            inputs: vec![AccountAmount::new(acct("a"), coins("5apple"))],
            outputs: vec![AccountAmount::new(acct("b"), coins("4apple"))],
            fees: vec![],
            navs: vec![],
            tag: "t".into(),
        };
        assert!(matches!(req.validate().unwrap_err(), DexError::TransferImbalance { .. }));
    }

    // =====================================================================
    // Orders
    // =====================================================================

    #[test]
    fn place_then_cancel_restores_balance() {
        let mut ex = exchange();
        ex.services_mut().bank.deposit(&acct("bea"), &coins("100plum"));

        let id = ex.place_order(bid("bea", "10apple", "60plum"), None).unwrap();
        assert_eq!(id, OrderId(1));
        assert_eq!(ex.services().bank.held(&acct("bea"), "plum"), Decimal::from(60));

        let err = ex.cancel_order(id, &acct("mallory")).unwrap_err();
        assert!(matches!(err, DexError::NotOrderOwner { .. }));

        ex.cancel_order(id, &acct("bea")).unwrap();
        assert_eq!(ex.services().bank.held(&acct("bea"), "plum"), Decimal::ZERO);
        assert!(ex.ledger().get_order(id).unwrap().is_none());
        let names: Vec<_> = ex.take_events().iter().map(ExchangeEvent::name).collect();
        assert_eq!(names, vec!["market_created", "order_created", "order_cancelled"]);
    }

    #[test]
    fn authority_may_cancel_any_order() {
        let mut ex = exchange();
        ex.services_mut().bank.deposit(&acct("sam"), &coins("10apple"));
        let id = ex.place_order(ask("sam", "10apple", "50plum"), None).unwrap();
        ex.cancel_order(id, &acct("gov")).unwrap();
        assert_eq!(ex.services().bank.available(&acct("sam"), "apple"), Decimal::from(10));
    }

    #[test]
    fn place_order_reports_every_problem() {
        let mut ex = exchange();
        let mut fees = MarketFees::default();
        fees.create_ask_flat = vec![coin("5fig")];
        ex.update_fees(&acct("gov"), MarketId(1), &fees).unwrap();
        let mut config = ex.ledger().market_config(MarketId(1)).unwrap().unwrap();
        config.accepting_orders = false;
        ex.ledger_mut().store_market(&config);

        let err = ex.place_order(ask("sam", "10apple", "50plum"), None).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("is not accepting orders"), "Got: {msg}");
        assert!(msg.contains("no ask order creation fee provided"), "Got: {msg}");
    }

    #[test]
    fn rejected_order_reserves_no_id() {
        let mut ex = exchange();
        ex.ledger_mut()
            .set_required_attributes(MarketId(1), AttrKind::CreateBid, &["kyc.pass".to_string()]);
        assert!(ex.place_order(bid("bea", "10apple", "60plum"), None).is_err());
        assert_eq!(ex.ledger().last_order_id().unwrap(), OrderId(0));

        ex.services_mut().bank.deposit(&acct("sam"), &coins("10apple"));
        let id = ex.place_order(ask("sam", "10apple", "50plum"), None).unwrap();
        assert_eq!(id, OrderId(1));
    }

    #[test]
    fn creation_fee_is_collected_before_the_order_is_stored() {
        let mut ex = exchange();
        let mut fees = MarketFees::default();
        fees.create_ask_flat = vec![coin("5fig")];
        ex.update_fees(&acct("gov"), MarketId(1), &fees).unwrap();
        ex.services_mut().bank.deposit(&acct("sam"), &coins("10apple,5fig"));
        ex.services_mut().bank.fail_transfers();

        let err = ex.place_order(ask("sam", "10apple", "50plum"), Some(coin("5fig"))).unwrap_err();
        assert!(matches!(err, DexError::Collaborator { .. }), "Got: {err}");
        assert_eq!(ex.ledger().last_order_id().unwrap(), OrderId(0));
        assert!(ex.ledger().get_order(OrderId(1)).unwrap().is_none());
        assert_eq!(ex.services().bank.held(&acct("sam"), "apple"), Decimal::ZERO);
    }

    #[test]
    fn ineligible_owner_is_rejected() {
        let mut ex = exchange();
        ex.ledger_mut()
            .set_required_attributes(MarketId(1), AttrKind::CreateBid, &["kyc.pass".to_string()]);
        let err = ex.place_order(bid("bea", "10apple", "60plum"), None).unwrap_err();
        assert!(
            matches!(err, DexError::Ineligible { action: "create bid orders", .. }),
            "Got: {err}"
        );
    }

    // =====================================================================
    // Markets
    // =====================================================================

    #[test]
    fn market_admin_requires_authority() {
        let mut ex = exchange();
        let err = ex.create_market(&acct("bea"), &MarketConfig::open(MarketId(2))).unwrap_err();
        assert!(matches!(err, DexError::Unauthorized { .. }));
        let err = ex.create_market(&acct("gov"), &MarketConfig::open(MarketId(1))).unwrap_err();
        assert!(matches!(err, DexError::MarketExists(MarketId(1))));
        assert!(ex.set_params(&acct("bea"), None).is_err());
    }

    #[test]
    fn update_fees_replaces_tables() {
        let mut ex = exchange();
        let mut fees = MarketFees::default();
        fees.seller_settlement_ratios = vec!["30plum:1plum".parse::<FeeRatio>().unwrap()];
        ex.update_fees(&acct("gov"), MarketId(1), &fees).unwrap();
        assert_eq!(ex.ledger().market_fees(MarketId(1)).unwrap(), fees);
        assert!(ex.update_fees(&acct("gov"), MarketId(9), &fees).is_err());
    }

    #[test]
    fn commitment_requires_open_market() {
        let mut ex = exchange();
        ex.services_mut().bank.deposit(&acct("a"), &coins("50apple"));
        ex.close_market(&acct("gov"), MarketId(1)).unwrap();
        let err = ex
            .add_commitment(&acct("a"), MarketId(1), &coins("5apple"), None, "t")
            .unwrap_err();
        assert!(matches!(err, DexError::MarketNotAcceptingCommitments(MarketId(1))));
    }
}
