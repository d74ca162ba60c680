//! Settlement plans.
//!
//! A [`SettlementPlan`] is everything a settlement will do, computed before
//! any collaborator is called: which orders are filled and for what, the
//! one order left partially filled (if any), the transfers that move assets
//! and price, and the fees each party pays.
//!
//! ## Administrative matching
//!
//! [`build_settlement`] pairs asks and bids greedily, in the order given:
//! ```text
//! amount = min(ask assets left, bid assets left)
//! price  = bid price                            if amount == bid assets
//!          floor(bid price × amount / bid assets) otherwise
//! ```
//! Truncation leaves a bid paying slightly less than its price; the
//! difference is spread over the asks that filled it, weighted by assets.
//! Asks must end up with at least their own price for what they sold.

use std::collections::BTreeSet;

use dexcore_types::coin::{mul_div_ceil, mul_div_floor};
use dexcore_types::{
    AccountAmount, AccountId, Coin, Coins, DexError, ExchangeEvent, IndexedAmounts, MarketId, Order, OrderKind, Result,
    Transfer,
};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::conservation::FlowTracker;

// ---------------------------------------------------------------------------
// Plan types
// ---------------------------------------------------------------------------

/// An order together with what it realized in a settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilledOrder {
    /// The order as stored before the settlement.
    pub order: Order,
    pub assets: Coin,
    pub price: Coin,
    pub fees: Coins,
}

impl FilledOrder {
    /// A complete fill of `order` at `price`.
    #[must_use]
    pub fn new(order: Order, price: Coin, fees: Coins) -> Self {
        let assets = order.assets().clone();
        Self {
            order,
            assets,
            price,
            fees,
        }
    }

    fn event(&self, partial: bool) -> ExchangeEvent {
        let order_id = self.order.id;
        let market_id = self.order.market_id();
        let external_id = self.order.external_id().map(str::to_string);
        let (assets, price, fees) = (self.assets.clone(), self.price.clone(), self.fees.clone());
        if partial {
            ExchangeEvent::OrderPartiallyFilled {
                order_id,
                assets,
                price,
                fees,
                market_id,
                external_id,
            }
        } else {
            ExchangeEvent::OrderFilled {
                order_id,
                assets,
                price,
                fees,
                market_id,
                external_id,
            }
        }
    }
}

/// The one order a settlement may leave open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialFill {
    /// The filled portion.
    pub filled: FilledOrder,
    /// What stays on the book, under the same id.
    pub remainder: Order,
}

impl PartialFill {
    /// Hold to release: the original hold minus what the remainder keeps.
    pub fn hold_to_release(&self) -> Result<Coins> {
        let original = self.filled.order.hold_amount()?;
        let kept = self.remainder.hold_amount()?;
        original.checked_sub(&kept).ok_or_else(|| {
            DexError::Internal(format!(
                "remainder of order {} holds {kept}, more than the original {original}",
                self.remainder.id
            ))
        })
    }
}

/// Everything a settlement will do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPlan {
    pub market_id: MarketId,
    pub fully_filled: Vec<FilledOrder>,
    pub partial: Option<PartialFill>,
    /// Asset and price legs, executed in order.
    pub transfers: Vec<Transfer>,
    /// Settlement fees per payer, collected together.
    pub fee_inputs: Vec<AccountAmount>,
    /// Creation fee of a user fill's implied order, collected last.
    pub creation_fee: Option<AccountAmount>,
}

impl SettlementPlan {
    /// Every fill, full ones first.
    pub fn filled_orders(&self) -> impl Iterator<Item = &FilledOrder> {
        self.fully_filled
            .iter()
            .chain(self.partial.as_ref().map(|p| &p.filled))
    }

    /// Every hold to release before funds move, with its amount.
    pub fn holds_to_release(&self) -> Result<Vec<(&Order, Coins)>> {
        let mut rv = Vec::with_capacity(self.fully_filled.len() + 1);
        for filled in &self.fully_filled {
            rv.push((&filled.order, filled.order.hold_amount()?));
        }
        if let Some(partial) = &self.partial {
            rv.push((&partial.filled.order, partial.hold_to_release()?));
        }
        Ok(rv)
    }

    /// Fill events: one per full fill, then the partial fill.
    #[must_use]
    pub fn events(&self) -> Vec<ExchangeEvent> {
        let mut rv: Vec<ExchangeEvent> = self.fully_filled.iter().map(|f| f.event(false)).collect();
        if let Some(partial) = &self.partial {
            rv.push(partial.filled.event(true));
        }
        rv
    }

    /// Check every transfer balances and the plan as a whole only moves funds.
    pub fn validate(&self) -> Result<()> {
        let mut flows = FlowTracker::new();
        for transfer in &self.transfers {
            flows.record(transfer)?;
        }
        flows.verify()
    }

    /// Hex SHA-256 over the plan's canonical encoding.
    ///
    /// Two replays of the same settlement produce the same digest.
    #[must_use]
    pub fn digest(&self) -> String {
        fn amounts(hasher: &mut Sha256, tag: &[u8], entries: &[AccountAmount]) {
            hasher.update(tag);
            hasher.update((entries.len() as u64).to_be_bytes());
            for entry in entries {
                let account = entry.account.as_bytes();
                hasher.update((account.len() as u64).to_be_bytes());
                hasher.update(account);
                let amount = entry.amount.to_string();
                hasher.update((amount.len() as u64).to_be_bytes());
                hasher.update(amount.as_bytes());
            }
        }

        let mut hasher = Sha256::new();
        hasher.update(b"dexcore:settlement:v1:");
        hasher.update(self.market_id.to_be_bytes());
        hasher.update((self.fully_filled.len() as u64).to_be_bytes());
        for filled in &self.fully_filled {
            hasher.update(filled.order.id.to_be_bytes());
        }
        match &self.partial {
            Some(partial) => {
                hasher.update([1u8]);
                hasher.update(partial.remainder.id.to_be_bytes());
                hasher.update(partial.remainder.assets().to_string().as_bytes());
            }
            None => hasher.update([0u8]),
        }
        for transfer in &self.transfers {
            amounts(&mut hasher, b"in", &transfer.inputs);
            amounts(&mut hasher, b"out", &transfer.outputs);
        }
        amounts(&mut hasher, b"fees", &self.fee_inputs);
        amounts(&mut hasher, b"create", self.creation_fee.as_slice());
        hex::encode(hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// User fills
// ---------------------------------------------------------------------------

/// A seller filling bids with their own assets.
///
/// `seller_fee` is everything the seller pays: the ratio fees of every bid
/// plus any flat fee.
pub fn fill_bids_plan(
    market_id: MarketId,
    seller: &AccountId,
    bids: Vec<Order>,
    seller_fee: &Coins,
    creation_fee: Option<&Coin>,
) -> Result<SettlementPlan> {
    let mut asset_outputs = IndexedAmounts::new();
    let mut price_inputs = IndexedAmounts::new();
    let mut fee_inputs = IndexedAmounts::new();
    let mut total_assets = Coins::new();
    let mut total_price = Coins::new();
    let mut fully_filled = Vec::with_capacity(bids.len());

    for order in bids {
        let Some(bid) = order.as_bid() else {
            return Err(wrong_kind(&order, OrderKind::Bid));
        };
        asset_outputs.add(&bid.buyer, &bid.assets)?;
        price_inputs.add(&bid.buyer, &bid.price)?;
        fee_inputs.add_coins(&bid.buyer, &bid.buyer_settlement_fees)?;
        total_assets.add_coin(&bid.assets)?;
        total_price.add_coin(&bid.price)?;
        let (price, fees) = (bid.price.clone(), bid.buyer_settlement_fees.clone());
        fully_filled.push(FilledOrder::new(order, price, fees));
    }
    fee_inputs.add_coins(seller, seller_fee)?;

    let plan = SettlementPlan {
        market_id,
        fully_filled,
        partial: None,
        transfers: vec![
            Transfer {
                inputs: vec![AccountAmount::new(seller.clone(), total_assets)],
                outputs: asset_outputs.into_entries(),
            },
            Transfer {
                inputs: price_inputs.into_entries(),
                outputs: vec![AccountAmount::new(seller.clone(), total_price)],
            },
        ],
        fee_inputs: fee_inputs.into_entries(),
        creation_fee: creation_fee.map(|fee| AccountAmount::new(seller.clone(), Coins::from(fee.clone()))),
    };
    plan.validate()?;
    Ok(plan)
}

/// A buyer filling asks with their own funds.
///
/// Each ask comes with what its seller pays (flat plus ratio fee).
pub fn fill_asks_plan(
    market_id: MarketId,
    buyer: &AccountId,
    asks: Vec<(Order, Coins)>,
    buyer_fees: &Coins,
    creation_fee: Option<&Coin>,
) -> Result<SettlementPlan> {
    let mut asset_inputs = IndexedAmounts::new();
    let mut price_outputs = IndexedAmounts::new();
    let mut fee_inputs = IndexedAmounts::new();
    let mut total_assets = Coins::new();
    let mut total_price = Coins::new();
    let mut fully_filled = Vec::with_capacity(asks.len());

    for (order, seller_fee) in asks {
        let Some(ask) = order.as_ask() else {
            return Err(wrong_kind(&order, OrderKind::Ask));
        };
        asset_inputs.add(&ask.seller, &ask.assets)?;
        price_outputs.add(&ask.seller, &ask.price)?;
        fee_inputs.add_coins(&ask.seller, &seller_fee)?;
        total_assets.add_coin(&ask.assets)?;
        total_price.add_coin(&ask.price)?;
        let price = ask.price.clone();
        fully_filled.push(FilledOrder::new(order, price, seller_fee));
    }
    fee_inputs.add_coins(buyer, buyer_fees)?;

    let plan = SettlementPlan {
        market_id,
        fully_filled,
        partial: None,
        transfers: vec![
            Transfer {
                inputs: asset_inputs.into_entries(),
                outputs: vec![AccountAmount::new(buyer.clone(), total_assets)],
            },
            Transfer {
                inputs: vec![AccountAmount::new(buyer.clone(), total_price)],
                outputs: price_outputs.into_entries(),
            },
        ],
        fee_inputs: fee_inputs.into_entries(),
        creation_fee: creation_fee.map(|fee| AccountAmount::new(buyer.clone(), Coins::from(fee.clone()))),
    };
    plan.validate()?;
    Ok(plan)
}

fn wrong_kind(order: &Order, expected: OrderKind) -> DexError {
    DexError::WrongOrderKind {
        order_id: order.id,
        actual: order.kind(),
        expected,
    }
}

// ---------------------------------------------------------------------------
// Administrative matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Split {
    /// Index of the counterparty in the other side's list.
    other: usize,
    assets: Decimal,
    price: Decimal,
}

#[derive(Debug, Clone)]
struct Fulfillment {
    order: Order,
    assets_filled: Decimal,
    assets_left: Decimal,
    price_filled: Decimal,
    splits: Vec<Split>,
    /// Price the filled part is worth at the order's own rate.
    target_price: Decimal,
}

impl Fulfillment {
    fn new(order: Order) -> Self {
        let assets_left = order.assets().amount;
        Self {
            order,
            assets_filled: Decimal::ZERO,
            assets_left,
            price_filled: Decimal::ZERO,
            splits: Vec::new(),
            target_price: Decimal::ZERO,
        }
    }

    fn label(&self) -> String {
        format!("{} order {}", self.order.kind(), self.order.id)
    }

    fn apply(&mut self, other: usize, assets: Decimal, price: Decimal) {
        self.assets_left -= assets;
        self.assets_filled += assets;
        self.price_filled += price;
        self.splits.push(Split { other, assets, price });
    }

    fn is_partial(&self) -> bool {
        !self.assets_left.is_zero()
    }

    fn assets_coin(&self, amount: Decimal) -> Coin {
        self.order.assets().with_amount(amount)
    }

    fn price_coin(&self, amount: Decimal) -> Coin {
        self.order.price().with_amount(amount)
    }

    /// Check the fill is acceptable and work out the price it must carry.
    fn finalize_target(&mut self) -> Result<()> {
        let fail = |reason: String| DexError::Fulfillment { reason };
        let assets = self.order.assets().clone();
        let price = self.order.price().clone();

        if self.splits.is_empty() || self.assets_filled.is_zero() {
            return Err(fail(format!("{} not even partially filled", self.label())));
        }
        if self.assets_left.is_sign_negative() {
            return Err(fail(format!(
                "{} having assets {assets} cannot be filled with {}: overfill",
                self.label(),
                self.assets_coin(self.assets_filled)
            )));
        }
        if !self.is_partial() {
            self.target_price = price.amount;
            return Ok(());
        }
        if !self.order.allow_partial() {
            return Err(fail(format!(
                "{} having assets {assets} cannot be partially filled with {}: order does not allow partial fulfillment",
                self.label(),
                self.assets_coin(self.assets_filled)
            )));
        }
        let (target, remainder) = mul_div_floor(price.amount, self.assets_filled, assets.amount)?;
        if !remainder.is_zero() {
            return Err(fail(format!(
                "{} having assets {assets} cannot be partially filled by {}: price {price} is not evenly divisible",
                self.label(),
                self.assets_coin(self.assets_filled)
            )));
        }
        self.target_price = target;
        Ok(())
    }

    /// Fees for the filled part, and what the remainder keeps.
    ///
    /// A partial fill pays its share of each fee rounded up.
    fn split_fees(&self, fees: &Coins) -> Result<(Coins, Coins)> {
        if !self.is_partial() {
            return Ok((fees.clone(), Coins::new()));
        }
        let total_assets = self.order.assets().amount;
        let mut filled = Coins::new();
        let mut left = Coins::new();
        for fee in fees.iter() {
            let share = mul_div_ceil(fee.amount, self.assets_filled, total_assets)?;
            filled.add_coin(&fee.with_amount(share))?;
            left.add_coin(&fee.with_amount(fee.amount - share))?;
        }
        Ok((filled, left))
    }
}

/// Pair `asks` with `bids` and plan the result.
///
/// `seller_ratio_fee` gives the seller ratio fee owed on a price, `None`
/// when the market charges none.
///
/// # Errors
/// - [`DexError::InvalidOrderIds`] if either side is empty
/// - [`DexError::Fulfillment`] if the orders cannot all be filled, with
///   every reason found
pub fn build_settlement(
    market_id: MarketId,
    asks: Vec<Order>,
    bids: Vec<Order>,
    seller_ratio_fee: impl Fn(&Coin) -> Result<Option<Coin>>,
) -> Result<SettlementPlan> {
    if asks.is_empty() || bids.is_empty() {
        return Err(DexError::InvalidOrderIds {
            reason: "settlement needs at least one ask and one bid".into(),
        });
    }
    check_single_pair(&asks, &bids)?;
    for order in &asks {
        if order.as_ask().is_none() {
            return Err(wrong_kind(order, OrderKind::Ask));
        }
    }
    for order in &bids {
        if order.as_bid().is_none() {
            return Err(wrong_kind(order, OrderKind::Bid));
        }
    }

    let mut asks: Vec<Fulfillment> = asks.into_iter().map(Fulfillment::new).collect();
    let mut bids: Vec<Fulfillment> = bids.into_iter().map(Fulfillment::new).collect();

    let (mut a, mut b) = (0, 0);
    while a < asks.len() && b < bids.len() {
        let amount = asks[a].assets_left.min(bids[b].assets_left);
        let bid_assets = bids[b].order.assets().amount;
        let bid_price = bids[b].order.price().amount;
        let price = if amount == bid_assets {
            bid_price
        } else {
            mul_div_floor(bid_price, amount, bid_assets)?.0
        };
        asks[a].apply(b, amount, price);
        bids[b].apply(a, amount, price);
        if asks[a].assets_left.is_zero() {
            a += 1;
        }
        if bids[b].assets_left.is_zero() {
            b += 1;
        }
    }

    let mut errs = Vec::new();
    for f in asks.iter_mut().chain(bids.iter_mut()) {
        if let Err(err) = f.finalize_target() {
            errs.push(err);
        }
    }
    DexError::join_result(errs)?;

    for bid_index in 0..bids.len() {
        distribute_bid_leftover(&mut asks, &mut bids, bid_index)?;
    }

    let mut errs = Vec::new();
    for ask in &asks {
        if ask.price_filled < ask.target_price {
            errs.push(DexError::Fulfillment {
                reason: format!(
                    "{} having assets {} at price {} cannot be filled for {}: insufficient price",
                    ask.label(),
                    ask.assets_coin(ask.assets_filled),
                    ask.price_coin(ask.target_price),
                    ask.price_coin(ask.price_filled)
                ),
            });
        }
    }
    let partials: Vec<&Fulfillment> = asks.iter().chain(bids.iter()).filter(|f| f.is_partial()).collect();
    if partials.len() > 1 {
        let labels: Vec<String> = partials.iter().map(|f| f.label()).collect();
        errs.push(DexError::Fulfillment {
            reason: format!("settlement would leave more than one order partially filled: {}", labels.join(", ")),
        });
    }
    DexError::join_result(errs)?;

    assemble(market_id, &asks, &bids, &seller_ratio_fee)
}

/// All asks must share one assets denom and one price denom, and bids must match.
fn check_single_pair(asks: &[Order], bids: &[Order]) -> Result<()> {
    let assets: BTreeSet<&str> = asks.iter().chain(bids).map(|o| o.assets().denom.as_str()).collect();
    let prices: BTreeSet<&str> = asks.iter().chain(bids).map(|o| o.price().denom.as_str()).collect();
    let fail = |what: &str, denoms: &BTreeSet<&str>| DexError::Fulfillment {
        reason: format!(
            "cannot settle orders with different {what} denoms: {}",
            denoms.iter().copied().collect::<Vec<_>>().join(", ")
        ),
    };
    let mut errs = Vec::new();
    if assets.len() > 1 {
        errs.push(fail("assets", &assets));
    }
    if prices.len() > 1 {
        errs.push(fail("price", &prices));
    }
    DexError::join_result(errs)
}

/// Spread a bid's truncation leftover over the asks that filled it.
///
/// Each ask gets its asset-weighted share; if every share rounds to zero
/// the leftover goes out one unit at a time in split order.
fn distribute_bid_leftover(asks: &mut [Fulfillment], bids: &mut [Fulfillment], bid_index: usize) -> Result<()> {
    let bid = &bids[bid_index];
    let to_distribute = bid.target_price - bid.price_filled;
    if to_distribute < Decimal::ZERO {
        return Err(DexError::Fulfillment {
            reason: format!(
                "{} having price {} cannot pay {} for {}: overfill",
                bid.label(),
                bid.order.price(),
                bid.price_coin(bid.price_filled),
                bid.assets_coin(bid.assets_filled)
            ),
        });
    }

    let assets_filled = bid.assets_filled;
    let mut left = to_distribute;
    let mut min_one = false;
    while left > Decimal::ZERO {
        for split_index in 0..bids[bid_index].splits.len() {
            let split_assets = bids[bid_index].splits[split_index].assets;
            let mut amount = mul_div_floor(to_distribute, split_assets, assets_filled)?.0;
            if amount.is_zero() {
                if !min_one {
                    continue;
                }
                amount = Decimal::ONE;
            }
            amount = amount.min(left);

            let bid = &mut bids[bid_index];
            bid.price_filled += amount;
            bid.splits[split_index].price += amount;
            let ask = &mut asks[bid.splits[split_index].other];
            ask.price_filled += amount;
            if let Some(split) = ask.splits.iter_mut().find(|s| s.other == bid_index) {
                split.price += amount;
            }

            left -= amount;
            if left <= Decimal::ZERO {
                break;
            }
        }
        min_one = true;
    }
    Ok(())
}

/// Turn finalized fulfillments into a plan.
fn assemble(
    market_id: MarketId,
    asks: &[Fulfillment],
    bids: &[Fulfillment],
    seller_ratio_fee: &impl Fn(&Coin) -> Result<Option<Coin>>,
) -> Result<SettlementPlan> {
    let mut fully_filled = Vec::new();
    let mut partial = None;
    let mut transfers = Vec::with_capacity(asks.len() * 2);
    let mut fee_inputs = IndexedAmounts::new();

    for ask in asks {
        let order = &ask.order;
        let (flat_filled, flat_left) = ask.split_fees(&order.settlement_fees())?;
        let price_filled = ask.price_coin(ask.price_filled);
        let mut fees = flat_filled;
        if let Some(ratio_fee) = seller_ratio_fee(&price_filled)? {
            fees.add_coin(&ratio_fee)?;
        }
        fee_inputs.add_coins(order.owner(), &fees)?;

        let mut asset_outputs = IndexedAmounts::new();
        let mut price_inputs = IndexedAmounts::new();
        for split in &ask.splits {
            let buyer = bids[split.other].order.owner();
            asset_outputs.add(buyer, &ask.assets_coin(split.assets))?;
            price_inputs.add(buyer, &ask.price_coin(split.price))?;
        }
        transfers.push(Transfer {
            inputs: vec![AccountAmount::new(
                order.owner().clone(),
                Coins::from(ask.assets_coin(ask.assets_filled)),
            )],
            outputs: asset_outputs.into_entries(),
        });
        transfers.push(Transfer {
            inputs: price_inputs.into_entries(),
            outputs: vec![AccountAmount::new(order.owner().clone(), Coins::from(price_filled.clone()))],
        });

        let filled = FilledOrder {
            order: order.clone(),
            assets: ask.assets_coin(ask.assets_filled),
            price: price_filled,
            fees,
        };
        if ask.is_partial() {
            let remainder = order.with_amounts(ask.assets_left, order.price().amount - ask.target_price, &flat_left);
            partial = Some(PartialFill { filled, remainder });
        } else {
            fully_filled.push(filled);
        }
    }

    for bid in bids {
        let order = &bid.order;
        let (fees, fees_left) = bid.split_fees(&order.settlement_fees())?;
        fee_inputs.add_coins(order.owner(), &fees)?;
        let filled = FilledOrder {
            order: order.clone(),
            assets: bid.assets_coin(bid.assets_filled),
            price: bid.price_coin(bid.price_filled),
            fees,
        };
        if bid.is_partial() {
            let remainder = order.with_amounts(bid.assets_left, order.price().amount - bid.target_price, &fees_left);
            partial = Some(PartialFill { filled, remainder });
        } else {
            fully_filled.push(filled);
        }
    }

    let plan = SettlementPlan {
        market_id,
        fully_filled,
        partial,
        transfers,
        fee_inputs: fee_inputs.into_entries(),
        creation_fee: None,
    };
    plan.validate()?;
    tracing::debug!(
        market_id = market_id.0,
        filled = plan.fully_filled.len(),
        partial = plan.partial.as_ref().map(|p| p.remainder.id.0),
        transfers = plan.transfers.len(),
        "settlement plan built"
    );
    Ok(plan)
}
