//! Custody and escrow adapters.
//!
//! Thin wrappers over the hold and bank collaborators that add context to
//! their failures and route fees: a market collects every fee into its own
//! account, then forwards the exchange split to the fee collector module.

use dexcore_ledger::{KvStore, Ledger};
use dexcore_types::constants::HOLD_REASON_PREFIX;
use dexcore_types::{
    sum_amounts, AccountAmount, AccountId, BankKeeper, Coins, DexError, HoldKeeper, MarketId, Order, Result, Transfer,
};

use crate::conservation::check_balanced;

/// Hold reason recorded for an order's funds.
#[must_use]
pub fn order_hold_reason(order: &Order) -> String {
    format!("{HOLD_REASON_PREFIX}: order {}", order.id)
}

pub fn place_hold_on_order(holds: &mut dyn HoldKeeper, order: &Order) -> Result<()> {
    let amount = order.hold_amount()?;
    holds
        .place_hold(order.owner(), &amount, &order_hold_reason(order))
        .map_err(|e| DexError::collaborator(format!("error placing hold for {} order {}", order.kind(), order.id), e))
}

/// Release `amount` of the funds held for `order`.
///
/// Callers pass the full hold amount for a filled or cancelled order and
/// only the filled portion's share for a partial fill.
pub fn release_hold_on_order(holds: &mut dyn HoldKeeper, order: &Order, amount: &Coins) -> Result<()> {
    if amount.is_zero() {
        return Ok(());
    }
    holds
        .release_hold(order.owner(), amount)
        .map_err(|e| DexError::collaborator(format!("error releasing hold for {} order {}", order.kind(), order.id), e))
}

/// Execute one balanced transfer.
///
/// A single input paying a single output goes through the simple transfer
/// call; anything else uses the multi-party call.
pub fn do_transfer(bank: &mut dyn BankKeeper, transfer: &Transfer) -> Result<()> {
    check_balanced(&transfer.inputs, &transfer.outputs)?;
    match (transfer.inputs.as_slice(), transfer.outputs.as_slice()) {
        ([], []) => Ok(()),
        ([input], [output]) => {
            if input.amount.is_zero() {
                return Ok(());
            }
            bank.transfer(&input.account, &output.account, &input.amount)
                .map_err(|e| {
                    DexError::collaborator(
                        format!("error transferring {} from {} to {}", input.amount, input.account, output.account),
                        e,
                    )
                })
        }
        (inputs, outputs) => bank
            .transfer_many(inputs, outputs)
            .map_err(|e| DexError::collaborator("error executing multi-party transfer", e)),
    }
}

/// Forward the exchange's split of a fee the market already holds.
fn forward_exchange_split<S: KvStore>(
    ledger: &Ledger<S>,
    bank: &mut dyn BankKeeper,
    fee_collector: &str,
    market_id: MarketId,
    collected: &Coins,
) -> Result<()> {
    let split = ledger.exchange_split(collected)?;
    if split.is_zero() {
        return Ok(());
    }
    bank.transfer_to_module(&market_id.account(), fee_collector, &split)
        .map_err(|e| {
            DexError::collaborator(
                format!("error collecting exchange fee {split} from market {market_id}"),
                e,
            )
        })
}

/// Collect a fee from one payer into the market account, then forward the
/// exchange split.
pub fn collect_fee<S: KvStore>(
    ledger: &Ledger<S>,
    bank: &mut dyn BankKeeper,
    fee_collector: &str,
    market_id: MarketId,
    payer: &AccountId,
    fee: &Coins,
) -> Result<()> {
    if fee.is_zero() {
        return Ok(());
    }
    bank.transfer(payer, &market_id.account(), fee).map_err(|e| {
        DexError::collaborator(format!("error transferring {fee} from {payer} to market {market_id}"), e)
    })?;
    forward_exchange_split(ledger, bank, fee_collector, market_id, fee)
}

/// Collect fees from several payers in one transfer, then forward the
/// exchange split of the total.
pub fn collect_fees<S: KvStore>(
    ledger: &Ledger<S>,
    bank: &mut dyn BankKeeper,
    fee_collector: &str,
    market_id: MarketId,
    inputs: &[AccountAmount],
) -> Result<()> {
    let total = sum_amounts(inputs)?;
    if total.is_zero() {
        return Ok(());
    }
    let transfer = Transfer {
        inputs: inputs.iter().filter(|i| !i.amount.is_zero()).cloned().collect(),
        outputs: vec![AccountAmount::new(market_id.account(), total.clone())],
    };
    do_transfer(bank, &transfer)?;
    forward_exchange_split(ledger, bank, fee_collector, market_id, &total)
}

#[cfg(test)]
mod tests {
    use dexcore_ledger::MemStore;
    use dexcore_types::testing::MemBank;
    use dexcore_types::{Coin, Params};
    use rust_decimal::Decimal;

    use super::*;

    fn coins(s: &str) -> Coins {
        s.parse().unwrap()
    }

    fn acct(s: &str) -> AccountId {
        AccountId::from(s)
    }

    #[test]
    fn order_hold_round_trip() {
        let mut bank = MemBank::new();
        bank.deposit(&acct("seller"), &coins("20apple"));
        let order = Order::dummy_ask(7, "seller", Coin::new(12, "apple"), Coin::new(60, "plum"));

        place_hold_on_order(&mut bank, &order).unwrap();
        assert_eq!(bank.held(&acct("seller"), "apple"), Decimal::from(12));
        assert_eq!(bank.holds_placed[0].2, "dexcore: order 7");

        release_hold_on_order(&mut bank, &order, &order.hold_amount().unwrap()).unwrap();
        assert_eq!(bank.held(&acct("seller"), "apple"), Decimal::ZERO);
    }

    #[test]
    fn release_failure_names_the_order() {
        let mut bank = MemBank::new();
        let order = Order::dummy_bid(9, "buyer", Coin::new(1, "apple"), Coin::new(5, "plum"));
        let err = release_hold_on_order(&mut bank, &order, &coins("5plum")).unwrap_err();
        assert!(matches!(err, DexError::Collaborator { .. }));
        assert!(err.to_string().contains("bid order 9"), "Got: {err}");
    }

    #[test]
    fn one_to_one_uses_simple_transfer() {
        let mut bank = MemBank::new();
        bank.deposit(&acct("a"), &coins("10apple"));
        let transfer = Transfer {
            inputs: vec![AccountAmount::new(acct("a"), coins("10apple"))],
            outputs: vec![AccountAmount::new(acct("b"), coins("10apple"))],
        };
        do_transfer(&mut bank, &transfer).unwrap();
        assert_eq!(bank.available(&acct("b"), "apple"), Decimal::from(10));
    }

    #[test]
    fn unbalanced_transfer_never_reaches_custody() {
        let mut bank = MemBank::new();
        bank.deposit(&acct("a"), &coins("10apple"));
        let transfer = Transfer {
            inputs: vec![AccountAmount::new(acct("a"), coins("10apple"))],
            outputs: vec![
                AccountAmount::new(acct("b"), coins("4apple")),
                AccountAmount::new(acct("c"), coins("5apple")),
            ],
        };
        assert!(matches!(
            do_transfer(&mut bank, &transfer).unwrap_err(),
            DexError::TransferImbalance { .. }
        ));
        assert!(bank.transfers.is_empty());
    }

    #[test]
    fn collect_fee_forwards_split() {
        let mut ledger = Ledger::new(MemStore::new());
        ledger.set_params(Some(&Params::new(250, vec![])));
        let mut bank = MemBank::new();
        bank.deposit(&acct("payer"), &coins("750plum"));

        collect_fee(&ledger, &mut bank, "fee_collector", MarketId(3), &acct("payer"), &coins("750plum")).unwrap();
        assert_eq!(bank.available(&acct("fee_collector"), "plum"), Decimal::from(19));
        assert_eq!(bank.available(&MarketId(3).account(), "plum"), Decimal::from(731));
    }

    #[test]
    fn collect_fees_pools_payers() {
        let ledger = Ledger::new(MemStore::new());
        let mut bank = MemBank::new();
        bank.deposit(&acct("a"), &coins("60plum"));
        bank.deposit(&acct("b"), &coins("40plum"));
        let inputs = vec![
            AccountAmount::new(acct("a"), coins("60plum")),
            AccountAmount::new(acct("b"), coins("40plum")),
        ];

        collect_fees(&ledger, &mut bank, "fee_collector", MarketId(1), &inputs).unwrap();
        // default split is 500 bps
        assert_eq!(bank.available(&acct("fee_collector"), "plum"), Decimal::from(5));
        assert_eq!(bank.available(&MarketId(1).account(), "plum"), Decimal::from(95));
        assert_eq!(bank.total_supply("plum"), Decimal::from(100));
    }

    #[test]
    fn nothing_to_collect_is_a_no_op() {
        let ledger = Ledger::new(MemStore::new());
        let mut bank = MemBank::new();
        bank.fail_transfers();
        collect_fees(&ledger, &mut bank, "fee_collector", MarketId(1), &[]).unwrap();
        collect_fee(&ledger, &mut bank, "fee_collector", MarketId(1), &acct("x"), &Coins::new()).unwrap();
    }
}
