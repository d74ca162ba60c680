//! Transfer conservation checks.
//!
//! Invariant enforced on every transfer before it reaches custody:
//! ```text
//! ∀ denom: Σ(inputs) == Σ(outputs)
//! ```
//!
//! [`FlowTracker`] extends the same invariant over a whole plan so tests and
//! the engine can confirm that a settlement only moves funds around.

use std::collections::BTreeMap;

use dexcore_types::{sum_amounts, AccountAmount, AccountId, Coins, DexError, Result, Transfer};
use rust_decimal::Decimal;

/// Fail unless `inputs` and `outputs` sum to the same coins.
///
/// # Errors
/// Returns [`DexError::TransferImbalance`] naming both totals.
pub fn check_balanced(inputs: &[AccountAmount], outputs: &[AccountAmount]) -> Result<()> {
    let total_in = sum_amounts(inputs)?;
    let total_out = sum_amounts(outputs)?;
    if total_in != total_out {
        return Err(DexError::TransferImbalance {
            inputs: total_in,
            outputs: total_out,
        });
    }
    Ok(())
}

pub fn check_transfer(transfer: &Transfer) -> Result<()> {
    check_balanced(&transfer.inputs, &transfer.outputs)
}

/// Net per-(account, denom) flows across a batch of transfers.
///
/// Every transfer is balanced on its own, so the net flows of all accounts
/// must sum to zero in every denom.
#[derive(Debug, Clone, Default)]
pub struct FlowTracker {
    net: BTreeMap<(AccountId, String), Decimal>,
}

impl FlowTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transfer after checking it is balanced.
    pub fn record(&mut self, transfer: &Transfer) -> Result<()> {
        check_transfer(transfer)?;
        for input in &transfer.inputs {
            self.shift(&input.account, &input.amount, false)?;
        }
        for output in &transfer.outputs {
            self.shift(&output.account, &output.amount, true)?;
        }
        Ok(())
    }

    fn shift(&mut self, account: &AccountId, amount: &Coins, credit: bool) -> Result<()> {
        for coin in amount.iter() {
            let slot = self
                .net
                .entry((account.clone(), coin.denom.clone()))
                .or_insert(Decimal::ZERO);
            let next = if credit {
                slot.checked_add(coin.amount)
            } else {
                slot.checked_sub(coin.amount)
            };
            *slot = next.ok_or_else(|| DexError::overflow(format!("net flow of {coin} for {account}")))?;
        }
        Ok(())
    }

    /// Net change of one account's balance in `denom`.
    #[must_use]
    pub fn net(&self, account: &AccountId, denom: &str) -> Decimal {
        self.net
            .get(&(account.clone(), denom.to_string()))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Verify that nothing was created or destroyed.
    pub fn verify(&self) -> Result<()> {
        let mut per_denom: BTreeMap<&str, Decimal> = BTreeMap::new();
        for ((_, denom), amount) in &self.net {
            *per_denom.entry(denom.as_str()).or_insert(Decimal::ZERO) += *amount;
        }
        for (denom, total) in per_denom {
            if !total.is_zero() {
                return Err(DexError::Internal(format!(
                    "settlement flows of {denom} do not net to zero: {total}"
                )));
            }
        }
        Ok(())
    }
}
