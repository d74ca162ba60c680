//! Fund-movement instructions.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{AccountId, Coin, Coins, Result};

/// One side of a multi-party transfer: an account and what it sends or receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountAmount {
    pub account: AccountId,
    pub amount: Coins,
}

impl AccountAmount {
    #[must_use]
    pub fn new(account: AccountId, amount: Coins) -> Self {
        Self { account, amount }
    }
}

/// A balanced set of inputs and outputs executed as one custody call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub inputs: Vec<AccountAmount>,
    pub outputs: Vec<AccountAmount>,
}

/// Sum of every amount in `entries`.
pub fn sum_amounts(entries: &[AccountAmount]) -> Result<Coins> {
    let mut total = Coins::new();
    for entry in entries {
        total = total.checked_add(&entry.amount)?;
    }
    Ok(total)
}

/// Per-account amounts in first-seen order.
///
/// The lookup map is only used to find an account's slot; output order comes
/// from the insertion-ordered vector, so results are replay-stable.
#[derive(Debug, Clone, Default)]
pub struct IndexedAmounts {
    entries: Vec<AccountAmount>,
    index: HashMap<AccountId, usize>,
}

impl IndexedAmounts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, account: &AccountId, coin: &Coin) -> Result<()> {
        self.add_coins(account, &Coins::from(coin.clone()))
    }

    pub fn add_coins(&mut self, account: &AccountId, coins: &Coins) -> Result<()> {
        let slot = match self.index.get(account) {
            Some(slot) => *slot,
            None => {
                self.entries
                    .push(AccountAmount::new(account.clone(), Coins::new()));
                self.index.insert(account.clone(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };
        let entry = &mut self.entries[slot];
        entry.amount = entry.amount.checked_add(coins)?;
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.iter().all(|e| e.amount.is_zero())
    }

    /// Entries with a non-zero amount, in first-seen order.
    #[must_use]
    pub fn into_entries(self) -> Vec<AccountAmount> {
        self.entries
            .into_iter()
            .filter(|e| !e.amount.is_zero())
            .collect()
    }

    pub fn total(&self) -> Result<Coins> {
        sum_amounts(&self.entries)
    }
}
