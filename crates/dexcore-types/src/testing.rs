//! In-memory collaborators for tests.
//!
//! [`MemBank`] plays both escrow and custody with available/held accounting:
//! holds move funds from available to held, and only available funds can be
//! transferred. Every call is logged so tests can assert on what the core
//! asked for.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rand::Rng;
use rust_decimal::Decimal;

use crate::{
    sum_amounts, AccountAmount, AccountId, AttributeKeeper, AuthorityKeeper, BankKeeper,
    BlockInfo, Coin, Coins, HoldKeeper, NavRecorder, NetAssetValue, ServiceError, ServiceResult,
    Transfer,
};

/// Balance of one (account, denom) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceEntry {
    pub available: Decimal,
    pub held: Decimal,
}

impl BalanceEntry {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.available + self.held
    }
}

/// Escrow + custody fake.
#[derive(Debug, Clone, Default)]
pub struct MemBank {
    balances: HashMap<(AccountId, String), BalanceEntry>,
    /// Every hold placed: account, amount, reason.
    pub holds_placed: Vec<(AccountId, Coins, String)>,
    /// Every hold released: account, amount.
    pub holds_released: Vec<(AccountId, Coins)>,
    /// Every successful transfer, module transfers included.
    pub transfers: Vec<Transfer>,
    fail_release_for: BTreeSet<AccountId>,
    fail_transfers: bool,
}

impl MemBank {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&mut self, account: &AccountId, coins: &Coins) {
        for coin in coins.iter() {
            self.entry(account, &coin.denom).available += coin.amount;
        }
    }

    #[must_use]
    pub fn balance(&self, account: &AccountId, denom: &str) -> BalanceEntry {
        self.balances
            .get(&(account.clone(), denom.to_string()))
            .copied()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn available(&self, account: &AccountId, denom: &str) -> Decimal {
        self.balance(account, denom).available
    }

    #[must_use]
    pub fn held(&self, account: &AccountId, denom: &str) -> Decimal {
        self.balance(account, denom).held
    }

    /// Sum of every account's balance of `denom`.
    #[must_use]
    pub fn total_supply(&self, denom: &str) -> Decimal {
        self.balances
            .iter()
            .filter(|((_, d), _)| d == denom)
            .map(|(_, entry)| entry.total())
            .sum()
    }

    /// Make every future hold release for `account` fail.
    pub fn fail_release_for(&mut self, account: &AccountId) {
        self.fail_release_for.insert(account.clone());
    }

    /// Make every future transfer fail.
    pub fn fail_transfers(&mut self) {
        self.fail_transfers = true;
    }

    fn entry(&mut self, account: &AccountId, denom: &str) -> &mut BalanceEntry {
        self.balances
            .entry((account.clone(), denom.to_string()))
            .or_default()
    }

    fn check_available(&self, account: &AccountId, amount: &Coins) -> ServiceResult<()> {
        for coin in amount.iter() {
            let have = self.available(account, &coin.denom);
            if have < coin.amount {
                return Err(ServiceError::new(format!(
                    "{account}: spendable balance {have}{} is smaller than {coin}",
                    coin.denom
                )));
            }
        }
        Ok(())
    }

    fn debit(&mut self, account: &AccountId, amount: &Coins) {
        for coin in amount.iter() {
            self.entry(account, &coin.denom).available -= coin.amount;
        }
    }

    fn credit(&mut self, account: &AccountId, amount: &Coins) {
        for coin in amount.iter() {
            self.entry(account, &coin.denom).available += coin.amount;
        }
    }
}

impl HoldKeeper for MemBank {
    fn place_hold(&mut self, account: &AccountId, amount: &Coins, reason: &str) -> ServiceResult<()> {
        self.check_available(account, amount)?;
        for coin in amount.iter() {
            let entry = self.entry(account, &coin.denom);
            entry.available -= coin.amount;
            entry.held += coin.amount;
        }
        self.holds_placed
            .push((account.clone(), amount.clone(), reason.to_string()));
        Ok(())
    }

    fn release_hold(&mut self, account: &AccountId, amount: &Coins) -> ServiceResult<()> {
        if self.fail_release_for.contains(account) {
            return Err(ServiceError::new(format!("injected release failure for {account}")));
        }
        for coin in amount.iter() {
            let held = self.held(account, &coin.denom);
            if held < coin.amount {
                return Err(ServiceError::new(format!(
                    "cannot release {coin} from {account}: only {held}{} on hold",
                    coin.denom
                )));
            }
        }
        for coin in amount.iter() {
            let entry = self.entry(account, &coin.denom);
            entry.held -= coin.amount;
            entry.available += coin.amount;
        }
        self.holds_released.push((account.clone(), amount.clone()));
        Ok(())
    }
}

impl BankKeeper for MemBank {
    fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: &Coins) -> ServiceResult<()> {
        self.transfer_many(
            &[AccountAmount::new(from.clone(), amount.clone())],
            &[AccountAmount::new(to.clone(), amount.clone())],
        )
    }

    fn transfer_many(&mut self, inputs: &[AccountAmount], outputs: &[AccountAmount]) -> ServiceResult<()> {
        if self.fail_transfers {
            return Err(ServiceError::new("injected transfer failure"));
        }
        let total_in = sum_amounts(inputs).map_err(|e| ServiceError::new(e.to_string()))?;
        let total_out = sum_amounts(outputs).map_err(|e| ServiceError::new(e.to_string()))?;
        if total_in != total_out {
            return Err(ServiceError::new(format!(
                "sum of inputs {total_in} does not equal sum of outputs {total_out}"
            )));
        }
        for input in inputs {
            self.check_available(&input.account, &input.amount)?;
        }
        for input in inputs {
            self.debit(&input.account, &input.amount);
        }
        for output in outputs {
            self.credit(&output.account, &output.amount);
        }
        self.transfers.push(Transfer {
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
        });
        Ok(())
    }

    fn transfer_to_module(&mut self, from: &AccountId, module: &str, amount: &Coins) -> ServiceResult<()> {
        self.transfer(from, &AccountId::from(module), amount)
    }
}

/// Attribute fake: accounts carry explicit attribute sets.
#[derive(Debug, Clone, Default)]
pub struct AttributeTable {
    attrs: HashMap<AccountId, BTreeSet<String>>,
}

impl AttributeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&mut self, account: &AccountId, attribute: &str) {
        self.attrs
            .entry(account.clone())
            .or_default()
            .insert(attribute.to_string());
    }
}

impl AttributeKeeper for AttributeTable {
    fn is_eligible(&self, account: &AccountId, required: &[String]) -> bool {
        let held = self.attrs.get(account);
        required
            .iter()
            .all(|attr| held.is_some_and(|set| set.contains(attr)))
    }
}

/// Valuation fake recording every call. Assets in `unknown` behave like
/// denoms without a registered marker: looking them up fails.
#[derive(Debug, Clone, Default)]
pub struct RecordingNavs {
    pub recorded: Vec<(NetAssetValue, String, u64)>,
    pub lookups: Vec<(String, String)>,
    latest: BTreeMap<(String, String), NetAssetValue>,
    unknown: BTreeSet<String>,
}

impl RecordingNavs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_unknown(&mut self, denom: &str) {
        self.unknown.insert(denom.to_string());
    }
}

impl NavRecorder for RecordingNavs {
    fn lookup_value(&mut self, assets_denom: &str, price_denom: &str) -> ServiceResult<Option<NetAssetValue>> {
        self.lookups.push((assets_denom.to_string(), price_denom.to_string()));
        if self.unknown.contains(assets_denom) {
            return Err(ServiceError::new(format!("no marker found for {assets_denom}")));
        }
        Ok(self
            .latest
            .get(&(assets_denom.to_string(), price_denom.to_string()))
            .cloned())
    }

    fn record_value(&mut self, nav: &NetAssetValue, source: &str, block: &BlockInfo) -> ServiceResult<()> {
        self.latest.insert(
            (nav.assets_denom.clone(), nav.price.denom.clone()),
            nav.clone(),
        );
        self.recorded
            .push((nav.clone(), source.to_string(), block.height));
        Ok(())
    }
}

/// Authority fake: exactly one account is the governance authority.
#[derive(Debug, Clone)]
pub struct FixedAuthority {
    pub authority: AccountId,
}

impl FixedAuthority {
    #[must_use]
    pub fn new(authority: &str) -> Self {
        Self {
            authority: AccountId::from(authority),
        }
    }
}

impl AuthorityKeeper for FixedAuthority {
    fn validate_authority(&self, signer: &AccountId) -> ServiceResult<()> {
        if signer == &self.authority {
            Ok(())
        } else {
            Err(ServiceError::new(format!(
                "expected {} got {signer}",
                self.authority
            )))
        }
    }
}

/// Random amounts (`0..=max`) over `denoms`; zero draws are dropped.
pub fn random_coins<R: Rng>(rng: &mut R, denoms: &[&str], max: u32) -> Coins {
    let mut rv = Coins::new();
    for denom in denoms {
        let amount = rng.gen_range(0..=max);
        // Amounts are bounded by `max`, so this cannot overflow.
        let _ = rv.add_coin(&Coin::new(amount, *denom));
    }
    rv
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coins(s: &str) -> Coins {
        s.parse().unwrap()
    }

    #[test]
    fn hold_and_release_move_between_available_and_held() {
        let mut bank = MemBank::new();
        let alice = AccountId::from("alice");
        bank.deposit(&alice, &coins("100apple"));

        bank.place_hold(&alice, &coins("40apple"), "test").unwrap();
        assert_eq!(bank.available(&alice, "apple"), Decimal::from(60));
        assert_eq!(bank.held(&alice, "apple"), Decimal::from(40));

        bank.release_hold(&alice, &coins("15apple")).unwrap();
        assert_eq!(bank.held(&alice, "apple"), Decimal::from(25));
        assert!(bank.release_hold(&alice, &coins("26apple")).is_err());
    }

    #[test]
    fn held_funds_cannot_be_transferred() {
        let mut bank = MemBank::new();
        let (alice, bob) = (AccountId::from("alice"), AccountId::from("bob"));
        bank.deposit(&alice, &coins("10apple"));
        bank.place_hold(&alice, &coins("10apple"), "test").unwrap();
        assert!(bank.transfer(&alice, &bob, &coins("1apple")).is_err());
    }

    #[test]
    fn unbalanced_transfer_rejected() {
        let mut bank = MemBank::new();
        let (alice, bob) = (AccountId::from("alice"), AccountId::from("bob"));
        bank.deposit(&alice, &coins("10apple"));
        let err = bank
            .transfer_many(
                &[AccountAmount::new(alice.clone(), coins("5apple"))],
                &[AccountAmount::new(bob.clone(), coins("4apple"))],
            )
            .unwrap_err();
        assert!(err.message().contains("does not equal"));
        assert_eq!(bank.total_supply("apple"), Decimal::from(10));
    }

    #[test]
    fn eligibility_requires_every_attribute() {
        let mut attrs = AttributeTable::new();
        let alice = AccountId::from("alice");
        attrs.grant(&alice, "kyc.passport");
        assert!(attrs.is_eligible(&alice, &[]));
        assert!(attrs.is_eligible(&alice, &["kyc.passport".into()]));
        assert!(!attrs.is_eligible(&alice, &["kyc.passport".into(), "accredited".into()]));
    }
}
