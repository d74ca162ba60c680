//! Commitment ledger.
//!
//! One record per (market, account): the funds the account has committed to
//! the market, stored as a coins string under `0x63 market account`. A
//! balance is never stored empty and never negative. Every change to a
//! balance goes together with a hold placed or released for the same delta.

use std::ops::ControlFlow;

use dexcore_types::constants::HOLD_REASON_PREFIX;
use dexcore_types::{
    AccountAmount, AccountId, Coins, DexError, ExchangeEvent, HoldKeeper, MarketId, Result,
};

use crate::keys;
use crate::{KvStore, Ledger};

/// Hold reason attached to committed funds.
#[must_use]
pub fn commitment_hold_reason(market_id: MarketId) -> String {
    format!("{HOLD_REASON_PREFIX}: commitment to {market_id}")
}

fn decode_commitment(value: &[u8]) -> Result<Coins> {
    let text = std::str::from_utf8(value).map_err(|e| DexError::CorruptValue {
        entity: "commitment".into(),
        reason: e.to_string(),
    })?;
    text.parse::<Coins>().map_err(|e| DexError::CorruptValue {
        entity: "commitment".into(),
        reason: e.to_string(),
    })
}

impl<S: KvStore> Ledger<S> {
    /// Funds `account` has committed to `market_id`; empty if none.
    pub fn get_commitment_amount(&self, market_id: MarketId, account: &AccountId) -> Result<Coins> {
        match self.store.get(&keys::key_commitment(market_id, account)) {
            Some(value) => decode_commitment(&value),
            None => Ok(Coins::new()),
        }
    }

    /// Overwrite a commitment. A zero amount deletes the record.
    ///
    /// # Errors
    /// [`DexError::NegativeCommitment`] if any denom is negative.
    pub fn set_commitment_amount(&mut self, market_id: MarketId, account: &AccountId, amount: &Coins) -> Result<()> {
        if amount.is_any_negative() {
            return Err(DexError::NegativeCommitment {
                action: "set",
                amount: amount.clone(),
                account: account.clone(),
                market_id,
            });
        }
        let key = keys::key_commitment(market_id, account);
        if amount.is_zero() {
            self.store.delete(&key);
        } else {
            self.store.set(key, amount.to_string().into_bytes());
        }
        Ok(())
    }

    /// Commit more funds: hold `amount` and add it to the balance.
    ///
    /// Market and eligibility checks are the caller's job.
    pub fn add_commitment(
        &mut self,
        holds: &mut dyn HoldKeeper,
        market_id: MarketId,
        account: &AccountId,
        amount: &Coins,
        tag: &str,
    ) -> Result<()> {
        if amount.is_any_negative() {
            return Err(DexError::NegativeCommitment {
                action: "add",
                amount: amount.clone(),
                account: account.clone(),
                market_id,
            });
        }
        if amount.is_zero() {
            return Ok(());
        }

        holds
            .place_hold(account, amount, &commitment_hold_reason(market_id))
            .map_err(|e| DexError::collaborator(format!("error placing hold for commitment of {amount} by {account} to market {market_id}"), e))?;

        let current = self.get_commitment_amount(market_id, account)?;
        let updated = current.checked_add(amount)?;
        self.set_commitment_amount(market_id, account, &updated)?;
        self.emit(ExchangeEvent::FundsCommitted {
            account: account.clone(),
            market_id,
            amount: amount.clone(),
            tag: tag.to_string(),
        });
        Ok(())
    }

    /// Release committed funds. A zero `amount` releases everything.
    ///
    /// # Errors
    /// - [`DexError::NegativeCommitment`] if any denom of `amount` is negative
    /// - [`DexError::NothingCommitted`] if the account has no commitment
    /// - [`DexError::ReleaseExceedsCommitment`] if `amount` is more than committed
    ///   in any denom; the balance is left unchanged
    pub fn release_commitment(
        &mut self,
        holds: &mut dyn HoldKeeper,
        market_id: MarketId,
        account: &AccountId,
        amount: &Coins,
        tag: &str,
    ) -> Result<()> {
        if amount.is_any_negative() {
            return Err(DexError::NegativeCommitment {
                action: "release",
                amount: amount.clone(),
                account: account.clone(),
                market_id,
            });
        }

        let current = self.get_commitment_amount(market_id, account)?;
        if current.is_zero() {
            return Err(DexError::NothingCommitted {
                account: account.clone(),
                market_id,
            });
        }

        let (remaining, to_release) = if amount.is_zero() {
            (Coins::new(), current)
        } else {
            let remaining = current.checked_sub(amount).ok_or_else(|| DexError::ReleaseExceedsCommitment {
                requested: amount.clone(),
                committed: current.clone(),
                account: account.clone(),
                market_id,
            })?;
            (remaining, amount.clone())
        };

        holds
            .release_hold(account, &to_release)
            .map_err(|e| DexError::collaborator(format!("error releasing hold on {to_release} committed by {account} to market {market_id}"), e))?;

        self.set_commitment_amount(market_id, account, &remaining)?;
        self.emit(ExchangeEvent::CommitmentReleased {
            account: account.clone(),
            market_id,
            amount: to_release,
            tag: tag.to_string(),
        });
        Ok(())
    }

    /// [`Ledger::add_commitment`] for several accounts; every entry is
    /// attempted and the failures are joined.
    pub fn add_commitments(
        &mut self,
        holds: &mut dyn HoldKeeper,
        market_id: MarketId,
        entries: &[AccountAmount],
        tag: &str,
    ) -> Result<()> {
        let mut errs = Vec::new();
        for entry in entries {
            if let Err(err) = self.add_commitment(holds, market_id, &entry.account, &entry.amount, tag) {
                errs.push(err);
            }
        }
        DexError::join_result(errs)
    }

    /// [`Ledger::release_commitment`] for several accounts; every entry is
    /// attempted and the failures are joined.
    pub fn release_commitments(
        &mut self,
        holds: &mut dyn HoldKeeper,
        market_id: MarketId,
        entries: &[AccountAmount],
        tag: &str,
    ) -> Result<()> {
        let mut errs = Vec::new();
        for entry in entries {
            if let Err(err) = self.release_commitment(holds, market_id, &entry.account, &entry.amount, tag) {
                errs.push(err);
            }
        }
        DexError::join_result(errs)
    }

    /// Release every commitment made to a market.
    ///
    /// Walks the market's commitments `batch_size` keys at a time, resuming
    /// from the last key seen, so the number of keys loaded at once stays
    /// bounded. Failures are logged and returned joined; every commitment is
    /// still attempted. Returns how many were released.
    pub fn release_all_commitments_for_market(
        &mut self,
        holds: &mut dyn HoldKeeper,
        market_id: MarketId,
        batch_size: usize,
        tag: &str,
    ) -> (usize, Result<()>) {
        let prefix = keys::key_prefix_commitments_for_market(market_id);
        let batch_size = batch_size.max(1);
        let mut cursor: Option<Vec<u8>> = None;
        let mut released = 0;
        let mut errs = Vec::new();

        loop {
            let batch = self
                .store
                .scan(&prefix, cursor.as_deref(), Some(batch_size));
            let Some((last_key, _)) = batch.last() else {
                break;
            };
            cursor = Some(last_key.clone());
            let full = batch.len() == batch_size;

            for (key, _) in batch {
                let Some((_, account)) = keys::parse_commitment_key(&key) else {
                    errs.push(DexError::CorruptValue {
                        entity: "commitment key".into(),
                        reason: format!("cannot parse account from key of length {}", key.len()),
                    });
                    continue;
                };
                match self.release_commitment(holds, market_id, &account, &Coins::new(), tag) {
                    Ok(()) => released += 1,
                    Err(err) => errs.push(err),
                }
            }
            if !full {
                break;
            }
        }

        if !errs.is_empty() {
            tracing::warn!(
                market_id = market_id.0,
                errors = errs.len(),
                released,
                "errors encountered releasing all commitments for market"
            );
        }
        (released, DexError::join_result(errs))
    }

    /// Visit every commitment, market by market.
    ///
    /// Undecodable records are skipped and reported together at the end.
    pub fn iterate_commitments(
        &self,
        f: impl FnMut(MarketId, &AccountId, &Coins) -> ControlFlow<()>,
    ) -> Result<()> {
        self.iterate_commitment_prefix(&keys::key_prefix_commitments(), f)
    }

    /// Visit every commitment made to one market.
    pub fn iterate_market_commitments(
        &self,
        market_id: MarketId,
        f: impl FnMut(MarketId, &AccountId, &Coins) -> ControlFlow<()>,
    ) -> Result<()> {
        self.iterate_commitment_prefix(&keys::key_prefix_commitments_for_market(market_id), f)
    }

    fn iterate_commitment_prefix(
        &self,
        prefix: &[u8],
        mut f: impl FnMut(MarketId, &AccountId, &Coins) -> ControlFlow<()>,
    ) -> Result<()> {
        let mut errs = Vec::new();
        for (key, value) in self.store.scan_prefix(prefix) {
            let Some((market_id, account)) = keys::parse_commitment_key(&key) else {
                errs.push(DexError::CorruptValue {
                    entity: "commitment key".into(),
                    reason: format!("cannot parse key of length {}", key.len()),
                });
                continue;
            };
            match decode_commitment(&value) {
                Ok(amount) => {
                    if f(market_id, &account, &amount).is_break() {
                        break;
                    }
                }
                Err(err) => errs.push(err),
            }
        }
        DexError::join_result(errs)
    }
}

#[cfg(test)]
mod tests {
    use dexcore_types::testing::MemBank;
    use dexcore_types::Coin;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::MemStore;

    fn coins(s: &str) -> Coins {
        s.parse().unwrap()
    }

    fn setup(funds: &str) -> (Ledger<MemStore>, MemBank, AccountId) {
        let addr = AccountId::from("addr1");
        let mut bank = MemBank::new();
        bank.deposit(&addr, &coins(funds));
        (Ledger::new(MemStore::new()), bank, addr)
    }

    #[test]
    fn add_twice_then_release_part() {
        let (mut l, mut bank, addr) = setup("1000apple");
        let m = MarketId(2);
        l.add_commitment(&mut bank, m, &addr, &coins("23apple"), "t1").unwrap();
        l.add_commitment(&mut bank, m, &addr, &coins("100apple"), "t2").unwrap();
        assert_eq!(l.get_commitment_amount(m, &addr).unwrap(), coins("123apple"));
        assert_eq!(bank.holds_placed[0].2, "dexcore: commitment to 2");

        l.release_commitment(&mut bank, m, &addr, &coins("11apple"), "t3").unwrap();
        assert_eq!(l.get_commitment_amount(m, &addr).unwrap(), coins("112apple"));
        assert_eq!(bank.holds_released, vec![(addr.clone(), coins("11apple"))]);

        let events = l.take_events();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[2], ExchangeEvent::CommitmentReleased { tag, .. } if tag == "t3"));
    }

    #[test]
    fn over_release_fails_and_leaves_balance() {
        let (mut l, mut bank, addr) = setup("1000apple,10plum");
        let m = MarketId(2);
        l.add_commitment(&mut bank, m, &addr, &coins("112apple,5plum"), "").unwrap();

        let err = l
            .release_commitment(&mut bank, m, &addr, &coins("300apple"), "")
            .unwrap_err();
        match &err {
            DexError::ReleaseExceedsCommitment { requested, committed, .. } => {
                assert_eq!(requested, &coins("300apple"));
                assert_eq!(committed, &coins("112apple,5plum"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // A denom that was never committed is also too much.
        assert!(l.release_commitment(&mut bank, m, &addr, &coins("1fig"), "").is_err());
        assert_eq!(l.get_commitment_amount(m, &addr).unwrap(), coins("112apple,5plum"));
        assert!(bank.holds_released.is_empty());
    }

    #[test]
    fn release_zero_releases_everything() {
        let (mut l, mut bank, addr) = setup("50apple");
        let m = MarketId(1);
        l.add_commitment(&mut bank, m, &addr, &coins("40apple"), "").unwrap();
        l.release_commitment(&mut bank, m, &addr, &Coins::new(), "").unwrap();
        assert!(l.get_commitment_amount(m, &addr).unwrap().is_zero());
        assert!(l.store().is_empty());

        let err = l.release_commitment(&mut bank, m, &addr, &Coins::new(), "").unwrap_err();
        assert!(matches!(err, DexError::NothingCommitted { .. }));
    }

    #[test]
    fn setting_zero_deletes_record() {
        let mut l = Ledger::new(MemStore::new());
        let addr = AccountId::from("addr1");
        l.set_commitment_amount(MarketId(1), &addr, &coins("5apple")).unwrap();
        assert_eq!(l.store().len(), 1);
        l.set_commitment_amount(MarketId(1), &addr, &Coins::new()).unwrap();
        assert!(l.store().is_empty());
        assert!(l.get_commitment_amount(MarketId(9), &addr).unwrap().is_zero());
    }

    #[test]
    fn failed_hold_leaves_no_commitment() {
        let (mut l, mut bank, addr) = setup("5apple");
        let err = l
            .add_commitment(&mut bank, MarketId(1), &addr, &coins("6apple"), "")
            .unwrap_err();
        assert!(matches!(err, DexError::Collaborator { .. }));
        assert!(l.get_commitment_amount(MarketId(1), &addr).unwrap().is_zero());
    }

    #[test]
    fn random_add_release_never_goes_negative() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let (mut l, mut bank, addr) = setup("1000000apple,1000000plum");
        let m = MarketId(4);
        for _ in 0..300 {
            let delta = dexcore_types::testing::random_coins(&mut rng, &["apple", "plum"], 50);
            let before = l.get_commitment_amount(m, &addr).unwrap();
            if rng.gen_bool(0.5) {
                l.add_commitment(&mut bank, m, &addr, &delta, "").unwrap();
                assert_eq!(l.get_commitment_amount(m, &addr).unwrap(), before.checked_add(&delta).unwrap());
            } else {
                let result = l.release_commitment(&mut bank, m, &addr, &delta, "");
                let after = l.get_commitment_amount(m, &addr).unwrap();
                if result.is_err() {
                    assert_eq!(after, before);
                }
                assert!(!after.is_any_negative());
            }
            assert_eq!(
                bank.held(&addr, "apple"),
                l.get_commitment_amount(m, &addr).unwrap().amount_of("apple")
            );
        }
    }

    #[test]
    fn release_all_walks_in_batches() {
        let mut l = Ledger::new(MemStore::new());
        let mut bank = MemBank::new();
        let m = MarketId(6);
        for i in 0..7 {
            let addr = AccountId::new(format!("addr{i}"));
            bank.deposit(&addr, &coins("10apple"));
            l.add_commitment(&mut bank, m, &addr, &coins("3apple"), "").unwrap();
        }
        let other = AccountId::from("other");
        bank.deposit(&other, &coins("10apple"));
        l.add_commitment(&mut bank, MarketId(7), &other, &coins("1apple"), "").unwrap();
        bank.fail_release_for(&AccountId::from("addr3"));

        let (released, result) = l.release_all_commitments_for_market(&mut bank, m, 2, "GovCloseMarket");
        assert_eq!(released, 6);
        assert!(matches!(result.unwrap_err(), DexError::Collaborator { .. }));

        let mut left = Vec::new();
        l.iterate_commitments(|market, account, amount| {
            left.push((market, account.clone(), amount.clone()));
            ControlFlow::Continue(())
        })
        .unwrap();
        assert_eq!(
            left,
            vec![
                (m, AccountId::from("addr3"), coins("3apple")),
                (MarketId(7), other, Coin::new(1, "apple").into()),
            ]
        );
    }

    #[test]
    fn bulk_release_reports_every_failure() {
        let (mut l, mut bank, addr) = setup("100apple");
        let m = MarketId(1);
        l.add_commitment(&mut bank, m, &addr, &coins("10apple"), "").unwrap();
        let entries = vec![
            AccountAmount::new(AccountId::from("nobody"), coins("1apple")),
            AccountAmount::new(addr.clone(), coins("4apple")),
            AccountAmount::new(AccountId::from("ghost"), coins("1apple")),
        ];
        let err = l.release_commitments(&mut bank, m, &entries, "").unwrap_err();
        assert_eq!(err.flatten().len(), 2);
        assert_eq!(l.get_commitment_amount(m, &addr).unwrap(), coins("6apple"));
    }
}
