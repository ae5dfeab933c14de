//! # Capability Store
//!
//! Holds every capability key balance. A key is a multi-holder token: any
//! address may hold zero or more units of any key id. The store is mutated by
//! exactly one trusted issuer (mint, burn, soulbinding) and by holders moving
//! their own keys.
//!
//! The store is composed from two small capability interfaces rather than a
//! base-class stack:
//!
//! - [`SingleOwnerAdmin`] gates issuer-only operations.
//! - [`TransferGuarded`] runs the soulbound check before any unit leaves a
//!   holder, whether by transfer or by burn.
//!
//! ## Soulbound minimums
//!
//! Each `(holder, key)` pair carries an independent minimum. A movement that
//! would leave the holder below it fails with `SOUL_BREACH`. Setting the
//! minimum overwrites the old value and deliberately does not look at the
//! holder's balance: the issuer mints and binds inside the same transaction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CustodyError, CustodyResult};
use crate::events::{Event, EventLog};
use crate::types::{Address, Amount, KeyId};

// ---------------------------------------------------------------------------
// Capability interfaces
// ---------------------------------------------------------------------------

/// A component with a single administrator allowed to call privileged
/// operations.
pub trait SingleOwnerAdmin {
    /// The administrator's address.
    fn admin(&self) -> Address;

    /// Fails with `NOT_ISSUER` unless `caller` is the administrator.
    fn require_admin(&self, caller: Address) -> CustodyResult<()> {
        if caller != self.admin() {
            return Err(CustodyError::NotIssuer { caller });
        }
        Ok(())
    }
}

/// A token ledger whose outgoing movements are checked against per-holder
/// retention minimums.
pub trait TransferGuarded {
    /// Units of `key_id` held by `holder`.
    fn balance_of(&self, holder: Address, key_id: KeyId) -> Amount;

    /// Units of `key_id` that `holder` must always retain.
    fn soulbound_minimum(&self, holder: Address, key_id: KeyId) -> Amount;

    /// Pre-transfer check for every unit leaving `from`.
    ///
    /// Amounts for a repeated id are summed before checking. Movements out of
    /// the zero address (mints) are never restricted.
    fn check_transfer(&self, from: Address, moves: &[(KeyId, Amount)]) -> CustodyResult<()> {
        if from.is_zero() {
            return Ok(());
        }

        let mut totals: BTreeMap<KeyId, Amount> = BTreeMap::new();
        for &(key_id, amount) in moves {
            let total = totals.entry(key_id).or_insert(0);
            *total = total.checked_add(amount).ok_or(CustodyError::Overflow)?;
        }

        for (key_id, amount) in totals {
            let balance = self.balance_of(from, key_id);
            let remaining = balance
                .checked_sub(amount)
                .ok_or(CustodyError::InsufficientKeys {
                    holder: from,
                    key_id,
                    balance,
                    requested: amount,
                })?;

            let minimum = self.soulbound_minimum(from, key_id);
            if remaining < minimum {
                return Err(CustodyError::SoulBreach {
                    holder: from,
                    key_id,
                    minimum,
                    remaining,
                });
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// KeyStore
// ---------------------------------------------------------------------------

/// Capability key balances and soulbound minimums.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStore {
    /// This store's own address.
    address: Address,
    /// The only address allowed to mint, burn and soulbind.
    issuer: Address,
    /// `key_id -> (holder -> units)`. Zero holdings are pruned.
    balances: BTreeMap<KeyId, BTreeMap<Address, Amount>>,
    /// `holder -> (key_id -> minimum)`.
    soulbound: BTreeMap<Address, BTreeMap<KeyId, Amount>>,
}

impl KeyStore {
    /// Creates an empty store administered by `issuer`.
    pub fn new(address: Address, issuer: Address) -> Self {
        Self {
            address,
            issuer,
            balances: BTreeMap::new(),
            soulbound: BTreeMap::new(),
        }
    }

    /// This store's address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// The registered issuer.
    pub fn issuer(&self) -> Address {
        self.issuer
    }

    /// Mints `amount` units of `key_id` to `holder`. Issuer only.
    pub fn mint(
        &mut self,
        events: &mut EventLog,
        caller: Address,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.require_admin(caller)?;
        if holder.is_zero() {
            return Err(CustodyError::InvalidInput("mint to the zero address".into()));
        }
        self.move_keys(events, caller, Address::ZERO, holder, &[(key_id, amount)])
    }

    /// Burns `amount` units of `key_id` held by `holder`. Issuer only, and
    /// subject to the holder's soulbound minimum.
    pub fn burn(
        &mut self,
        events: &mut EventLog,
        caller: Address,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.require_admin(caller)?;
        if holder.is_zero() {
            return Err(CustodyError::InvalidInput("burn from the zero address".into()));
        }
        self.move_keys(events, caller, holder, Address::ZERO, &[(key_id, amount)])
    }

    /// Overwrites the soulbound minimum for `(holder, key_id)`. Issuer only.
    ///
    /// Does not inspect or change the holder's balance.
    pub fn set_soulbound_minimum(
        &mut self,
        events: &mut EventLog,
        caller: Address,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.require_admin(caller)?;

        self.soulbound
            .entry(holder)
            .or_default()
            .insert(key_id, amount);

        tracing::debug!(%holder, key_id, amount, "soulbound minimum set");
        events.emit(Event::SoulboundAmountSet {
            operator: caller,
            holder,
            key_id,
            amount,
        });
        Ok(())
    }

    /// Moves keys held by `from` to `to`. Only the holder may move its keys.
    pub fn transfer(
        &mut self,
        events: &mut EventLog,
        caller: Address,
        from: Address,
        to: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.batch_transfer(events, caller, from, to, &[key_id], &[amount])
    }

    /// Moves several key ids at once. The soulbound check sees the batch as a
    /// whole.
    pub fn batch_transfer(
        &mut self,
        events: &mut EventLog,
        caller: Address,
        from: Address,
        to: Address,
        key_ids: &[KeyId],
        amounts: &[Amount],
    ) -> CustodyResult<()> {
        if caller != from {
            return Err(CustodyError::NotApproved { caller, from });
        }
        if to.is_zero() {
            return Err(CustodyError::InvalidInput(
                "transfer to the zero address".into(),
            ));
        }
        if key_ids.len() != amounts.len() {
            return Err(CustodyError::InvalidInput(format!(
                "{} key ids but {} amounts",
                key_ids.len(),
                amounts.len()
            )));
        }

        let moves: Vec<(KeyId, Amount)> = key_ids
            .iter()
            .copied()
            .zip(amounts.iter().copied())
            .collect();
        self.move_keys(events, caller, from, to, &moves)
    }

    /// Balances for parallel lists of holders and key ids.
    pub fn balance_of_batch(&self, holders: &[Address], key_ids: &[KeyId]) -> Vec<Amount> {
        holders
            .iter()
            .zip(key_ids.iter())
            .map(|(holder, key_id)| self.balance_of(*holder, *key_id))
            .collect()
    }

    /// Addresses currently holding at least one unit of `key_id`.
    pub fn holders(&self, key_id: KeyId) -> Vec<Address> {
        self.balances
            .get(&key_id)
            .map(|h| h.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Key ids of which `holder` holds at least one unit.
    pub fn keys_held(&self, holder: Address) -> Vec<KeyId> {
        self.balances
            .iter()
            .filter(|(_, holders)| holders.contains_key(&holder))
            .map(|(key_id, _)| *key_id)
            .collect()
    }

    /// The single movement path. Runs the guard, then debits and credits.
    fn move_keys(
        &mut self,
        events: &mut EventLog,
        operator: Address,
        from: Address,
        to: Address,
        moves: &[(KeyId, Amount)],
    ) -> CustodyResult<()> {
        self.check_transfer(from, moves)?;

        for &(key_id, amount) in moves {
            let holders = self.balances.entry(key_id).or_default();

            if !from.is_zero() {
                let remaining = holders
                    .get(&from)
                    .copied()
                    .unwrap_or(0)
                    .checked_sub(amount)
                    .ok_or(CustodyError::Underflow)?;
                if remaining == 0 {
                    holders.remove(&from);
                } else {
                    holders.insert(from, remaining);
                }
            }

            if !to.is_zero() && amount > 0 {
                let balance = holders.entry(to).or_insert(0);
                *balance = balance.checked_add(amount).ok_or(CustodyError::Overflow)?;
            }

            if holders.is_empty() {
                self.balances.remove(&key_id);
            }

            events.emit(Event::KeyTransferred {
                operator,
                from,
                to,
                key_id,
                amount,
            });
        }

        tracing::debug!(%operator, %from, %to, moves = moves.len(), "keys moved");
        Ok(())
    }
}

impl SingleOwnerAdmin for KeyStore {
    fn admin(&self) -> Address {
        self.issuer
    }
}

impl TransferGuarded for KeyStore {
    fn balance_of(&self, holder: Address, key_id: KeyId) -> Amount {
        self.balances
            .get(&key_id)
            .and_then(|h| h.get(&holder))
            .copied()
            .unwrap_or(0)
    }

    fn soulbound_minimum(&self, holder: Address, key_id: KeyId) -> Amount {
        self.soulbound
            .get(&holder)
            .and_then(|k| k.get(&key_id))
            .copied()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (KeyStore, EventLog, Address) {
        let issuer = Address::derive("issuer");
        (
            KeyStore::new(Address::derive("keys"), issuer),
            EventLog::new(),
            issuer,
        )
    }

    #[test]
    fn mint_increases_balance() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");

        store.mint(&mut events, issuer, alice, 0, 2).unwrap();
        assert_eq!(store.balance_of(alice, 0), 2);
        assert_eq!(store.holders(0), vec![alice]);
        assert_eq!(store.keys_held(alice), vec![0]);
    }

    #[test]
    fn only_issuer_mutates() {
        let (mut store, mut events, _) = setup();
        let mallory = Address::derive("mallory");

        let err = store.mint(&mut events, mallory, mallory, 0, 1).unwrap_err();
        assert_eq!(err.reason(), "NOT_ISSUER");
        let err = store.burn(&mut events, mallory, mallory, 0, 1).unwrap_err();
        assert_eq!(err.reason(), "NOT_ISSUER");
        let err = store
            .set_soulbound_minimum(&mut events, mallory, mallory, 0, 1)
            .unwrap_err();
        assert_eq!(err.reason(), "NOT_ISSUER");
        assert!(events.is_empty());
    }

    #[test]
    fn soulbound_minimum_blocks_transfer() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");

        store.mint(&mut events, issuer, alice, 1, 1).unwrap();
        store
            .set_soulbound_minimum(&mut events, issuer, alice, 1, 1)
            .unwrap();

        let err = store
            .transfer(&mut events, alice, alice, bob, 1, 1)
            .unwrap_err();
        assert!(matches!(
            err,
            CustodyError::SoulBreach {
                minimum: 1,
                remaining: 0,
                ..
            }
        ));
        assert_eq!(store.balance_of(alice, 1), 1);
    }

    #[test]
    fn soulbound_allows_transfer_of_excess() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");

        store.mint(&mut events, issuer, alice, 1, 3).unwrap();
        store
            .set_soulbound_minimum(&mut events, issuer, alice, 1, 1)
            .unwrap();
        store.transfer(&mut events, alice, alice, bob, 1, 2).unwrap();

        assert_eq!(store.balance_of(alice, 1), 1);
        assert_eq!(store.balance_of(bob, 1), 2);
    }

    #[test]
    fn soulbound_applies_to_burns() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");

        store.mint(&mut events, issuer, alice, 4, 1).unwrap();
        store
            .set_soulbound_minimum(&mut events, issuer, alice, 4, 1)
            .unwrap();
        let err = store.burn(&mut events, issuer, alice, 4, 1).unwrap_err();
        assert_eq!(err.reason(), "SOUL_BREACH");

        store
            .set_soulbound_minimum(&mut events, issuer, alice, 4, 0)
            .unwrap();
        store.burn(&mut events, issuer, alice, 4, 1).unwrap();
        assert_eq!(store.balance_of(alice, 4), 0);
        assert!(store.holders(4).is_empty());
    }

    #[test]
    fn setting_minimum_ignores_balance() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");

        store
            .set_soulbound_minimum(&mut events, issuer, alice, 9, 5)
            .unwrap();
        assert_eq!(store.soulbound_minimum(alice, 9), 5);
        assert_eq!(store.balance_of(alice, 9), 0);
    }

    #[test]
    fn batch_checks_repeated_ids_cumulatively() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");

        store.mint(&mut events, issuer, alice, 2, 3).unwrap();
        store
            .set_soulbound_minimum(&mut events, issuer, alice, 2, 1)
            .unwrap();

        let err = store
            .batch_transfer(&mut events, alice, alice, bob, &[2, 2], &[1, 2])
            .unwrap_err();
        assert_eq!(err.reason(), "SOUL_BREACH");
    }

    #[test]
    fn holder_must_initiate_transfer() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");

        store.mint(&mut events, issuer, alice, 0, 1).unwrap();
        let err = store
            .transfer(&mut events, bob, alice, bob, 0, 1)
            .unwrap_err();
        assert_eq!(err.reason(), "NOT_APPROVED");
    }

    #[test]
    fn insufficient_keys_rejected() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");

        store.mint(&mut events, issuer, alice, 0, 1).unwrap();
        let err = store
            .transfer(&mut events, alice, alice, Address::derive("bob"), 0, 2)
            .unwrap_err();
        assert_eq!(err.reason(), "INSUFFICIENT_KEYS");
    }

    #[test]
    fn movements_emit_events() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");

        store.mint(&mut events, issuer, alice, 0, 1).unwrap();
        assert!(matches!(
            events.records()[0].event,
            Event::KeyTransferred {
                from: Address::ZERO,
                amount: 1,
                ..
            }
        ));
    }

    #[test]
    fn balance_of_batch_pairs_inputs() {
        let (mut store, mut events, issuer) = setup();
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");

        store.mint(&mut events, issuer, alice, 0, 1).unwrap();
        store.mint(&mut events, issuer, bob, 1, 3).unwrap();
        assert_eq!(store.balance_of_batch(&[alice, bob, bob], &[0, 1, 0]), vec![1, 3, 0]);
    }
}
