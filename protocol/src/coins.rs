//! Physical balances of the native coin.
//!
//! The ledger only tracks what providers claim to hold. The coin bank is
//! what they actually hold, and the two are compared after every provider
//! call.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{CustodyError, CustodyResult};
use crate::types::{Address, Amount};

/// Native coin balances and total supply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoinBank {
    balances: BTreeMap<Address, Amount>,
    supply: Amount,
}

impl CoinBank {
    /// An empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates coins out of thin air. Devnet faucet and test setup only.
    pub fn mint(&mut self, to: Address, amount: Amount) -> CustodyResult<()> {
        let supply = self.supply.checked_add(amount).ok_or(CustodyError::Overflow)?;
        let balance = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(CustodyError::Overflow)?;
        self.supply = supply;
        self.balances.insert(to, balance);
        Ok(())
    }

    /// Moves coins between accounts.
    pub fn transfer(&mut self, from: Address, to: Address, amount: Amount) -> CustodyResult<()> {
        let balance = self.balance_of(from);
        let debited = balance
            .checked_sub(amount)
            .ok_or(CustodyError::InsufficientFunds {
                holder: from,
                balance,
                requested: amount,
            })?;
        if from == to {
            return Ok(());
        }
        let credited = self
            .balance_of(to)
            .checked_add(amount)
            .ok_or(CustodyError::Overflow)?;

        self.balances.insert(from, debited);
        self.balances.insert(to, credited);
        Ok(())
    }

    /// Coins held by `holder`.
    pub fn balance_of(&self, holder: Address) -> Amount {
        self.balances.get(&holder).copied().unwrap_or(0)
    }

    /// Total coins minted.
    pub fn supply(&self) -> Amount {
        self.supply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_moves_coins() {
        let mut bank = CoinBank::new();
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");
        bank.mint(alice, 100).unwrap();
        bank.transfer(alice, bob, 40).unwrap();

        assert_eq!(bank.balance_of(alice), 60);
        assert_eq!(bank.balance_of(bob), 40);
        assert_eq!(bank.supply(), 100);
    }

    #[test]
    fn overspend_rejected() {
        let mut bank = CoinBank::new();
        let alice = Address::derive("alice");
        bank.mint(alice, 5).unwrap();

        let err = bank.transfer(alice, Address::derive("bob"), 6).unwrap_err();
        assert_eq!(err.reason(), "INSUFFICIENT_FUNDS");
        assert_eq!(bank.balance_of(alice), 5);
    }

    #[test]
    fn self_transfer_is_noop() {
        let mut bank = CoinBank::new();
        let alice = Address::derive("alice");
        bank.mint(alice, 5).unwrap();
        bank.transfer(alice, alice, 5).unwrap();
        assert_eq!(bank.balance_of(alice), 5);
    }
}
