//! # Native Vault
//!
//! Collateral provider for the chain's native coin. The vault keeps no books
//! of its own: its entire state is its coin balance, and the ledger's
//! provider-scoped balance for the native ARN must equal that balance after
//! every call.
//!
//! ## Flow
//!
//! ```text
//! deposit:    value arrives -> key held? -> ledger.deposit -> balances agree?
//! withdrawal: key held? -> ledger.withdrawal -> balances agree? -> pay caller
//! ```
//!
//! The payout is the last step. If the caller's receiver hook re-enters the
//! vault, the ledger has already been debited and the allowance consumed.
//! Whatever the hook does, the chain audits the vault's holdings again
//! before the transaction commits.
//!
//! Only the vault holds its [`ProviderHandle`], so nothing else can move its
//! books.

use std::sync::Arc;

use custody_protocol::chain::{Chain, CoinReceiver, Holdings, ProviderHandle, Transaction};
use custody_protocol::error::{CustodyError, CustodyResult};
use custody_protocol::ledger::BalanceTriple;
use custody_protocol::{Address, Amount, Arn, KeyId};

/// A native-coin collateral provider bound to one ledger.
#[derive(Debug)]
pub struct NativeVault {
    address: Address,
    ledger: Address,
    arn: Arn,
    handle: ProviderHandle,
}

impl NativeVault {
    /// Creates a vault acting through `handle` and reporting to `ledger`.
    pub fn new(handle: ProviderHandle, ledger: Address) -> Self {
        Self {
            address: handle.address(),
            ledger,
            arn: Arn::native(),
            handle,
        }
    }

    /// Creates a vault for the chain's ledger. Registers it as a native-coin
    /// provider, and as a receiver so that unsolicited payments are refused.
    pub fn install(chain: &mut Chain, label: &str) -> CustodyResult<Arc<Self>> {
        let ledger = chain.state().deployment().ledger;
        let handle = chain.register_provider(Address::derive(label), Holdings::NativeCoin)?;
        let vault = Arc::new(Self::new(handle, ledger));
        chain.register_receiver(vault.address, vault.clone());
        tracing::info!(address = %vault.address, %ledger, "native vault installed");
        Ok(vault)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn ledger(&self) -> Address {
        self.ledger
    }

    /// The ARN this vault reports under.
    pub fn arn(&self) -> Arn {
        self.arn
    }

    /// Deposits `value` coins from `caller` into the trust of `key_id`.
    ///
    /// The caller must hold `key_id`, and the ledger additionally requires
    /// it to be a root key.
    pub fn deposit(
        &self,
        tx: &mut Transaction<'_>,
        caller: Address,
        value: Amount,
        key_id: KeyId,
    ) -> CustodyResult<BalanceTriple> {
        tx.attach_value(caller, self.address, value)?;
        self.require_key(tx, caller, key_id)?;

        let balances = tx.ledger_deposit(&self.handle, self.ledger, key_id, self.arn, value)?;
        self.require_holdings(tx, balances.provider, tx.coin_balance(self.address))?;

        tracing::debug!(%caller, key_id, value, "native deposit");
        Ok(balances)
    }

    /// Withdraws `amount` coins from the trust of `key_id` to `caller`.
    pub fn withdrawal(
        &self,
        tx: &mut Transaction<'_>,
        caller: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<BalanceTriple> {
        self.require_key(tx, caller, key_id)?;

        let balances = tx.ledger_withdrawal(&self.handle, self.ledger, key_id, self.arn, amount)?;
        let expected = tx
            .coin_balance(self.address)
            .checked_sub(amount)
            .ok_or(CustodyError::Underflow)?;
        self.require_holdings(tx, balances.provider, expected)?;

        tracing::debug!(%caller, key_id, amount, "native withdrawal");
        tx.transfer_coins(self.address, caller, amount)?;
        Ok(balances)
    }

    fn require_key(
        &self,
        tx: &Transaction<'_>,
        caller: Address,
        key_id: KeyId,
    ) -> CustodyResult<()> {
        if tx.key_balance(caller, key_id) == 0 {
            return Err(CustodyError::KeyNotHeld {
                holder: caller,
                key_id,
            });
        }
        Ok(())
    }

    fn require_holdings(
        &self,
        tx: &Transaction<'_>,
        tracked: Amount,
        physical: Amount,
    ) -> CustodyResult<()> {
        if tracked != physical {
            tracing::error!(
                vault = %self.address,
                tracked,
                physical,
                depth = tx.depth(),
                "ledger and vault diverged"
            );
            return Err(CustodyError::InvariantBreach(format!(
                "vault {} tracked {tracked} but holds {physical}",
                self.address
            )));
        }
        Ok(())
    }
}

impl CoinReceiver for NativeVault {
    fn on_receive(
        &self,
        _tx: &mut Transaction<'_>,
        _from: Address,
        _amount: Amount,
    ) -> CustodyResult<()> {
        Err(CustodyError::PaymentRejected {
            recipient: self.address,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custody_protocol::{Deployment, Role};

    fn setup() -> (Chain, Arc<NativeVault>, Address) {
        let mut chain = Chain::new(Deployment::derive("vault-unit"));
        let vault = NativeVault::install(&mut chain, "vault").unwrap();
        let owner = Address::derive("owner");
        let ledger = vault.ledger();
        let provider = vault.address();
        chain
            .execute(|tx| {
                tx.faucet(owner, 100)?;
                let (trust_id, _) = tx.create_trust(owner, "t")?;
                let role = Role::CollateralProvider;
                tx.set_trusted_role(owner, trust_id, role, ledger, provider, true)
            })
            .unwrap();
        (chain, vault, owner)
    }

    #[test]
    fn deposit_moves_coins_into_vault() {
        let (mut chain, vault, owner) = setup();
        let balances = chain.execute(|tx| vault.deposit(tx, owner, 10, 0)).unwrap();

        assert_eq!(balances.provider, 10);
        assert_eq!(chain.state().coins().balance_of(vault.address()), 10);
        assert_eq!(chain.state().coins().balance_of(owner), 90);
    }

    #[test]
    fn deposit_without_key_returns_value() {
        let (mut chain, vault, _) = setup();
        let stranger = Address::derive("stranger");
        chain.execute(|tx| tx.faucet(stranger, 5)).unwrap();

        let err = chain
            .execute(|tx| vault.deposit(tx, stranger, 5, 0))
            .unwrap_err();
        assert_eq!(err.reason(), "KEY_NOT_HELD");
        assert_eq!(chain.state().coins().balance_of(stranger), 5);
    }

    #[test]
    fn direct_payment_is_refused() {
        let (mut chain, vault, owner) = setup();
        let err = chain
            .execute(|tx| tx.transfer_coins(owner, vault.address(), 1))
            .unwrap_err();
        assert_eq!(err.reason(), "PAYMENT_REJECTED");
    }

    #[test]
    fn address_cannot_be_installed_twice() {
        let (mut chain, _, _) = setup();
        let err = NativeVault::install(&mut chain, "vault").unwrap_err();
        assert_eq!(err.reason(), "INVALID_INPUT");
    }

    #[test]
    fn stray_coins_trip_the_invariant() {
        let (mut chain, vault, owner) = setup();
        let err = chain
            .execute(|tx| {
                // coins arrive outside the vault's own entry points
                tx.attach_value(owner, vault.address(), 1)?;
                vault.deposit(tx, owner, 10, 0)
            })
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.reason(), "INVARIANT_BREACH");
        assert_eq!(chain.state().coins().balance_of(vault.address()), 0);
    }
}
