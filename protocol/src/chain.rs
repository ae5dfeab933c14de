//! # Transactional Chain
//!
//! All component state lives in one [`WorldState`]. A [`Chain`] owns the live
//! copy and runs every top-level operation through [`Chain::execute`]:
//!
//! 1. Clone the live state into a staging copy and open an empty staged
//!    event log.
//! 2. Hand the closure a [`Transaction`] over both.
//! 3. Audit the holdings of every registered native-coin provider.
//! 4. On `Ok`, swap the staging copy in and append the staged events. On
//!    `Err`, drop both.
//!
//! Nothing a failed operation did survives: no balances, no allowances, no
//! events, no transaction number. Nested calls (a vault calling the ledger,
//! a receiver hook calling back into the vault) all run against the same
//! staging copy, so a failure anywhere unwinds everything.
//!
//! The event history is kept on the chain, not in the world state, so the
//! cost of staging does not grow with the number of past events.
//!
//! ## Provider identity
//!
//! Ledger mutations take a [`ProviderHandle`]. Only
//! [`Chain::register_provider`] issues one, once per address, and a
//! [`Transaction`] cannot reach the chain. Handles are bound to the chain
//! instance that issued them. Code running inside a transaction, receiver
//! hooks included, can therefore only act as a provider whose handle it was
//! given.
//!
//! ## Reentrancy
//!
//! [`Transaction::transfer_coins`] invokes the recipient's [`CoinReceiver`]
//! hook, if one is registered, with the same `Transaction`. The hook may
//! call any component. Providers commit ledger state before paying out, so a
//! reentrant call always sees decremented balances. Hook nesting is capped at
//! [`MAX_CALL_DEPTH`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::arn::Arn;
use crate::coins::CoinBank;
use crate::config::{MAX_CALL_DEPTH, STATE_SCHEMA_VERSION};
use crate::error::{CustodyError, CustodyResult};
use crate::events::EventLog;
use crate::issuer::{KeyRole, TrustIssuer};
use crate::keys::{KeyStore, TransferGuarded};
use crate::ledger::{BalanceContext, BalanceTriple, Ledger};
use crate::notary::{Notary, Role};
use crate::types::{Address, Amount, KeyId, TrustId};

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

/// Addresses of the core components. Fixed at genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Capability store.
    pub key_store: Address,
    /// Reference issuer; the store's administrator.
    pub issuer: Address,
    /// Notary.
    pub notary: Address,
    /// Ledger.
    pub ledger: Address,
}

impl Deployment {
    /// Derives component addresses from a deployment label.
    pub fn derive(label: &str) -> Self {
        Self {
            key_store: Address::derive(&format!("{label}/key-store")),
            issuer: Address::derive(&format!("{label}/issuer")),
            notary: Address::derive(&format!("{label}/notary")),
            ledger: Address::derive(&format!("{label}/ledger")),
        }
    }

    /// `(alias, address)` pairs for registry documents.
    pub fn components(&self) -> [(&'static str, Address); 4] {
        [
            ("KeyStore", self.key_store),
            ("TrustIssuer", self.issuer),
            ("Notary", self.notary),
            ("Ledger", self.ledger),
        ]
    }

    fn contains(&self, address: Address) -> bool {
        self.components().iter().any(|(_, a)| *a == address)
    }
}

// ---------------------------------------------------------------------------
// WorldState
// ---------------------------------------------------------------------------

/// Everything the custody core knows, apart from the event history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldState {
    schema_version: u32,
    deployment: Deployment,
    coins: CoinBank,
    keys: KeyStore,
    issuer: TrustIssuer,
    notary: Notary,
    ledger: Ledger,
    transactions: u64,
}

impl WorldState {
    /// Empty state wired to `deployment`.
    pub fn genesis(deployment: Deployment) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            deployment,
            coins: CoinBank::new(),
            keys: KeyStore::new(deployment.key_store, deployment.issuer),
            issuer: TrustIssuer::new(deployment.issuer),
            notary: Notary::new(deployment.notary),
            ledger: Ledger::new(deployment.ledger),
            transactions: 0,
        }
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    pub fn coins(&self) -> &CoinBank {
        &self.coins
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn issuer(&self) -> &TrustIssuer {
        &self.issuer
    }

    pub fn notary(&self) -> &Notary {
        &self.notary
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Number of committed transactions.
    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    /// Checks both nesting invariants across the whole ledger.
    pub fn audit(&self) -> CustodyResult<()> {
        self.ledger.audit(&self.issuer)
    }

    /// Checks that the provider-scoped native balance equals the provider's
    /// physical coins.
    pub fn audit_holdings(&self, provider: Address, arn: Arn) -> CustodyResult<()> {
        if arn != Arn::native() {
            return Err(CustodyError::InvalidInput(format!(
                "no physical bank for {arn}"
            )));
        }
        let tracked = self
            .ledger
            .balance(BalanceContext::Ledger, Some(provider), arn)?;
        let physical = self.coins.balance_of(provider);
        if tracked != physical {
            return Err(CustodyError::InvariantBreach(format!(
                "{provider} tracked {tracked} but holds {physical}"
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

/// What the chain checks about a registered provider at every commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Holdings {
    /// Holds native coins; its provider-scoped native balance must equal its
    /// coin balance.
    NativeCoin,
    /// Holds nothing the coin bank can see, such as a scribe.
    Untracked,
}

/// Capability to act as the provider at [`address`](Self::address) towards
/// the ledger.
///
/// Issued once per address by [`Chain::register_provider`] and only valid on
/// that chain. It can be neither cloned nor deserialized.
#[derive(Debug)]
pub struct ProviderHandle {
    instance: u64,
    address: Address,
}

impl ProviderHandle {
    pub fn address(&self) -> Address {
        self.address
    }
}

// ---------------------------------------------------------------------------
// Receiver hooks
// ---------------------------------------------------------------------------

/// Code that runs when an address is paid with [`Transaction::transfer_coins`].
pub trait CoinReceiver: Send + Sync {
    /// Called after the coins have moved. Returning an error unwinds the
    /// whole transaction.
    fn on_receive(
        &self,
        tx: &mut Transaction<'_>,
        from: Address,
        amount: Amount,
    ) -> CustodyResult<()>;
}

type Receivers = HashMap<Address, Arc<dyn CoinReceiver>>;

static CHAIN_INSTANCES: AtomicU64 = AtomicU64::new(0);

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// The single authoritative execution context.
pub struct Chain {
    instance: u64,
    state: WorldState,
    events: EventLog,
    receivers: Receivers,
    providers: BTreeMap<Address, Holdings>,
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("transactions", &self.state.transactions)
            .field("events", &self.events.len())
            .field("receivers", &self.receivers.len())
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl Chain {
    /// A fresh chain at genesis.
    pub fn new(deployment: Deployment) -> Self {
        Self {
            instance: CHAIN_INSTANCES.fetch_add(1, Ordering::Relaxed),
            state: WorldState::genesis(deployment),
            events: EventLog::new(),
            receivers: HashMap::new(),
            providers: BTreeMap::new(),
        }
    }

    /// Resumes from a persisted state and its event history. The schema
    /// version must match.
    pub fn resume(state: WorldState, events: EventLog) -> CustodyResult<Self> {
        if state.schema_version != STATE_SCHEMA_VERSION {
            return Err(CustodyError::UnsupportedSchema {
                found: state.schema_version,
                expected: STATE_SCHEMA_VERSION,
            });
        }
        Ok(Self {
            instance: CHAIN_INSTANCES.fetch_add(1, Ordering::Relaxed),
            state,
            events,
            receivers: HashMap::new(),
            providers: BTreeMap::new(),
        })
    }

    /// Registers the hook invoked when `address` is paid.
    pub fn register_receiver(&mut self, address: Address, receiver: Arc<dyn CoinReceiver>) {
        self.receivers.insert(address, receiver);
    }

    /// Issues the handle through which `address` talks to the ledger.
    ///
    /// Each address is registered at most once, and core components cannot
    /// be registered at all.
    pub fn register_provider(
        &mut self,
        address: Address,
        holdings: Holdings,
    ) -> CustodyResult<ProviderHandle> {
        if address.is_zero() || self.state.deployment.contains(address) {
            return Err(CustodyError::InvalidInput(format!(
                "{address} cannot act as a provider"
            )));
        }
        if self.providers.contains_key(&address) {
            return Err(CustodyError::InvalidInput(format!(
                "provider {address} is already registered"
            )));
        }
        self.providers.insert(address, holdings);
        tracing::info!(provider = %address, ?holdings, "provider registered");
        Ok(ProviderHandle {
            instance: self.instance,
            address,
        })
    }

    /// The committed state.
    pub fn state(&self) -> &WorldState {
        &self.state
    }

    /// The committed event history.
    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Runs `operation` atomically.
    pub fn execute<T, F>(&mut self, operation: F) -> CustodyResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CustodyResult<T>,
    {
        let number = self.state.transactions + 1;
        let mut staged = self.state.clone();
        let mut emitted = EventLog::staged(self.events.next_sequence(), number);

        let result = {
            let mut tx = Transaction {
                instance: self.instance,
                state: &mut staged,
                events: &mut emitted,
                receivers: &self.receivers,
                depth: 0,
            };
            operation(&mut tx)
        };
        let result = result.and_then(|value| {
            self.audit_registered_holdings(&staged)?;
            Ok(value)
        });

        match result {
            Ok(value) => {
                staged.transactions = number;
                let count = emitted.len();
                self.state = staged;
                self.events.append(emitted);
                tracing::info!(transaction = number, events = count, "transaction committed");
                Ok(value)
            }
            Err(err) if err.is_fatal() => {
                tracing::error!(
                    transaction = number,
                    reason = err.reason(),
                    error = %err,
                    "invariant breach, transaction aborted"
                );
                Err(err)
            }
            Err(err) => {
                tracing::warn!(
                    transaction = number,
                    reason = err.reason(),
                    error = %err,
                    "transaction rejected"
                );
                Err(err)
            }
        }
    }

    fn audit_registered_holdings(&self, staged: &WorldState) -> CustodyResult<()> {
        self.providers
            .iter()
            .filter(|(_, holdings)| **holdings == Holdings::NativeCoin)
            .try_for_each(|(provider, _)| staged.audit_holdings(*provider, Arn::native()))
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Handle over the staged state of one atomic operation.
///
/// Every mutation of the core goes through here. Callers are named
/// explicitly; authentication happens before a call reaches the chain. The
/// ledger is the exception: it only accepts a [`ProviderHandle`].
pub struct Transaction<'a> {
    instance: u64,
    state: &'a mut WorldState,
    events: &'a mut EventLog,
    receivers: &'a Receivers,
    depth: usize,
}

impl<'a> Transaction<'a> {
    /// Read access to the staged state.
    pub fn state(&self) -> &WorldState {
        self.state
    }

    /// Events emitted so far by this transaction.
    pub fn events(&self) -> &EventLog {
        self.events
    }

    /// Current receiver-hook nesting depth.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn deployment(&self) -> Deployment {
        self.state.deployment
    }

    /// Units of `key_id` held by `holder`.
    pub fn key_balance(&self, holder: Address, key_id: KeyId) -> Amount {
        self.state.keys.balance_of(holder, key_id)
    }

    /// Physical coins held by `holder`.
    pub fn coin_balance(&self, holder: Address) -> Amount {
        self.state.coins.balance_of(holder)
    }

    // ---- Coins ----

    /// Mints coins to `to`.
    pub fn faucet(&mut self, to: Address, amount: Amount) -> CustodyResult<()> {
        self.state.coins.mint(to, amount)
    }

    /// Moves coins attached to a call. Does not invoke receiver hooks.
    pub fn attach_value(
        &mut self,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.state.coins.transfer(from, to, amount)
    }

    /// Pays `to` and runs its receiver hook, if any.
    pub fn transfer_coins(
        &mut self,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.state.coins.transfer(from, to, amount)?;

        let receiver = self.receivers.get(&to).cloned();
        if let Some(receiver) = receiver {
            if self.depth >= MAX_CALL_DEPTH {
                return Err(CustodyError::CallDepthExceeded(self.depth + 1));
            }
            self.depth += 1;
            let result = receiver.on_receive(self, from, amount);
            self.depth -= 1;
            result?;
        }
        Ok(())
    }

    // ---- Issuer ----

    pub fn create_trust(&mut self, caller: Address, name: &str) -> CustodyResult<(TrustId, KeyId)> {
        let WorldState { keys, issuer, .. } = &mut *self.state;
        issuer.create_trust(keys, self.events, caller, name)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_key(
        &mut self,
        caller: Address,
        root_key_id: KeyId,
        alias: &str,
        role: KeyRole,
        receiver: Address,
        bind: bool,
    ) -> CustodyResult<KeyId> {
        let WorldState { keys, issuer, .. } = &mut *self.state;
        issuer.create_key(keys, self.events, caller, root_key_id, alias, role, receiver, bind)
    }

    pub fn copy_key(
        &mut self,
        caller: Address,
        root_key_id: KeyId,
        key_id: KeyId,
        receiver: Address,
        bind: bool,
    ) -> CustodyResult<()> {
        let WorldState { keys, issuer, .. } = &mut *self.state;
        issuer.copy_key(keys, self.events, caller, root_key_id, key_id, receiver, bind)
    }

    pub fn soulbind_key(
        &mut self,
        caller: Address,
        root_key_id: KeyId,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        let WorldState { keys, issuer, .. } = &mut *self.state;
        issuer.soulbind_key(keys, self.events, caller, root_key_id, holder, key_id, amount)
    }

    pub fn burn_key(
        &mut self,
        caller: Address,
        root_key_id: KeyId,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        let WorldState { keys, issuer, .. } = &mut *self.state;
        issuer.burn_key(keys, self.events, caller, root_key_id, holder, key_id, amount)
    }

    // ---- Capability store ----

    /// Direct store mint. Only succeeds when `caller` is the issuer.
    pub fn mint_keys(
        &mut self,
        caller: Address,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.state.keys.mint(self.events, caller, holder, key_id, amount)
    }

    /// Direct store burn. Only succeeds when `caller` is the issuer.
    pub fn burn_keys(
        &mut self,
        caller: Address,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.state.keys.burn(self.events, caller, holder, key_id, amount)
    }

    pub fn set_soulbound_minimum(
        &mut self,
        caller: Address,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.state
            .keys
            .set_soulbound_minimum(self.events, caller, holder, key_id, amount)
    }

    pub fn transfer_key(
        &mut self,
        caller: Address,
        from: Address,
        to: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.state.keys.transfer(self.events, caller, from, to, key_id, amount)
    }

    pub fn batch_transfer_keys(
        &mut self,
        caller: Address,
        from: Address,
        to: Address,
        key_ids: &[KeyId],
        amounts: &[Amount],
    ) -> CustodyResult<()> {
        self.state
            .keys
            .batch_transfer(self.events, caller, from, to, key_ids, amounts)
    }

    // ---- Notary ----

    pub fn set_trusted_role(
        &mut self,
        caller: Address,
        trust_id: TrustId,
        role: Role,
        ledger: Address,
        provider: Address,
        trusted: bool,
    ) -> CustodyResult<()> {
        let WorldState {
            keys,
            issuer,
            notary,
            ..
        } = &mut *self.state;
        notary.set_trusted_role(
            issuer,
            keys,
            self.events,
            caller,
            trust_id,
            role,
            ledger,
            provider,
            trusted,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_withdrawal_allowance(
        &mut self,
        caller: Address,
        ledger: Address,
        provider: Address,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
    ) -> CustodyResult<()> {
        let WorldState {
            keys,
            issuer,
            notary,
            ..
        } = &mut *self.state;
        notary.set_withdrawal_allowance(
            issuer,
            keys,
            self.events,
            caller,
            ledger,
            provider,
            key_id,
            arn,
            amount,
        )
    }

    // ---- Ledger ----

    /// Records a deposit by the provider holding `provider`.
    pub fn ledger_deposit(
        &mut self,
        provider: &ProviderHandle,
        ledger: Address,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
    ) -> CustodyResult<BalanceTriple> {
        let provider = self.authenticate(provider)?;
        self.require_ledger(ledger)?;
        let WorldState {
            issuer,
            notary,
            ledger,
            ..
        } = &mut *self.state;
        ledger.deposit(issuer, notary, self.events, provider, key_id, arn, amount)
    }

    /// Records a withdrawal by the provider holding `provider`.
    pub fn ledger_withdrawal(
        &mut self,
        provider: &ProviderHandle,
        ledger: Address,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
    ) -> CustodyResult<BalanceTriple> {
        let provider = self.authenticate(provider)?;
        self.require_ledger(ledger)?;
        let WorldState {
            issuer,
            notary,
            ledger,
            ..
        } = &mut *self.state;
        ledger.withdrawal(issuer, notary, self.events, provider, key_id, arn, amount)
    }

    /// Redistributes key-scoped balance held at `provider` inside a trust.
    /// The scribe is whoever holds `scribe`.
    #[allow(clippy::too_many_arguments)]
    pub fn ledger_distribute(
        &mut self,
        scribe: &ProviderHandle,
        ledger: Address,
        provider: Address,
        arn: Arn,
        source_key: KeyId,
        destinations: &[KeyId],
        amounts: &[Amount],
    ) -> CustodyResult<Amount> {
        let scribe = self.authenticate(scribe)?;
        self.require_ledger(ledger)?;
        let WorldState {
            issuer,
            notary,
            ledger,
            ..
        } = &mut *self.state;
        ledger.distribute(
            issuer,
            notary,
            self.events,
            scribe,
            provider,
            arn,
            source_key,
            destinations,
            amounts,
        )
    }

    fn authenticate(&self, handle: &ProviderHandle) -> CustodyResult<Address> {
        if handle.instance != self.instance {
            return Err(CustodyError::InvalidInput(format!(
                "handle for {} was issued by another chain",
                handle.address
            )));
        }
        Ok(handle.address)
    }

    fn require_ledger(&self, ledger: Address) -> CustodyResult<()> {
        if ledger != self.state.deployment.ledger {
            return Err(CustodyError::InvalidInput(format!("no ledger at {ledger}")));
        }
        Ok(())
    }
}
