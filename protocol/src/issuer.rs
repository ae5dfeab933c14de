//! # Capability Issuer
//!
//! The issuer decides which keys exist, which trust each belongs to and what
//! role each plays. The core only needs three answers from it, captured by the
//! [`KeyResolver`] boundary trait: which trust a key belongs to, whether a key
//! is a root key, and what a trust's root key is.
//!
//! [`TrustIssuer`] is the reference issuer used by the node and the tests. It
//! is the sole administrator of the [`KeyStore`]:
//!
//! - `create_trust` allocates a trust and its root key and mints one unit of
//!   the root key to the creator.
//! - `create_key` lets a root-key holder mint a subordinate key, optionally
//!   soulbinding the unit it just minted.
//! - `copy_key`, `soulbind_key` and `burn_key` are root-holder operations on
//!   existing keys of the same trust.
//!
//! Trust and key ids are sequential from 0.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{CustodyError, CustodyResult};
use crate::events::{Event, EventLog};
use crate::keys::{KeyStore, TransferGuarded};
use crate::types::{Address, Amount, KeyId, TrustId};

/// The boundary the notary and ledger use to classify keys.
pub trait KeyResolver {
    /// The trust `key_id` belongs to. `INVALID_KEY` if it was never issued.
    fn resolve_trust(&self, key_id: KeyId) -> CustodyResult<TrustId>;

    /// Whether `key_id` is the root key of its trust.
    fn is_root_key(&self, key_id: KeyId) -> CustodyResult<bool>;

    /// The root key of `trust_id`. `INVALID_TRUST` if it was never issued.
    fn root_key_of(&self, trust_id: TrustId) -> CustodyResult<KeyId>;
}

/// Fails unless `holder` holds the root key of `trust_id`. Returns that key.
pub fn require_root_holder(
    resolver: &dyn KeyResolver,
    keys: &KeyStore,
    holder: Address,
    trust_id: TrustId,
) -> CustodyResult<KeyId> {
    let root_key = resolver.root_key_of(trust_id)?;
    if keys.balance_of(holder, root_key) == 0 {
        return Err(CustodyError::KeyNotHeld {
            holder,
            key_id: root_key,
        });
    }
    Ok(root_key)
}

/// Function of a key within its trust.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRole {
    /// Owner of the trust. Exactly one per trust.
    Root,
    /// Manages the trust on behalf of the owner.
    Trustee,
    /// Receives distributions.
    Beneficiary,
    /// Any other function named by the owner.
    Custom(String),
}

/// A grouping of assets governed by one root key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trust {
    /// Sequential id.
    pub id: TrustId,
    /// Human-readable name chosen at creation.
    pub name: String,
    /// The root key created with the trust.
    pub root_key: KeyId,
    /// Every key issued for the trust, root included.
    pub keys: BTreeSet<KeyId>,
}

/// Issuer-side metadata for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Owning trust.
    pub trust_id: TrustId,
    /// Label chosen at creation.
    pub alias: String,
    /// Function within the trust.
    pub role: KeyRole,
}

/// Reference issuer. Ids are vector indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustIssuer {
    address: Address,
    trusts: Vec<Trust>,
    keys: Vec<KeyRecord>,
}

impl TrustIssuer {
    /// Creates an issuer with no trusts.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            trusts: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// The issuer's address; the key store's administrator.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Trust metadata.
    pub fn trust(&self, trust_id: TrustId) -> CustodyResult<&Trust> {
        usize::try_from(trust_id)
            .ok()
            .and_then(|i| self.trusts.get(i))
            .ok_or(CustodyError::InvalidTrust(trust_id))
    }

    /// Key metadata.
    pub fn key(&self, key_id: KeyId) -> CustodyResult<&KeyRecord> {
        usize::try_from(key_id)
            .ok()
            .and_then(|i| self.keys.get(i))
            .ok_or(CustodyError::InvalidKey(key_id))
    }

    /// Every trust, in id order.
    pub fn trusts(&self) -> &[Trust] {
        &self.trusts
    }

    /// Number of keys issued so far.
    pub fn key_count(&self) -> u64 {
        self.keys.len() as u64
    }

    /// Creates a trust and mints its root key to `creator`.
    ///
    /// Returns `(trust_id, root_key)`.
    pub fn create_trust(
        &mut self,
        store: &mut KeyStore,
        events: &mut EventLog,
        creator: Address,
        name: &str,
    ) -> CustodyResult<(TrustId, KeyId)> {
        let trust_id = self.trusts.len() as TrustId;
        let root_key = self.allocate_key(trust_id, "root", KeyRole::Root);

        self.trusts.push(Trust {
            id: trust_id,
            name: name.to_string(),
            root_key,
            keys: BTreeSet::from([root_key]),
        });

        store.mint(events, self.address, creator, root_key, 1)?;

        tracing::debug!(%creator, trust_id, root_key, name, "trust created");
        events.emit(Event::TrustCreated {
            creator,
            trust_id,
            name: name.to_string(),
            root_key,
        });
        Ok((trust_id, root_key))
    }

    /// Creates a subordinate key and mints one unit to `receiver`.
    ///
    /// `caller` must hold `root_key_id`, which must be a root key. With
    /// `bind`, the minted unit is soulbound to the receiver.
    #[allow(clippy::too_many_arguments)]
    pub fn create_key(
        &mut self,
        store: &mut KeyStore,
        events: &mut EventLog,
        caller: Address,
        root_key_id: KeyId,
        alias: &str,
        role: KeyRole,
        receiver: Address,
        bind: bool,
    ) -> CustodyResult<KeyId> {
        if store.balance_of(caller, root_key_id) == 0 {
            return Err(CustodyError::KeyNotHeld {
                holder: caller,
                key_id: root_key_id,
            });
        }
        if !self.is_root_key(root_key_id)? {
            return Err(CustodyError::KeyNotRoot(root_key_id));
        }
        if role == KeyRole::Root {
            return Err(CustodyError::InvalidInput(
                "a trust has exactly one root key".into(),
            ));
        }

        let trust_id = self.resolve_trust(root_key_id)?;
        let key_id = self.allocate_key(trust_id, alias, role.clone());
        if let Some(trust) = self.trusts.get_mut(trust_id as usize) {
            trust.keys.insert(key_id);
        }

        store.mint(events, self.address, receiver, key_id, 1)?;
        if bind {
            store.set_soulbound_minimum(events, self.address, receiver, key_id, 1)?;
        }

        tracing::debug!(%caller, trust_id, key_id, alias, %receiver, bind, "key created");
        events.emit(Event::KeyCreated {
            creator: caller,
            trust_id,
            key_id,
            alias: alias.to_string(),
            role,
            receiver,
        });
        Ok(key_id)
    }

    /// Mints another unit of an existing key of the caller's trust.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_key(
        &mut self,
        store: &mut KeyStore,
        events: &mut EventLog,
        caller: Address,
        root_key_id: KeyId,
        key_id: KeyId,
        receiver: Address,
        bind: bool,
    ) -> CustodyResult<()> {
        self.require_same_trust_root(store, caller, root_key_id, key_id)?;

        store.mint(events, self.address, receiver, key_id, 1)?;
        if bind {
            let minimum = store.soulbound_minimum(receiver, key_id);
            let raised = minimum.checked_add(1).ok_or(CustodyError::Overflow)?;
            store.set_soulbound_minimum(events, self.address, receiver, key_id, raised)?;
        }
        Ok(())
    }

    /// Sets the soulbound minimum of `holder` for a key of the caller's trust.
    pub fn soulbind_key(
        &mut self,
        store: &mut KeyStore,
        events: &mut EventLog,
        caller: Address,
        root_key_id: KeyId,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.require_same_trust_root(store, caller, root_key_id, key_id)?;
        store.set_soulbound_minimum(events, self.address, holder, key_id, amount)
    }

    /// Burns units of a key of the caller's trust held by `holder`.
    ///
    /// Subject to the holder's soulbound minimum, so a bound key must be
    /// unbound first.
    pub fn burn_key(
        &mut self,
        store: &mut KeyStore,
        events: &mut EventLog,
        caller: Address,
        root_key_id: KeyId,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    ) -> CustodyResult<()> {
        self.require_same_trust_root(store, caller, root_key_id, key_id)?;
        store.burn(events, self.address, holder, key_id, amount)
    }

    fn allocate_key(&mut self, trust_id: TrustId, alias: &str, role: KeyRole) -> KeyId {
        let key_id = self.keys.len() as KeyId;
        self.keys.push(KeyRecord {
            trust_id,
            alias: alias.to_string(),
            role,
        });
        key_id
    }

    fn require_same_trust_root(
        &self,
        store: &KeyStore,
        caller: Address,
        root_key_id: KeyId,
        key_id: KeyId,
    ) -> CustodyResult<()> {
        if store.balance_of(caller, root_key_id) == 0 {
            return Err(CustodyError::KeyNotHeld {
                holder: caller,
                key_id: root_key_id,
            });
        }
        if !self.is_root_key(root_key_id)? {
            return Err(CustodyError::KeyNotRoot(root_key_id));
        }
        let trust_id = self.resolve_trust(root_key_id)?;
        if self.resolve_trust(key_id)? != trust_id {
            return Err(CustodyError::NonTrustKey { key_id, trust_id });
        }
        Ok(())
    }
}

impl KeyResolver for TrustIssuer {
    fn resolve_trust(&self, key_id: KeyId) -> CustodyResult<TrustId> {
        Ok(self.key(key_id)?.trust_id)
    }

    fn is_root_key(&self, key_id: KeyId) -> CustodyResult<bool> {
        let trust_id = self.resolve_trust(key_id)?;
        Ok(self.trust(trust_id)?.root_key == key_id)
    }

    fn root_key_of(&self, trust_id: TrustId) -> CustodyResult<KeyId> {
        Ok(self.trust(trust_id)?.root_key)
    }
}
