//! # Notary
//!
//! The authorization engine. Two tables live here and nowhere else:
//!
//! ```text
//! trusted:    ledger -> trust -> role -> {provider}
//! allowances: ledger -> provider -> key -> ARN -> remaining
//! ```
//!
//! Both are written only by the root-key holder of the trust concerned.
//! Allowances are consumed only by the ledger, through
//! [`Notary::consume_allowance`], which is crate-private.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::arn::Arn;
use crate::error::{CustodyError, CustodyResult};
use crate::events::{Event, EventLog};
use crate::issuer::{require_root_holder, KeyResolver};
use crate::keys::KeyStore;
use crate::types::{Address, Amount, KeyId, TrustId};

/// Functional capacity a provider can be trusted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May deposit to and withdraw from the ledger on the trust's behalf.
    CollateralProvider,
    /// May redistribute key-scoped balances inside the trust.
    Scribe,
}

impl Role {
    /// Every role, in declaration order.
    pub const ALL: [Role; 2] = [Role::CollateralProvider, Role::Scribe];
}

type TrustTable = BTreeMap<Address, BTreeMap<TrustId, BTreeMap<Role, BTreeSet<Address>>>>;
type AllowanceTable = BTreeMap<Address, BTreeMap<Address, BTreeMap<KeyId, BTreeMap<Arn, Amount>>>>;

/// Trust relationships and withdrawal allowances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notary {
    address: Address,
    trusted: TrustTable,
    allowances: AllowanceTable,
}

impl Notary {
    /// Creates a notary with no relationships.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            trusted: BTreeMap::new(),
            allowances: BTreeMap::new(),
        }
    }

    /// The notary's address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sets or clears a trust relationship. Root holder of `trust_id` only.
    ///
    /// Idempotent: setting the current value again succeeds and changes
    /// nothing but still emits the event.
    #[allow(clippy::too_many_arguments)]
    pub fn set_trusted_role(
        &mut self,
        resolver: &dyn KeyResolver,
        keys: &KeyStore,
        events: &mut EventLog,
        caller: Address,
        trust_id: TrustId,
        role: Role,
        ledger: Address,
        provider: Address,
        trusted: bool,
    ) -> CustodyResult<()> {
        require_root_holder(resolver, keys, caller, trust_id)?;

        let by_trust = self.trusted.entry(ledger).or_default();
        if trusted {
            by_trust
                .entry(trust_id)
                .or_default()
                .entry(role)
                .or_default()
                .insert(provider);
        } else if let Some(roles) = by_trust.get_mut(&trust_id) {
            if let Some(set) = roles.get_mut(&role) {
                set.remove(&provider);
            }
        }

        tracing::debug!(
            %caller, trust_id, ?role, %ledger, %provider, trusted,
            "trusted role changed"
        );
        events.emit(Event::TrustedRoleChanged {
            operator: caller,
            trust_id,
            role,
            ledger,
            provider,
            trusted,
        });
        Ok(())
    }

    /// Whether `provider` is trusted by `trust_id` in `role` on `ledger`.
    pub fn is_trusted(
        &self,
        trust_id: TrustId,
        role: Role,
        ledger: Address,
        provider: Address,
    ) -> bool {
        self.trusted
            .get(&ledger)
            .and_then(|t| t.get(&trust_id))
            .and_then(|r| r.get(&role))
            .map(|set| set.contains(&provider))
            .unwrap_or(false)
    }

    /// Providers currently trusted by `trust_id` in `role` on `ledger`.
    pub fn trusted_actors(&self, ledger: Address, trust_id: TrustId, role: Role) -> Vec<Address> {
        self.trusted
            .get(&ledger)
            .and_then(|t| t.get(&trust_id))
            .and_then(|r| r.get(&role))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Overwrites the withdrawal allowance for a key and asset.
    ///
    /// The caller must hold the root key of the trust that owns `key_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn set_withdrawal_allowance(
        &mut self,
        resolver: &dyn KeyResolver,
        keys: &KeyStore,
        events: &mut EventLog,
        caller: Address,
        ledger: Address,
        provider: Address,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
    ) -> CustodyResult<()> {
        let trust_id = resolver.resolve_trust(key_id)?;
        require_root_holder(resolver, keys, caller, trust_id)?;

        self.allowances
            .entry(ledger)
            .or_default()
            .entry(provider)
            .or_default()
            .entry(key_id)
            .or_default()
            .insert(arn, amount);

        tracing::debug!(
            %caller, %ledger, %provider, key_id, %arn, amount,
            "withdrawal allowance set"
        );
        events.emit(Event::WithdrawalAllowanceAssigned {
            operator: caller,
            ledger,
            provider,
            key_id,
            arn,
            amount,
        });
        Ok(())
    }

    /// Remaining allowance.
    pub fn withdrawal_allowance(
        &self,
        ledger: Address,
        provider: Address,
        key_id: KeyId,
        arn: Arn,
    ) -> Amount {
        self.allowances
            .get(&ledger)
            .and_then(|p| p.get(&provider))
            .and_then(|k| k.get(&key_id))
            .and_then(|a| a.get(&arn))
            .copied()
            .unwrap_or(0)
    }

    /// Decrements the allowance by `amount` and returns what remains.
    ///
    /// Fails with `UNAPPROVED_AMOUNT`, leaving the allowance untouched, when
    /// `amount` exceeds it.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn consume_allowance(
        &mut self,
        events: &mut EventLog,
        ledger: Address,
        provider: Address,
        trust_id: TrustId,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
    ) -> CustodyResult<Amount> {
        let approved = self.withdrawal_allowance(ledger, provider, key_id, arn);
        let remaining = approved
            .checked_sub(amount)
            .ok_or(CustodyError::UnapprovedAmount {
                key_id,
                requested: amount,
                approved,
            })?;

        self.allowances
            .entry(ledger)
            .or_default()
            .entry(provider)
            .or_default()
            .entry(key_id)
            .or_default()
            .insert(arn, remaining);

        tracing::debug!(%ledger, %provider, key_id, %arn, amount, remaining, "withdrawal approved");
        events.emit(Event::WithdrawalApproved {
            ledger,
            provider,
            trust_id,
            key_id,
            arn,
            amount,
            remaining,
        });
        Ok(remaining)
    }
}
