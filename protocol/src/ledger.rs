//! # Ledger
//!
//! The accounting engine. For every asset (ARN) the ledger keeps three coupled
//! counters:
//!
//! ```text
//! keys:      key   -> provider -> ARN -> amount
//! trusts:    trust -> provider -> ARN -> amount
//! providers: provider          -> ARN -> amount
//! ```
//!
//! Two invariants hold after every committed operation:
//!
//! - For fixed `(trust, provider, arn)`, the key-scoped balances of the
//!   trust's keys sum to the trust-scoped balance.
//! - For fixed `(provider, arn)`, the trust-scoped balances sum to the
//!   provider-scoped balance, which the provider checks against its physical
//!   holdings after every call.
//!
//! Entries are created lazily and never deleted; they may rest at zero.
//!
//! The ledger never moves assets itself. Providers call [`Ledger::deposit`]
//! and [`Ledger::withdrawal`] and move the real asset afterwards; scribes call
//! [`Ledger::distribute`] to shift key-scoped balance inside a trust.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::arn::Arn;
use crate::error::{CustodyError, CustodyResult};
use crate::events::{Event, EventLog};
use crate::issuer::KeyResolver;
use crate::notary::{Notary, Role};
use crate::types::{Address, Amount, KeyId, TrustId};

/// Scope of a balance query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "context", content = "id", rename_all = "snake_case")]
pub enum BalanceContext {
    /// The whole ledger.
    Ledger,
    /// One trust.
    Trust(TrustId),
    /// One key.
    Key(KeyId),
}

/// Balances after a deposit or withdrawal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceTriple {
    /// Key-scoped balance.
    pub key: Amount,
    /// Trust-scoped balance.
    pub trust: Amount,
    /// Provider-scoped balance.
    pub provider: Amount,
}

type Books = BTreeMap<Address, BTreeMap<Arn, Amount>>;

/// Nested balances for every asset held by every provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    address: Address,
    providers: Books,
    trusts: BTreeMap<TrustId, Books>,
    keys: BTreeMap<KeyId, Books>,
}

fn read(books: Option<&Books>, provider: Address, arn: Arn) -> Amount {
    books
        .and_then(|b| b.get(&provider))
        .and_then(|a| a.get(&arn))
        .copied()
        .unwrap_or(0)
}

fn sum_providers(books: Option<&Books>, arn: Arn) -> CustodyResult<Amount> {
    books
        .into_iter()
        .flat_map(|b| b.values())
        .filter_map(|a| a.get(&arn))
        .try_fold(0u128, |acc, v| acc.checked_add(*v).ok_or(CustodyError::Overflow))
}

fn write(books: &mut Books, provider: Address, arn: Arn, value: Amount) {
    books.entry(provider).or_default().insert(arn, value);
}

impl Ledger {
    /// Creates an empty ledger.
    pub fn new(address: Address) -> Self {
        Self {
            address,
            providers: BTreeMap::new(),
            trusts: BTreeMap::new(),
            keys: BTreeMap::new(),
        }
    }

    /// The ledger's address, used as its identity at the notary.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Records collateral entering the ledger through `provider`.
    ///
    /// Deposits are made against a trust's root key, and the provider must be
    /// trusted by the trust as a collateral provider.
    #[allow(clippy::too_many_arguments)]
    pub fn deposit(
        &mut self,
        resolver: &dyn KeyResolver,
        notary: &Notary,
        events: &mut EventLog,
        provider: Address,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
    ) -> CustodyResult<BalanceTriple> {
        let trust_id = resolver.resolve_trust(key_id)?;
        if !resolver.is_root_key(key_id)? {
            return Err(CustodyError::KeyNotRoot(key_id));
        }
        self.require_trusted(notary, trust_id, Role::CollateralProvider, provider)?;

        let add = |v: Amount| v.checked_add(amount).ok_or(CustodyError::Overflow);
        let balances = BalanceTriple {
            key: add(read(self.keys.get(&key_id), provider, arn))?,
            trust: add(read(self.trusts.get(&trust_id), provider, arn))?,
            provider: add(read(Some(&self.providers), provider, arn))?,
        };
        self.store(trust_id, key_id, provider, arn, balances);

        tracing::debug!(
            %provider, trust_id, key_id, %arn, amount,
            key_balance = balances.key,
            trust_balance = balances.trust,
            provider_balance = balances.provider,
            "deposit recorded"
        );
        events.emit(Event::DepositOccurred {
            provider,
            trust_id,
            key_id,
            arn,
            amount,
            key_balance: balances.key,
            trust_balance: balances.trust,
            provider_balance: balances.provider,
        });
        Ok(balances)
    }

    /// Records collateral leaving the ledger through `provider`.
    ///
    /// Any key of the trust may withdraw, up to its notarized allowance and
    /// its key-scoped balance.
    #[allow(clippy::too_many_arguments)]
    pub fn withdrawal(
        &mut self,
        resolver: &dyn KeyResolver,
        notary: &mut Notary,
        events: &mut EventLog,
        provider: Address,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
    ) -> CustodyResult<BalanceTriple> {
        let trust_id = resolver.resolve_trust(key_id)?;
        self.require_trusted(notary, trust_id, Role::CollateralProvider, provider)?;
        notary.consume_allowance(events, self.address, provider, trust_id, key_id, arn, amount)?;

        let available = read(self.keys.get(&key_id), provider, arn);
        if available < amount {
            return Err(CustodyError::Overdraft {
                key_id,
                requested: amount,
                available,
            });
        }

        let sub = |v: Amount| v.checked_sub(amount).ok_or(CustodyError::Underflow);
        let balances = BalanceTriple {
            key: sub(available)?,
            trust: sub(read(self.trusts.get(&trust_id), provider, arn))?,
            provider: sub(read(Some(&self.providers), provider, arn))?,
        };
        self.store(trust_id, key_id, provider, arn, balances);

        tracing::debug!(
            %provider, trust_id, key_id, %arn, amount,
            key_balance = balances.key,
            trust_balance = balances.trust,
            provider_balance = balances.provider,
            "withdrawal recorded"
        );
        events.emit(Event::WithdrawalOccurred {
            provider,
            trust_id,
            key_id,
            arn,
            amount,
            key_balance: balances.key,
            trust_balance: balances.trust,
            provider_balance: balances.provider,
        });
        Ok(balances)
    }

    /// Moves key-scoped balance from `source_key` to other keys of the same
    /// trust, at one collateral provider.
    ///
    /// The caller must be trusted as a scribe and `provider` as a collateral
    /// provider. Trust and provider totals do not change. Returns the source
    /// key's remaining balance.
    #[allow(clippy::too_many_arguments)]
    pub fn distribute(
        &mut self,
        resolver: &dyn KeyResolver,
        notary: &Notary,
        events: &mut EventLog,
        scribe: Address,
        provider: Address,
        arn: Arn,
        source_key: KeyId,
        destinations: &[KeyId],
        amounts: &[Amount],
    ) -> CustodyResult<Amount> {
        if destinations.len() != amounts.len() {
            return Err(CustodyError::InvalidInput(format!(
                "{} destination keys but {} amounts",
                destinations.len(),
                amounts.len()
            )));
        }

        let trust_id = resolver.resolve_trust(source_key)?;
        self.require_trusted(notary, trust_id, Role::Scribe, scribe)?;
        self.require_trusted(notary, trust_id, Role::CollateralProvider, provider)?;

        let mut total: Amount = 0;
        for (&key_id, &amount) in destinations.iter().zip(amounts) {
            if resolver.resolve_trust(key_id)? != trust_id {
                return Err(CustodyError::NonTrustKey { key_id, trust_id });
            }
            total = total.checked_add(amount).ok_or(CustodyError::Overflow)?;
        }

        let available = read(self.keys.get(&source_key), provider, arn);
        if available < total {
            return Err(CustodyError::Overdraft {
                key_id: source_key,
                requested: total,
                available,
            });
        }

        for (&key_id, &amount) in destinations.iter().zip(amounts) {
            let from_balance = read(self.keys.get(&source_key), provider, arn)
                .checked_sub(amount)
                .ok_or(CustodyError::Underflow)?;
            write(self.keys.entry(source_key).or_default(), provider, arn, from_balance);

            let to_balance = read(self.keys.get(&key_id), provider, arn)
                .checked_add(amount)
                .ok_or(CustodyError::Overflow)?;
            write(self.keys.entry(key_id).or_default(), provider, arn, to_balance);

            tracing::debug!(
                %scribe, %provider, trust_id, source_key, key_id, amount,
                "balance distributed"
            );
            events.emit(Event::LedgerTransferOccurred {
                scribe,
                provider,
                arn,
                trust_id,
                from_key: source_key,
                to_key: key_id,
                amount,
                from_balance,
                to_balance,
            });
        }

        Ok(read(self.keys.get(&source_key), provider, arn))
    }

    /// Balance of `arn` in `context`, at one provider or summed over all.
    ///
    /// In the [`BalanceContext::Ledger`] context with a provider, this is the
    /// provider-scoped balance. A sum over providers that does not fit in an
    /// [`Amount`] fails with [`CustodyError::Overflow`].
    pub fn balance(
        &self,
        context: BalanceContext,
        provider: Option<Address>,
        arn: Arn,
    ) -> CustodyResult<Amount> {
        let books = self.books(context);
        match provider {
            Some(provider) => Ok(read(books, provider, arn)),
            None => sum_providers(books, arn),
        }
    }

    /// Balances for several ARNs, in input order.
    pub fn balances(
        &self,
        context: BalanceContext,
        provider: Option<Address>,
        arns: &[Arn],
    ) -> CustodyResult<Vec<Amount>> {
        arns.iter()
            .map(|arn| self.balance(context, provider, *arn))
            .collect()
    }

    /// Every ARN with an entry in `context`, including entries resting at zero.
    pub fn arn_registry(&self, context: BalanceContext) -> Vec<Arn> {
        let arns: BTreeSet<Arn> = self
            .books(context)
            .map(|b| b.values().flat_map(|a| a.keys().copied()).collect())
            .unwrap_or_default();
        arns.into_iter().collect()
    }

    /// Every provider with an entry in `context`, optionally for one ARN.
    pub fn provider_registry(&self, context: BalanceContext, arn: Option<Arn>) -> Vec<Address> {
        self.books(context)
            .map(|b| {
                b.iter()
                    .filter(|(_, arns)| arn.map_or(true, |a| arns.contains_key(&a)))
                    .map(|(provider, _)| *provider)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// ARNs and balances held by one provider.
    pub fn provider_balances(&self, provider: Address) -> BTreeMap<Arn, Amount> {
        self.providers.get(&provider).cloned().unwrap_or_default()
    }

    /// Recomputes both nesting invariants over every entry.
    pub fn audit(&self, resolver: &dyn KeyResolver) -> CustodyResult<()> {
        let mut key_sums: BTreeMap<(TrustId, Address, Arn), Amount> = BTreeMap::new();
        for (key_id, books) in &self.keys {
            let trust_id = resolver.resolve_trust(*key_id)?;
            for (provider, arns) in books {
                for (arn, amount) in arns {
                    let sum = key_sums.entry((trust_id, *provider, *arn)).or_insert(0);
                    *sum = sum.checked_add(*amount).ok_or(CustodyError::Overflow)?;
                }
            }
        }

        let mut trust_sums: BTreeMap<(Address, Arn), Amount> = BTreeMap::new();
        for (trust_id, books) in &self.trusts {
            for (provider, arns) in books {
                for (arn, amount) in arns {
                    let keyed = key_sums.remove(&(*trust_id, *provider, *arn)).unwrap_or(0);
                    if keyed != *amount {
                        return Err(CustodyError::InvariantBreach(format!(
                            "trust {trust_id} at {provider}: {amount} of {arn}, keys sum to {keyed}"
                        )));
                    }
                    let sum = trust_sums.entry((*provider, *arn)).or_insert(0);
                    *sum = sum.checked_add(*amount).ok_or(CustodyError::Overflow)?;
                }
            }
        }
        if let Some(((trust_id, provider, arn), amount)) =
            key_sums.into_iter().find(|(_, amount)| *amount > 0)
        {
            return Err(CustodyError::InvariantBreach(format!(
                "keys of trust {trust_id} at {provider} hold {amount} of {arn} with no trust entry"
            )));
        }

        for (provider, arns) in &self.providers {
            for (arn, amount) in arns {
                let trusted = trust_sums.remove(&(*provider, *arn)).unwrap_or(0);
                if trusted != *amount {
                    return Err(CustodyError::InvariantBreach(format!(
                        "provider {provider} holds {amount} of {arn}, trusts sum to {trusted}"
                    )));
                }
            }
        }
        if let Some(((provider, arn), amount)) =
            trust_sums.into_iter().find(|(_, amount)| *amount > 0)
        {
            return Err(CustodyError::InvariantBreach(format!(
                "trusts at {provider} hold {amount} of {arn} with no provider entry"
            )));
        }

        Ok(())
    }

    fn books(&self, context: BalanceContext) -> Option<&Books> {
        match context {
            BalanceContext::Ledger => Some(&self.providers),
            BalanceContext::Trust(trust_id) => self.trusts.get(&trust_id),
            BalanceContext::Key(key_id) => self.keys.get(&key_id),
        }
    }

    fn require_trusted(
        &self,
        notary: &Notary,
        trust_id: TrustId,
        role: Role,
        provider: Address,
    ) -> CustodyResult<()> {
        if !notary.is_trusted(trust_id, role, self.address, provider) {
            return Err(CustodyError::UntrustedProvider {
                provider,
                trust_id,
                role,
            });
        }
        Ok(())
    }

    fn store(
        &mut self,
        trust_id: TrustId,
        key_id: KeyId,
        provider: Address,
        arn: Arn,
        balances: BalanceTriple,
    ) {
        write(self.keys.entry(key_id).or_default(), provider, arn, balances.key);
        write(self.trusts.entry(trust_id).or_default(), provider, arn, balances.trust);
        write(&mut self.providers, provider, arn, balances.provider);
    }
}
