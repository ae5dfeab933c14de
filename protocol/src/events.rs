//! # Event Log
//!
//! Every state change in the core is announced by an [`Event`]. Events are
//! appended to the [`EventLog`] in the order they happen and are indexed by
//! provider, trust and key so an auditor can pull the full history of one
//! party without scanning the whole log.
//!
//! The committed log lives on the [`Chain`](crate::chain::Chain), outside the
//! staged world state. Each transaction writes into a fresh staged log that
//! starts where the committed one ends; on commit the staged records are
//! appended, on rejection they are dropped with the rest of the staging copy.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::arn::Arn;
use crate::issuer::KeyRole;
use crate::notary::Role;
use crate::types::{Address, Amount, KeyId, TrustId};

/// A state change announced by a component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    /// Collateral entered the ledger.
    DepositOccurred {
        provider: Address,
        trust_id: TrustId,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
        key_balance: Amount,
        trust_balance: Amount,
        provider_balance: Amount,
    },
    /// Collateral left the ledger.
    WithdrawalOccurred {
        provider: Address,
        trust_id: TrustId,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
        key_balance: Amount,
        trust_balance: Amount,
        provider_balance: Amount,
    },
    /// A scribe moved key-scoped balance between two keys of one trust.
    LedgerTransferOccurred {
        scribe: Address,
        provider: Address,
        arn: Arn,
        trust_id: TrustId,
        from_key: KeyId,
        to_key: KeyId,
        amount: Amount,
        from_balance: Amount,
        to_balance: Amount,
    },
    /// The issuer changed a soulbound minimum.
    SoulboundAmountSet {
        operator: Address,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    },
    /// Keys moved between holders. Mints come from and burns go to the zero address.
    KeyTransferred {
        operator: Address,
        from: Address,
        to: Address,
        key_id: KeyId,
        amount: Amount,
    },
    /// A trust and its root key were created.
    TrustCreated {
        creator: Address,
        trust_id: TrustId,
        name: String,
        root_key: KeyId,
    },
    /// A subordinate key was created.
    KeyCreated {
        creator: Address,
        trust_id: TrustId,
        key_id: KeyId,
        alias: String,
        role: KeyRole,
        receiver: Address,
    },
    /// A root-key holder changed a trust relationship.
    TrustedRoleChanged {
        operator: Address,
        trust_id: TrustId,
        role: Role,
        ledger: Address,
        provider: Address,
        trusted: bool,
    },
    /// A root-key holder set a withdrawal allowance.
    WithdrawalAllowanceAssigned {
        operator: Address,
        ledger: Address,
        provider: Address,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
    },
    /// The notary admitted a withdrawal and consumed allowance.
    WithdrawalApproved {
        ledger: Address,
        provider: Address,
        trust_id: TrustId,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
        remaining: Amount,
    },
}

impl Event {
    /// Short snake-case event name.
    pub fn name(&self) -> &'static str {
        match self {
            Event::DepositOccurred { .. } => "deposit_occurred",
            Event::WithdrawalOccurred { .. } => "withdrawal_occurred",
            Event::LedgerTransferOccurred { .. } => "ledger_transfer_occurred",
            Event::SoulboundAmountSet { .. } => "soulbound_amount_set",
            Event::KeyTransferred { .. } => "key_transferred",
            Event::TrustCreated { .. } => "trust_created",
            Event::KeyCreated { .. } => "key_created",
            Event::TrustedRoleChanged { .. } => "trusted_role_changed",
            Event::WithdrawalAllowanceAssigned { .. } => "withdrawal_allowance_assigned",
            Event::WithdrawalApproved { .. } => "withdrawal_approved",
        }
    }

    /// The provider the event concerns, if any.
    pub fn provider(&self) -> Option<Address> {
        match self {
            Event::DepositOccurred { provider, .. }
            | Event::WithdrawalOccurred { provider, .. }
            | Event::LedgerTransferOccurred { provider, .. }
            | Event::TrustedRoleChanged { provider, .. }
            | Event::WithdrawalAllowanceAssigned { provider, .. }
            | Event::WithdrawalApproved { provider, .. } => Some(*provider),
            _ => None,
        }
    }

    /// The trust the event concerns, if any.
    pub fn trust_id(&self) -> Option<TrustId> {
        match self {
            Event::DepositOccurred { trust_id, .. }
            | Event::WithdrawalOccurred { trust_id, .. }
            | Event::LedgerTransferOccurred { trust_id, .. }
            | Event::TrustCreated { trust_id, .. }
            | Event::KeyCreated { trust_id, .. }
            | Event::TrustedRoleChanged { trust_id, .. }
            | Event::WithdrawalApproved { trust_id, .. } => Some(*trust_id),
            _ => None,
        }
    }

    /// Every key the event concerns.
    pub fn key_ids(&self) -> Vec<KeyId> {
        match self {
            Event::DepositOccurred { key_id, .. }
            | Event::WithdrawalOccurred { key_id, .. }
            | Event::SoulboundAmountSet { key_id, .. }
            | Event::KeyTransferred { key_id, .. }
            | Event::KeyCreated { key_id, .. }
            | Event::WithdrawalAllowanceAssigned { key_id, .. }
            | Event::WithdrawalApproved { key_id, .. } => vec![*key_id],
            Event::LedgerTransferOccurred {
                from_key, to_key, ..
            } => vec![*from_key, *to_key],
            Event::TrustCreated { root_key, .. } => vec![*root_key],
            Event::TrustedRoleChanged { .. } => Vec::new(),
        }
    }
}

/// An event with its position in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Global position, starting at 0.
    pub sequence: u64,
    /// Number of the transaction that emitted it.
    pub transaction: u64,
    /// The event itself.
    pub event: Event,
}

/// Ordered, indexed event history.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    first_sequence: u64,
    records: Vec<EventRecord>,
    by_provider: BTreeMap<Address, Vec<usize>>,
    by_trust: BTreeMap<TrustId, Vec<usize>>,
    by_key: BTreeMap<KeyId, Vec<usize>>,
    current_transaction: u64,
}

impl EventLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a log from persisted records, which must be in sequence order.
    pub fn from_records(records: Vec<EventRecord>) -> Self {
        let mut log = Self {
            first_sequence: records.first().map_or(0, |r| r.sequence),
            ..Self::default()
        };
        for record in records {
            log.push(record);
        }
        log
    }

    /// An empty log for transaction `number` whose first record continues at
    /// `next_sequence`.
    pub(crate) fn staged(next_sequence: u64, number: u64) -> Self {
        Self {
            first_sequence: next_sequence,
            current_transaction: number,
            ..Self::default()
        }
    }

    /// Tags subsequent events with the given transaction number.
    pub(crate) fn begin_transaction(&mut self, number: u64) {
        self.current_transaction = number;
    }

    /// Moves the records of a committed staged log onto the end of this one.
    pub(crate) fn append(&mut self, staged: EventLog) {
        for record in staged.records {
            self.push(record);
        }
    }

    /// Sequence number the next emitted event will carry.
    pub fn next_sequence(&self) -> u64 {
        self.first_sequence + self.records.len() as u64
    }

    /// Appends an event and updates the indexes.
    pub fn emit(&mut self, event: Event) {
        let sequence = self.next_sequence();
        tracing::trace!(
            sequence,
            transaction = self.current_transaction,
            event = event.name(),
            "event emitted"
        );
        self.push(EventRecord {
            sequence,
            transaction: self.current_transaction,
            event,
        });
    }

    fn push(&mut self, record: EventRecord) {
        let position = self.records.len();
        let event = &record.event;

        if let Some(provider) = event.provider() {
            self.by_provider.entry(provider).or_default().push(position);
        }
        if let Some(trust_id) = event.trust_id() {
            self.by_trust.entry(trust_id).or_default().push(position);
        }
        let mut keys = event.key_ids();
        keys.dedup();
        for key_id in keys {
            self.by_key.entry(key_id).or_default().push(position);
        }

        self.records.push(record);
    }

    /// All records in order.
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Records with `sequence >= since`.
    pub fn since(&self, since: u64) -> &[EventRecord] {
        let offset = since.saturating_sub(self.first_sequence);
        let len = self.records.len();
        let start = usize::try_from(offset).map_or(len, |o| o.min(len));
        &self.records[start..]
    }

    /// Records emitted by one transaction.
    pub fn for_transaction(&self, number: u64) -> Vec<&EventRecord> {
        self.records
            .iter()
            .filter(|r| r.transaction == number)
            .collect()
    }

    /// Records concerning a provider, in order.
    pub fn by_provider(&self, provider: &Address) -> Vec<&EventRecord> {
        self.lookup(self.by_provider.get(provider))
    }

    /// Records concerning a trust, in order.
    pub fn by_trust(&self, trust_id: TrustId) -> Vec<&EventRecord> {
        self.lookup(self.by_trust.get(&trust_id))
    }

    /// Records concerning a key, in order.
    pub fn by_key(&self, key_id: KeyId) -> Vec<&EventRecord> {
        self.lookup(self.by_key.get(&key_id))
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nothing has been emitted.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn lookup(&self, positions: Option<&Vec<usize>>) -> Vec<&EventRecord> {
        positions
            .map(|p| p.iter().filter_map(|&i| self.records.get(i)).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit(provider: Address, trust_id: TrustId, key_id: KeyId) -> Event {
        Event::DepositOccurred {
            provider,
            trust_id,
            key_id,
            arn: Arn::native(),
            amount: 10,
            key_balance: 10,
            trust_balance: 10,
            provider_balance: 10,
        }
    }

    #[test]
    fn records_are_sequenced() {
        let mut log = EventLog::new();
        log.begin_transaction(1);
        log.emit(deposit(Address::derive("vault"), 0, 0));
        log.begin_transaction(2);
        log.emit(deposit(Address::derive("vault"), 1, 1));

        assert_eq!(log.len(), 2);
        assert_eq!(log.records()[0].sequence, 0);
        assert_eq!(log.records()[1].sequence, 1);
        assert_eq!(log.records()[1].transaction, 2);
        assert_eq!(log.for_transaction(1).len(), 1);
    }

    #[test]
    fn indexes_by_provider_trust_and_key() {
        let vault = Address::derive("vault");
        let other = Address::derive("other");
        let mut log = EventLog::new();
        log.emit(deposit(vault, 0, 0));
        log.emit(deposit(other, 1, 1));
        log.emit(deposit(vault, 1, 1));

        assert_eq!(log.by_provider(&vault).len(), 2);
        assert_eq!(log.by_provider(&other).len(), 1);
        assert_eq!(log.by_trust(1).len(), 2);
        assert_eq!(log.by_key(0).len(), 1);
        assert!(log.by_key(9).is_empty());
    }

    #[test]
    fn ledger_transfer_indexed_under_both_keys() {
        let mut log = EventLog::new();
        log.emit(Event::LedgerTransferOccurred {
            scribe: Address::derive("scribe"),
            provider: Address::derive("vault"),
            arn: Arn::native(),
            trust_id: 0,
            from_key: 0,
            to_key: 2,
            amount: 5,
            from_balance: 5,
            to_balance: 5,
        });
        assert_eq!(log.by_key(0).len(), 1);
        assert_eq!(log.by_key(2).len(), 1);
    }

    #[test]
    fn since_clamps_to_length() {
        let mut log = EventLog::new();
        log.emit(deposit(Address::derive("vault"), 0, 0));
        assert_eq!(log.since(0).len(), 1);
        assert!(log.since(5).is_empty());
    }

    #[test]
    fn staged_log_continues_committed_sequence() {
        let vault = Address::derive("vault");
        let mut log = EventLog::new();
        log.begin_transaction(1);
        log.emit(deposit(vault, 0, 0));
        log.emit(deposit(vault, 0, 0));

        let mut staged = EventLog::staged(log.next_sequence(), 2);
        assert!(staged.is_empty());
        staged.emit(deposit(vault, 1, 1));
        assert_eq!(staged.records()[0].sequence, 2);
        assert_eq!(staged.since(2).len(), 1);

        log.append(staged);
        assert_eq!(log.len(), 3);
        assert_eq!(log.records()[2].transaction, 2);
        assert_eq!(log.by_trust(1)[0].sequence, 2);
        assert_eq!(log.next_sequence(), 3);
    }

    #[test]
    fn rebuilt_log_keeps_indexes() {
        let vault = Address::derive("vault");
        let mut log = EventLog::new();
        log.emit(deposit(vault, 0, 0));
        log.emit(deposit(Address::derive("other"), 1, 1));

        let rebuilt = EventLog::from_records(log.records().to_vec());
        assert_eq!(rebuilt.records(), log.records());
        assert_eq!(rebuilt.by_provider(&vault).len(), 1);
        assert_eq!(rebuilt.by_key(1).len(), 1);
        assert_eq!(rebuilt.next_sequence(), 2);
    }

    #[test]
    fn events_serialize_snake_case() {
        let json = serde_json::to_value(deposit(Address::derive("vault"), 0, 0)).unwrap();
        assert!(json.get("deposit_occurred").is_some());
    }
}
