//! # State Store
//!
//! Persists the committed [`WorldState`] and event history in an embedded
//! sled database.
//!
//! | Tree       | Key                   | Value                      |
//! |------------|-----------------------|----------------------------|
//! | `state`    | `world`               | `bincode(WorldState)`      |
//! | `metadata` | key (UTF-8)           | value (8B BE)              |
//! | `journal`  | `transaction` (8B BE) | `json(TxRequest)`          |
//! | `events`   | `sequence` (8B BE)    | `bincode(EventRecord)`     |
//!
//! Transaction and sequence numbers are stored big-endian so that sled's
//! lexicographic ordering matches numeric ordering.
//!
//! The snapshot holds component state only. Each commit appends its own
//! events to the `events` tree, so a save costs the size of the state plus
//! the new records, never the whole history.
//!
//! ## Atomicity
//!
//! The snapshot, the metadata, the journal entry and the new events of a
//! transaction land in one multi-tree sled transaction, then the database
//! is flushed.

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use custody_protocol::config::STATE_SCHEMA_VERSION;
use custody_protocol::{EventLog, EventRecord, WorldState};

use crate::calls::TxRequest;

/// Errors raised by the state store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stored schema version {found} does not match {expected}")]
    SchemaMismatch { found: u64, expected: u64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

const WORLD_KEY: &[u8] = b"world";
const META_SCHEMA_VERSION: &[u8] = b"schema_version";
const META_LAST_TRANSACTION: &[u8] = b"last_transaction";

/// sled-backed snapshot store.
#[derive(Debug, Clone)]
pub struct StateStore {
    db: Db,
    state: Tree,
    metadata: Tree,
    journal: Tree,
    events: Tree,
}

impl StateStore {
    /// Opens or creates a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store removed on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            state: db.open_tree("state")?,
            metadata: db.open_tree("metadata")?,
            journal: db.open_tree("journal")?,
            events: db.open_tree("events")?,
            db,
        })
    }

    /// Loads the latest snapshot and the event history, if any.
    ///
    /// The schema marker is checked before the snapshot is decoded, since a
    /// different layout would not decode at all.
    pub fn load(&self) -> StoreResult<Option<(WorldState, EventLog)>> {
        if let Some(found) = self.read_u64(META_SCHEMA_VERSION)? {
            let expected = u64::from(STATE_SCHEMA_VERSION);
            if found != expected {
                return Err(StoreError::SchemaMismatch { found, expected });
            }
        }
        match self.state.get(WORLD_KEY)? {
            Some(bytes) => {
                let state = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some((state, self.load_events()?)))
            }
            None => Ok(None),
        }
    }

    /// Decodes the `events` tree in sequence order. A gap means the history
    /// was written by something other than [`StateStore::save`].
    fn load_events(&self) -> StoreResult<EventLog> {
        let mut records = Vec::with_capacity(self.events.len());
        for (expected, entry) in (0u64..).zip(self.events.iter()) {
            let (_, bytes) = entry?;
            let record: EventRecord = bincode::deserialize(&bytes)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            if record.sequence != expected {
                return Err(StoreError::Serialization(format!(
                    "event {} stored at position {expected}",
                    record.sequence
                )));
            }
            records.push(record);
        }
        Ok(EventLog::from_records(records))
    }

    /// Writes `state`, the events its transaction emitted and, when given,
    /// the request that produced it.
    pub fn save(
        &self,
        state: &WorldState,
        events: &[EventRecord],
        request: Option<&TxRequest>,
    ) -> StoreResult<()> {
        let snapshot =
            bincode::serialize(state).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let records = events
            .iter()
            .map(|r| bincode::serialize(r).map(|bytes| (r.sequence.to_be_bytes(), bytes)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let entry = request
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let number = state.transactions();
        let schema = u64::from(state.schema_version());

        (&self.state, &self.metadata, &self.journal, &self.events)
            .transaction(|(state_tree, metadata, journal, event_tree)| {
                state_tree.insert(WORLD_KEY, snapshot.as_slice())?;
                metadata.insert(META_SCHEMA_VERSION, &schema.to_be_bytes()[..])?;
                metadata.insert(META_LAST_TRANSACTION, &number.to_be_bytes()[..])?;
                if let Some(entry) = &entry {
                    journal.insert(&number.to_be_bytes()[..], entry.as_slice())?;
                }
                for (sequence, bytes) in &records {
                    event_tree.insert(&sequence[..], bytes.as_slice())?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Storage(e) => StoreError::Sled(e),
                TransactionError::Abort(()) => {
                    StoreError::Serialization("state write aborted".into())
                }
            })?;

        self.db.flush()?;
        tracing::debug!(
            transaction = number,
            bytes = snapshot.len(),
            events = records.len(),
            "state persisted"
        );
        Ok(())
    }

    /// Number of the last persisted transaction.
    pub fn last_transaction(&self) -> StoreResult<u64> {
        Ok(self.read_u64(META_LAST_TRANSACTION)?.unwrap_or(0))
    }

    /// The request that produced transaction `number`.
    pub fn journal_entry(&self, number: u64) -> StoreResult<Option<TxRequest>> {
        match self.journal.get(number.to_be_bytes())? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn read_u64(&self, key: &[u8]) -> StoreResult<Option<u64>> {
        match self.metadata.get(key)? {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_ref().try_into().map_err(|_| {
                    StoreError::Serialization(format!(
                        "metadata {} has {} bytes",
                        String::from_utf8_lossy(key),
                        bytes.len()
                    ))
                })?;
                Ok(Some(u64::from_be_bytes(arr)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::Call;
    use custody_protocol::{Address, Chain, Deployment, TransferGuarded};

    fn commit_trust(chain: &mut Chain, owner: Address, name: &str) -> Vec<EventRecord> {
        let before = chain.events().next_sequence();
        chain.execute(|tx| tx.create_trust(owner, name)).unwrap();
        chain.events().since(before).to_vec()
    }

    #[test]
    fn empty_store_has_no_state() {
        let store = StateStore::open_temporary().unwrap();
        assert!(store.load().unwrap().is_none());
        assert_eq!(store.last_transaction().unwrap(), 0);
    }

    #[test]
    fn snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let owner = Address::derive("owner");
        let request = TxRequest {
            caller: owner,
            calls: vec![Call::CreateTrust { name: "family".into() }],
        };

        let mut chain = Chain::new(Deployment::derive("store"));
        let emitted = commit_trust(&mut chain, owner, "family");

        {
            let store = StateStore::open(dir.path()).unwrap();
            store.save(chain.state(), &emitted, Some(&request)).unwrap();
        }

        let store = StateStore::open(dir.path()).unwrap();
        let (state, events) = store.load().unwrap().unwrap();
        assert_eq!(state.transactions(), 1);
        assert_eq!(state.keys().balance_of(owner, 0), 1);
        assert_eq!(store.last_transaction().unwrap(), 1);
        assert_eq!(store.journal_entry(1).unwrap(), Some(request));

        let resumed = Chain::resume(state, events).unwrap();
        assert_eq!(resumed.events().records(), chain.events().records());
    }

    #[test]
    fn snapshot_excludes_event_history() {
        let store = StateStore::open_temporary().unwrap();
        let owner = Address::derive("owner");
        let mut chain = Chain::new(Deployment::derive("store"));

        for name in ["a", "b", "c"] {
            let emitted = commit_trust(&mut chain, owner, name);
            store.save(chain.state(), &emitted, None).unwrap();
        }

        let snapshot = store.state.get(WORLD_KEY).unwrap().unwrap();
        assert_eq!(snapshot.len(), bincode::serialize(chain.state()).unwrap().len());
        assert_eq!(store.events.len(), chain.events().len());

        let (_, events) = store.load().unwrap().unwrap();
        assert_eq!(events.records(), chain.events().records());
        assert_eq!(events.by_trust(2).len(), chain.events().by_trust(2).len());
    }

    #[test]
    fn gap_in_event_history_is_refused() {
        let store = StateStore::open_temporary().unwrap();
        let owner = Address::derive("owner");
        let mut chain = Chain::new(Deployment::derive("store"));

        let first = commit_trust(&mut chain, owner, "a");
        store.save(chain.state(), &first, None).unwrap();
        let second = commit_trust(&mut chain, owner, "b");
        store.save(chain.state(), &second, None).unwrap();
        store.events.remove(0u64.to_be_bytes()).unwrap();

        assert!(matches!(store.load(), Err(StoreError::Serialization(_))));
    }

    #[test]
    fn foreign_schema_is_refused() {
        let store = StateStore::open_temporary().unwrap();
        store
            .metadata
            .insert(META_SCHEMA_VERSION, &99u64.to_be_bytes()[..])
            .unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::SchemaMismatch { found: 99, .. })
        ));
    }
}
