//! The node's execution service.
//!
//! Owns the [`Chain`], serializes submissions through a mutex, persists
//! every committed transaction and fans its events out to subscribers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use custody_contracts::NativeVault;
use custody_protocol::config::MAX_CALLS_PER_TRANSACTION;
use custody_protocol::error::{CustodyError, CustodyResult};
use custody_protocol::{Chain, EventRecord};

use crate::calls::{self, Call, CallOutcome, TxRequest};
use crate::metrics::SharedMetrics;
use crate::store::{StateStore, StoreError};

/// Why a submission did not produce a receipt.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The core rejected the transaction; nothing changed.
    #[error(transparent)]
    Rejected(#[from] CustodyError),

    /// The transaction committed in memory but could not be persisted.
    #[error("transaction committed but not persisted: {0}")]
    Store(#[from] StoreError),
}

/// Result of a committed submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub transaction: u64,
    pub outcomes: Vec<CallOutcome>,
    pub events: Vec<EventRecord>,
}

pub struct CustodyService {
    chain: Mutex<Chain>,
    vault: Arc<NativeVault>,
    store: StateStore,
    metrics: SharedMetrics,
    events: broadcast::Sender<EventRecord>,
    faucet: bool,
}

impl CustodyService {
    pub fn new(
        chain: Chain,
        vault: Arc<NativeVault>,
        store: StateStore,
        metrics: SharedMetrics,
        events: broadcast::Sender<EventRecord>,
        faucet: bool,
    ) -> Self {
        metrics.event_log_length.set(chain.events().len() as i64);
        Self {
            chain: Mutex::new(chain),
            vault,
            store,
            metrics,
            events,
            faucet,
        }
    }

    pub fn vault(&self) -> &NativeVault {
        &self.vault
    }

    pub fn faucet_enabled(&self) -> bool {
        self.faucet
    }

    /// Subscribes to events of committed transactions.
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.events.subscribe()
    }

    /// Runs `f` against the committed chain.
    pub fn read<R>(&self, f: impl FnOnce(&Chain) -> R) -> R {
        f(&self.chain.lock())
    }

    /// Executes `request` as one atomic transaction.
    pub fn submit(&self, request: &TxRequest) -> Result<TxReceipt, SubmitError> {
        let timer = self.metrics.transaction_latency_seconds.start_timer();
        let result = self.execute_and_persist(request);
        timer.observe_duration();

        match &result {
            Ok(receipt) => {
                self.metrics.transactions_committed_total.inc();
                let count = |f: fn(&Call) -> bool| request.calls.iter().filter(|c| f(c)).count();
                self.metrics
                    .deposits_total
                    .inc_by(count(|c| matches!(c, Call::VaultDeposit { .. })) as u64);
                self.metrics
                    .withdrawals_total
                    .inc_by(count(|c| matches!(c, Call::VaultWithdrawal { .. })) as u64);
                for record in &receipt.events {
                    // No subscribers is not an error.
                    let _ = self.events.send(record.clone());
                }
            }
            Err(SubmitError::Rejected(err)) => {
                self.metrics.record_rejection(err.reason(), err.is_fatal());
            }
            Err(SubmitError::Store(err)) => {
                tracing::error!(error = %err, "failed to persist committed state");
            }
        }
        result
    }

    fn execute_and_persist(&self, request: &TxRequest) -> Result<TxReceipt, SubmitError> {
        validate(request)?;

        let mut chain = self.chain.lock();
        let first_event = chain.events().next_sequence();
        let outcomes = chain.execute(|tx| {
            request
                .calls
                .iter()
                .map(|call| calls::apply(tx, &self.vault, self.faucet, request.caller, call))
                .collect::<CustodyResult<Vec<_>>>()
        })?;

        let events = chain.events().since(first_event).to_vec();
        self.metrics.event_log_length.set(chain.events().len() as i64);
        self.store.save(chain.state(), &events, Some(request))?;

        Ok(TxReceipt {
            transaction: chain.state().transactions(),
            outcomes,
            events,
        })
    }
}

fn validate(request: &TxRequest) -> CustodyResult<()> {
    if request.calls.is_empty() {
        return Err(CustodyError::InvalidInput("transaction has no calls".into()));
    }
    if request.calls.len() > MAX_CALLS_PER_TRANSACTION {
        return Err(CustodyError::InvalidInput(format!(
            "transaction has {} calls, at most {} allowed",
            request.calls.len(),
            MAX_CALLS_PER_TRANSACTION
        )));
    }
    Ok(())
}
