// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Custody Protocol — Core Library
//!
//! Assets deposited into a *trust* are controlled by capability tokens
//! (*keys*). Modules holding the real assets (*providers*) may only move
//! them when the accounting engine and the authorization engine both agree.
//!
//! ## Architecture
//!
//! - **keys** — Capability store. Key balances and soulbound minimums, mutated
//!   only by the issuer and by holders moving their own keys.
//! - **issuer** — Reference issuer: trusts, root keys, subordinate keys, and
//!   the [`KeyResolver`](issuer::KeyResolver) boundary the core uses.
//! - **notary** — Trust relationships and withdrawal allowances.
//! - **ledger** — Nested key / trust / provider balances per asset.
//! - **coins** — Physical native-coin balances.
//! - **chain** — World state and the atomic transaction boundary.
//! - **events** — Ordered, indexed event log.
//! - **arn**, **types**, **error**, **config** — shared vocabulary.
//!
//! ## Ground Rules
//!
//! 1. Every mutation runs inside [`Chain::execute`](chain::Chain::execute);
//!    nothing commits partially.
//! 2. Ledger state is committed before any asset leaves a provider.
//! 3. Tracked balances equal physical balances, or the transaction dies.
//! 4. All money arithmetic is checked.

pub mod arn;
pub mod chain;
pub mod coins;
pub mod config;
pub mod error;
pub mod events;
pub mod issuer;
pub mod keys;
pub mod ledger;
pub mod notary;
pub mod types;

pub use arn::Arn;
pub use chain::{
    Chain, CoinReceiver, Deployment, Holdings, ProviderHandle, Transaction, WorldState,
};
pub use error::{CustodyError, CustodyResult, ErrorCategory};
pub use events::{Event, EventLog, EventRecord};
pub use issuer::{KeyResolver, KeyRole, TrustIssuer};
pub use keys::{KeyStore, SingleOwnerAdmin, TransferGuarded};
pub use ledger::{BalanceContext, BalanceTriple, Ledger};
pub use notary::{Notary, Role};
pub use types::{Address, Amount, KeyId, TrustId};
