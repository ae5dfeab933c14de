//! Error vocabulary of the custody core.
//!
//! Every failure in the store, notary, ledger or a provider is a
//! [`CustodyError`]. Each variant maps to a stable wire reason (the string
//! callers match against) and to an [`ErrorCategory`]. Only the invariant
//! category is fatal: it means the books disagree with themselves or with the
//! physical holdings, which is a bug and never a caller mistake.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::notary::Role;
use crate::types::{Address, Amount, KeyId, TrustId};

/// Convenience alias used across the crate.
pub type CustodyResult<T> = Result<T, CustodyError>;

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The caller lacks the required key or role.
    Authorization,
    /// An explicit, settable ceiling was exceeded.
    PolicyLimit,
    /// Tracked balances do not cover the request.
    Accounting,
    /// Internal consistency check failed. Never retried.
    Invariant,
    /// The request itself is malformed or references unknown ids.
    Input,
}

/// Errors raised by the custody core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    /// A capability-store mutation was attempted by someone other than the issuer.
    #[error("NOT_ISSUER: {caller} is not the registered key issuer")]
    NotIssuer {
        /// The rejected caller.
        caller: Address,
    },

    /// A transfer would leave a holder below its soulbound minimum.
    #[error(
        "SOUL_BREACH: {holder} must retain {minimum} of key {key_id}, transfer leaves {remaining}"
    )]
    SoulBreach {
        /// Holder the keys would leave.
        holder: Address,
        /// Key being moved.
        key_id: KeyId,
        /// Soulbound minimum for the pair.
        minimum: Amount,
        /// Balance the transfer would leave behind.
        remaining: Amount,
    },

    /// The caller does not hold the key it acts with.
    #[error("KEY_NOT_HELD: {holder} does not hold key {key_id}")]
    KeyNotHeld {
        /// The caller.
        holder: Address,
        /// The key it claimed.
        key_id: KeyId,
    },

    /// The operation requires a trust's root key.
    #[error("KEY_NOT_ROOT: key {0} is not a root key")]
    KeyNotRoot(KeyId),

    /// The provider is not trusted by the trust in the required role.
    #[error("UNTRUSTED_PROVIDER: {provider} is not trusted as {role:?} by trust {trust_id}")]
    UntrustedProvider {
        /// The calling provider.
        provider: Address,
        /// The trust whose relationship was checked.
        trust_id: TrustId,
        /// The role that was required.
        role: Role,
    },

    /// A withdrawal exceeds the remaining allowance.
    #[error("UNAPPROVED_AMOUNT: key {key_id} requested {requested}, allowance is {approved}")]
    UnapprovedAmount {
        /// Key the withdrawal is for.
        key_id: KeyId,
        /// Requested amount.
        requested: Amount,
        /// Remaining allowance.
        approved: Amount,
    },

    /// A withdrawal or distribution exceeds the key-scoped balance.
    #[error("OVERDRAFT: key {key_id} requested {requested}, holds {available}")]
    Overdraft {
        /// Key being debited.
        key_id: KeyId,
        /// Requested amount.
        requested: Amount,
        /// Key-scoped balance.
        available: Amount,
    },

    /// The key id was never issued.
    #[error("INVALID_KEY: key {0} does not exist")]
    InvalidKey(KeyId),

    /// The trust id was never issued.
    #[error("INVALID_TRUST: trust {0} does not exist")]
    InvalidTrust(TrustId),

    /// A key from another trust was named where a key of this trust is required.
    #[error("NON_TRUST_KEY: key {key_id} does not belong to trust {trust_id}")]
    NonTrustKey {
        /// The foreign key.
        key_id: KeyId,
        /// The trust being operated on.
        trust_id: TrustId,
    },

    /// A holder transfer was initiated by someone other than the holder.
    #[error("NOT_APPROVED: {caller} may not move keys held by {from}")]
    NotApproved {
        /// The caller.
        caller: Address,
        /// The holder.
        from: Address,
    },

    /// The holder does not have enough units of the key.
    #[error(
        "INSUFFICIENT_KEYS: {holder} holds {balance} of key {key_id}, tried to move {requested}"
    )]
    InsufficientKeys {
        /// The holder.
        holder: Address,
        /// The key.
        key_id: KeyId,
        /// Current holding.
        balance: Amount,
        /// Attempted movement.
        requested: Amount,
    },

    /// A coin payment exceeds the payer's physical balance.
    #[error("INSUFFICIENT_FUNDS: {holder} has {balance}, tried to pay {requested}")]
    InsufficientFunds {
        /// The payer.
        holder: Address,
        /// Physical balance.
        balance: Amount,
        /// Attempted payment.
        requested: Amount,
    },

    /// The recipient refused an unsolicited coin payment.
    #[error("PAYMENT_REJECTED: {recipient} does not accept direct payments")]
    PaymentRejected {
        /// The refusing recipient.
        recipient: Address,
    },

    /// A credit would overflow the amount type.
    #[error("OVERFLOW: arithmetic overflow")]
    Overflow,

    /// An aggregate fell below zero after the overdraft check passed.
    #[error("UNDERFLOW: aggregate balance underflow")]
    Underflow,

    /// Receiver hooks nested too deeply.
    #[error("CALL_DEPTH_EXCEEDED: nesting depth {0}")]
    CallDepthExceeded(usize),

    /// Malformed request.
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// A persisted state uses a schema this build does not understand.
    #[error("UNSUPPORTED_SCHEMA: found version {found}, expected {expected}")]
    UnsupportedSchema {
        /// Version found in the snapshot.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// Tracked and physical balances diverged, or nested balances disagree.
    #[error("INVARIANT_BREACH: {0}")]
    InvariantBreach(String),
}

impl CustodyError {
    /// The wire-level reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            CustodyError::NotIssuer { .. } => "NOT_ISSUER",
            CustodyError::SoulBreach { .. } => "SOUL_BREACH",
            CustodyError::KeyNotHeld { .. } => "KEY_NOT_HELD",
            CustodyError::KeyNotRoot(_) => "KEY_NOT_ROOT",
            CustodyError::UntrustedProvider { .. } => "UNTRUSTED_PROVIDER",
            CustodyError::UnapprovedAmount { .. } => "UNAPPROVED_AMOUNT",
            CustodyError::Overdraft { .. } => "OVERDRAFT",
            CustodyError::InvalidKey(_) => "INVALID_KEY",
            CustodyError::InvalidTrust(_) => "INVALID_TRUST",
            CustodyError::NonTrustKey { .. } => "NON_TRUST_KEY",
            CustodyError::NotApproved { .. } => "NOT_APPROVED",
            CustodyError::InsufficientKeys { .. } => "INSUFFICIENT_KEYS",
            CustodyError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            CustodyError::PaymentRejected { .. } => "PAYMENT_REJECTED",
            CustodyError::Overflow => "OVERFLOW",
            CustodyError::Underflow => "UNDERFLOW",
            CustodyError::CallDepthExceeded(_) => "CALL_DEPTH_EXCEEDED",
            CustodyError::InvalidInput(_) => "INVALID_INPUT",
            CustodyError::UnsupportedSchema { .. } => "UNSUPPORTED_SCHEMA",
            CustodyError::InvariantBreach(_) => "INVARIANT_BREACH",
        }
    }

    /// The error's category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CustodyError::NotIssuer { .. }
            | CustodyError::KeyNotHeld { .. }
            | CustodyError::KeyNotRoot(_)
            | CustodyError::UntrustedProvider { .. }
            | CustodyError::NonTrustKey { .. }
            | CustodyError::NotApproved { .. } => ErrorCategory::Authorization,
            CustodyError::UnapprovedAmount { .. } | CustodyError::SoulBreach { .. } => {
                ErrorCategory::PolicyLimit
            }
            CustodyError::Overdraft { .. }
            | CustodyError::InsufficientKeys { .. }
            | CustodyError::InsufficientFunds { .. }
            | CustodyError::Overflow => ErrorCategory::Accounting,
            CustodyError::Underflow | CustodyError::InvariantBreach(_) => ErrorCategory::Invariant,
            CustodyError::InvalidKey(_)
            | CustodyError::InvalidTrust(_)
            | CustodyError::PaymentRejected { .. }
            | CustodyError::CallDepthExceeded(_)
            | CustodyError::InvalidInput(_)
            | CustodyError::UnsupportedSchema { .. } => ErrorCategory::Input,
        }
    }

    /// Returns `true` when the error signals a logic defect rather than a
    /// caller mistake.
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Invariant
    }
}
