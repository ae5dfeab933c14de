//! Wire form of the operations a client may submit.
//!
//! `POST /tx` carries a caller and a list of [`Call`]s. The whole list runs
//! inside one [`Chain::execute`](custody_protocol::Chain::execute): either
//! every call commits or none does.
//!
//! The devnet node trusts the `caller` field as given. Authenticating it is
//! the job of whatever sits in front of the node. Ledger bookings need a
//! provider handle, which a request cannot carry, so they only happen
//! through the vault calls.

use serde::{Deserialize, Serialize};

use custody_contracts::NativeVault;
use custody_protocol::error::{CustodyError, CustodyResult};
use custody_protocol::{Address, Amount, Arn, KeyId, KeyRole, Role, Transaction, TrustId};

/// A batch of calls from one caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxRequest {
    pub caller: Address,
    pub calls: Vec<Call>,
}

/// One operation within a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Call {
    /// Mint native coins to `to`. Devnet only.
    Faucet { to: Address, amount: Amount },
    /// Pay native coins to `to`.
    TransferCoins { to: Address, amount: Amount },
    CreateTrust { name: String },
    CreateKey {
        root_key: KeyId,
        alias: String,
        role: KeyRole,
        receiver: Address,
        #[serde(default)]
        bind: bool,
    },
    CopyKey {
        root_key: KeyId,
        key_id: KeyId,
        receiver: Address,
        #[serde(default)]
        bind: bool,
    },
    SoulbindKey {
        root_key: KeyId,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    },
    BurnKey {
        root_key: KeyId,
        holder: Address,
        key_id: KeyId,
        amount: Amount,
    },
    /// Move keys held by the caller.
    TransferKey {
        to: Address,
        key_id: KeyId,
        amount: Amount,
    },
    BatchTransferKeys {
        to: Address,
        key_ids: Vec<KeyId>,
        amounts: Vec<Amount>,
    },
    /// `ledger` defaults to the node's ledger.
    SetTrustedRole {
        trust_id: TrustId,
        role: Role,
        #[serde(default)]
        ledger: Option<Address>,
        provider: Address,
        trusted: bool,
    },
    SetWithdrawalAllowance {
        #[serde(default)]
        ledger: Option<Address>,
        provider: Address,
        key_id: KeyId,
        arn: Arn,
        amount: Amount,
    },
    /// Deposit `value` coins into the native vault against `key_id`.
    VaultDeposit { key_id: KeyId, value: Amount },
    /// Withdraw from the native vault to the caller.
    VaultWithdrawal { key_id: KeyId, amount: Amount },
}

impl Call {
    pub fn name(&self) -> &'static str {
        match self {
            Call::Faucet { .. } => "faucet",
            Call::TransferCoins { .. } => "transfer_coins",
            Call::CreateTrust { .. } => "create_trust",
            Call::CreateKey { .. } => "create_key",
            Call::CopyKey { .. } => "copy_key",
            Call::SoulbindKey { .. } => "soulbind_key",
            Call::BurnKey { .. } => "burn_key",
            Call::TransferKey { .. } => "transfer_key",
            Call::BatchTransferKeys { .. } => "batch_transfer_keys",
            Call::SetTrustedRole { .. } => "set_trusted_role",
            Call::SetWithdrawalAllowance { .. } => "set_withdrawal_allowance",
            Call::VaultDeposit { .. } => "vault_deposit",
            Call::VaultWithdrawal { .. } => "vault_withdrawal",
        }
    }
}

/// Result of one call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallOutcome {
    Done,
    TrustCreated { trust_id: TrustId, root_key: KeyId },
    KeyCreated { key_id: KeyId },
    Balances {
        key: Amount,
        trust: Amount,
        provider: Amount,
    },
}

/// Executes one call on behalf of `caller`.
pub fn apply(
    tx: &mut Transaction<'_>,
    vault: &NativeVault,
    faucet_enabled: bool,
    caller: Address,
    call: &Call,
) -> CustodyResult<CallOutcome> {
    let ledger_or_default = |ledger: Option<Address>| ledger.unwrap_or(vault.ledger());

    let outcome = match call {
        Call::Faucet { to, amount } => {
            if !faucet_enabled {
                return Err(CustodyError::InvalidInput("faucet is disabled".into()));
            }
            tx.faucet(*to, *amount)?;
            CallOutcome::Done
        }
        Call::TransferCoins { to, amount } => {
            tx.transfer_coins(caller, *to, *amount)?;
            CallOutcome::Done
        }
        Call::CreateTrust { name } => {
            let (trust_id, root_key) = tx.create_trust(caller, name)?;
            CallOutcome::TrustCreated { trust_id, root_key }
        }
        Call::CreateKey {
            root_key,
            alias,
            role,
            receiver,
            bind,
        } => {
            let key_id = tx.create_key(caller, *root_key, alias, role.clone(), *receiver, *bind)?;
            CallOutcome::KeyCreated { key_id }
        }
        Call::CopyKey {
            root_key,
            key_id,
            receiver,
            bind,
        } => {
            tx.copy_key(caller, *root_key, *key_id, *receiver, *bind)?;
            CallOutcome::Done
        }
        Call::SoulbindKey {
            root_key,
            holder,
            key_id,
            amount,
        } => {
            tx.soulbind_key(caller, *root_key, *holder, *key_id, *amount)?;
            CallOutcome::Done
        }
        Call::BurnKey {
            root_key,
            holder,
            key_id,
            amount,
        } => {
            tx.burn_key(caller, *root_key, *holder, *key_id, *amount)?;
            CallOutcome::Done
        }
        Call::TransferKey { to, key_id, amount } => {
            tx.transfer_key(caller, caller, *to, *key_id, *amount)?;
            CallOutcome::Done
        }
        Call::BatchTransferKeys {
            to,
            key_ids,
            amounts,
        } => {
            tx.batch_transfer_keys(caller, caller, *to, key_ids, amounts)?;
            CallOutcome::Done
        }
        Call::SetTrustedRole {
            trust_id,
            role,
            ledger,
            provider,
            trusted,
        } => {
            tx.set_trusted_role(
                caller,
                *trust_id,
                *role,
                ledger_or_default(*ledger),
                *provider,
                *trusted,
            )?;
            CallOutcome::Done
        }
        Call::SetWithdrawalAllowance {
            ledger,
            provider,
            key_id,
            arn,
            amount,
        } => {
            tx.set_withdrawal_allowance(
                caller,
                ledger_or_default(*ledger),
                *provider,
                *key_id,
                *arn,
                *amount,
            )?;
            CallOutcome::Done
        }
        Call::VaultDeposit { key_id, value } => {
            let b = vault.deposit(tx, caller, *value, *key_id)?;
            CallOutcome::Balances {
                key: b.key,
                trust: b.trust,
                provider: b.provider,
            }
        }
        Call::VaultWithdrawal { key_id, amount } => {
            let b = vault.withdrawal(tx, caller, *key_id, *amount)?;
            CallOutcome::Balances {
                key: b.key,
                trust: b.trust,
                provider: b.provider,
            }
        }
    };
    Ok(outcome)
}
