//! # Custody Protocol Collateral Providers
//!
//! Providers hold the real assets. The ledger only believes what they report,
//! so every provider follows the same discipline:
//!
//! 1. Authenticate the caller by the capability key it presents.
//! 2. Record the movement with the ledger.
//! 3. Assert the ledger's provider balance matches physical holdings.
//! 4. Only then move the asset out.
//!
//! - **Native Vault** — custody of the chain's native coin.

pub mod native_vault;

pub use native_vault::NativeVault;
