//! # Protocol Configuration & Constants
//!
//! Every fixed number of the custody core lives here. Node-level settings
//! (ports, directories, log format) live in the node's own config file and
//! never leak into the library.

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

/// Crate-level protocol version, reported by the node's `/status` endpoint.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Layout version of the persisted [`WorldState`](crate::chain::WorldState).
///
/// Bump on any change to a serialized component. A node refuses to resume
/// from a snapshot written with a different version rather than guessing at
/// a migration.
pub const STATE_SCHEMA_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Chain Identifiers
// ---------------------------------------------------------------------------

/// Production deployment.
pub const CHAIN_ID_MAINNET: u64 = 1;

/// Public test deployment.
pub const CHAIN_ID_TESTNET: u64 = 11_155_111;

/// Local development chain. Faucet enabled, reset whenever you like.
pub const CHAIN_ID_DEVNET: u64 = 31_337;

// ---------------------------------------------------------------------------
// Execution Limits
// ---------------------------------------------------------------------------

/// Maximum nesting of receiver hooks within one transaction.
///
/// A vault paying a contract that calls the vault that pays the contract
/// bottoms out here with `CALL_DEPTH_EXCEEDED`.
pub const MAX_CALL_DEPTH: usize = 8;

/// Maximum number of calls accepted in one submitted batch.
pub const MAX_CALLS_PER_TRANSACTION: usize = 64;

/// Label from which genesis component addresses are derived.
pub const DEFAULT_DEPLOYMENT_LABEL: &str = "custody";

// ---------------------------------------------------------------------------
// Utility
// ---------------------------------------------------------------------------

/// Returns a friendly name for a chain id, mainly for logging and registry
/// file names. Unknown chains are named by their number.
pub fn network_name(chain_id: u64) -> String {
    match chain_id {
        CHAIN_ID_MAINNET => "mainnet".to_string(),
        CHAIN_ID_TESTNET => "testnet".to_string(),
        CHAIN_ID_DEVNET => "devnet".to_string(),
        other => format!("chain-{other}"),
    }
}

/// Whether the chain is a development chain with a coin faucet.
pub fn is_devnet(chain_id: u64) -> bool {
    chain_id == CHAIN_ID_DEVNET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_ids_are_distinct() {
        assert_ne!(CHAIN_ID_MAINNET, CHAIN_ID_TESTNET);
        assert_ne!(CHAIN_ID_MAINNET, CHAIN_ID_DEVNET);
        assert_ne!(CHAIN_ID_TESTNET, CHAIN_ID_DEVNET);
    }

    #[test]
    fn test_network_name_formatting() {
        assert_eq!(network_name(CHAIN_ID_DEVNET), "devnet");
        assert_eq!(network_name(42), "chain-42");
    }

    #[test]
    fn test_limits_sanity() {
        assert!(MAX_CALL_DEPTH > 1);
        assert!(MAX_CALLS_PER_TRANSACTION > 0);
        assert!(STATE_SCHEMA_VERSION > 0);
    }

    #[test]
    fn test_only_devnet_has_faucet() {
        assert!(is_devnet(CHAIN_ID_DEVNET));
        assert!(!is_devnet(CHAIN_ID_MAINNET));
    }
}
