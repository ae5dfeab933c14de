//! # Primitive Types
//!
//! Identifiers shared by every component: account addresses, key and trust
//! ids, and the amount type. Keys and trusts are numbered sequentially by the
//! issuer; addresses are opaque 20-byte identities.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Amount of an asset or of a capability key, in the smallest unit.
///
/// The protocol never divides, so there is no decimal handling anywhere in
/// the accounting path.
pub type Amount = u128;

/// Identifier of a capability key. Assigned sequentially from 0.
pub type KeyId = u64;

/// Identifier of a trust. Assigned sequentially from 0.
pub type TrustId = u64;

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte account or component identity.
///
/// The all-zero address is the void sentinel: keys minted into existence come
/// from it and keys burned go to it. It never holds a balance.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    /// The void sentinel.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Wraps raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Returns `true` for the void sentinel.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Derives a deterministic address from a label.
    ///
    /// Used for component addresses at deployment time and for named test
    /// accounts. The address is the first 20 bytes of `BLAKE3(label)`.
    pub fn derive(label: &str) -> Self {
        let digest = blake3::hash(label.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest.as_bytes()[..20]);
        Self(bytes)
    }

    /// Returns the `0x`-prefixed lowercase hex form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses a hex address, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        if bytes.len() != 20 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

// Addresses travel as hex strings so they can be used as JSON map keys.
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_address_is_sentinel() {
        assert!(Address::ZERO.is_zero());
        assert!(!Address::derive("alice").is_zero());
    }

    #[test]
    fn derive_is_deterministic() {
        assert_eq!(Address::derive("ledger"), Address::derive("ledger"));
        assert_ne!(Address::derive("ledger"), Address::derive("notary"));
    }

    #[test]
    fn hex_accepts_optional_prefix() {
        let addr = Address::derive("vault");
        let hex = addr.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(Address::from_hex(&hex).unwrap(), addr);
        assert_eq!(Address::from_hex(&hex[2..]).unwrap(), addr);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(Address::from_hex("0xdeadbeef").is_err());
    }

    #[test]
    fn serializes_as_hex_string() {
        let addr = Address::derive("bob");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
