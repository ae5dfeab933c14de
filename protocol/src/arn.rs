//! # Asset Resource Names
//!
//! An [`Arn`] is the ledger's name for an asset class. It is derived from the
//! asset's contract address, token-standard tag and sub-id, so the accounting
//! layer never needs to know how a particular token works: a native coin, a
//! fungible token and one id of a multi-token contract are all just 32 bytes.
//!
//! ```text
//! ARN = BLAKE3(contract (20B) || standard (4B BE) || id (16B BE))
//! ```
//!
//! The native coin is the ARN of `(0x0, NATIVE, 0)`.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::types::Address;

/// Token-standard tag for the chain's native coin.
pub const STANDARD_NATIVE: u32 = 0;

/// Token-standard tag for fungible tokens.
pub const STANDARD_FUNGIBLE: u32 = 20;

/// Token-standard tag for non-fungible tokens.
pub const STANDARD_NON_FUNGIBLE: u32 = 721;

/// Token-standard tag for multi-token contracts.
pub const STANDARD_MULTI_TOKEN: u32 = 1155;

/// A content-derived asset identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Arn([u8; 32]);

impl Arn {
    /// Derives the ARN for an asset.
    pub fn derive(contract: Address, standard: u32, id: u128) -> Self {
        let mut preimage = Vec::with_capacity(20 + 4 + 16);
        preimage.extend_from_slice(contract.as_bytes());
        preimage.extend_from_slice(&standard.to_be_bytes());
        preimage.extend_from_slice(&id.to_be_bytes());
        Self(*blake3::hash(&preimage).as_bytes())
    }

    /// The ARN of the native coin.
    pub fn native() -> Self {
        Self::derive(Address::ZERO, STANDARD_NATIVE, 0)
    }

    /// The ARN of a fungible token contract.
    pub fn fungible(contract: Address) -> Self {
        Self::derive(contract, STANDARD_FUNGIBLE, 0)
    }

    /// Wraps raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns the `0x`-prefixed hex form.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses a hex ARN, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let raw = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(raw)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }
}

impl fmt::Debug for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Arn({}...)", &self.to_hex()[..14])
    }
}

impl fmt::Display for Arn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Arn {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Arn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Arn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Arn::from_hex(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_arn_is_stable() {
        assert_eq!(Arn::native(), Arn::derive(Address::ZERO, STANDARD_NATIVE, 0));
    }

    #[test]
    fn every_component_contributes() {
        let token = Address::derive("token");
        let base = Arn::derive(token, STANDARD_MULTI_TOKEN, 7);
        assert_ne!(base, Arn::derive(Address::derive("other"), STANDARD_MULTI_TOKEN, 7));
        assert_ne!(base, Arn::derive(token, STANDARD_NON_FUNGIBLE, 7));
        assert_ne!(base, Arn::derive(token, STANDARD_MULTI_TOKEN, 8));
    }

    #[test]
    fn fungible_differs_from_native() {
        assert_ne!(Arn::fungible(Address::derive("usd")), Arn::native());
    }

    #[test]
    fn hex_parse_matches_display() {
        let arn = Arn::native();
        let parsed: Arn = arn.to_string().parse().unwrap();
        assert_eq!(parsed, arn);
    }
}
