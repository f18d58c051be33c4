//! # Account Addresses
//!
//! The `authority` on every message, and the controller the store records
//! for an identity, is an account address derived from an Ed25519 key:
//!
//! ```text
//! public_key (32 bytes)
//!     -> BLAKE3(public_key)[..20]
//!     -> Bech32("cust", hash) -> cust1qw508d6qe...
//! ```
//!
//! Bech32's checksum catches the transcription errors that matter when an
//! address is typed into a recovery form.

use std::fmt;
use std::str::FromStr;

use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hash::blake3_hash;
use crate::crypto::keys::IdentityPublicKey;

/// Human-readable prefix for every Custodia account address.
pub const ADDRESS_HRP: &str = "cust";

const HRP: Hrp = Hrp::parse_unchecked(ADDRESS_HRP);

/// Bytes of the key hash kept in an address.
pub const ADDRESS_HASH_LENGTH: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("bech32 decode error: {0}")]
    Bech32Decode(String),

    #[error("invalid HRP: expected '{ADDRESS_HRP}', got '{0}'")]
    InvalidHrp(String),

    #[error("invalid address data length: expected {ADDRESS_HASH_LENGTH} bytes, got {0}")]
    InvalidDataLength(usize),

    #[error("bech32 encode error: {0}")]
    Bech32Encode(String),
}

/// A parsed account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountAddress {
    key_hash: [u8; ADDRESS_HASH_LENGTH],
}

impl AccountAddress {
    pub fn from_public_key(key: &IdentityPublicKey) -> Self {
        Self::from_key_bytes(key.as_bytes())
    }

    /// Address of raw public key bytes, for keys that arrive through the
    /// [`Signer`](crate::crypto::signatures::Signer) seam.
    pub fn from_key_bytes(key: &[u8]) -> Self {
        let digest = blake3_hash(key);
        let mut key_hash = [0u8; ADDRESS_HASH_LENGTH];
        key_hash.copy_from_slice(&digest[..ADDRESS_HASH_LENGTH]);
        Self { key_hash }
    }

    pub fn key_hash(&self) -> &[u8; ADDRESS_HASH_LENGTH] {
        &self.key_hash
    }

    pub fn encode(&self) -> Result<String, AddressError> {
        bech32::encode::<Bech32>(HRP, &self.key_hash)
            .map_err(|e| AddressError::Bech32Encode(e.to_string()))
    }
}

impl FromStr for AccountAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hrp, data) = bech32::decode(s).map_err(|e| AddressError::Bech32Decode(e.to_string()))?;
        if hrp != HRP {
            return Err(AddressError::InvalidHrp(hrp.to_string()));
        }
        let key_hash: [u8; ADDRESS_HASH_LENGTH] = data
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidDataLength(data.len()))?;
        Ok(Self { key_hash })
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str(&hex::encode(self.key_hash)),
        }
    }
}

impl Serialize for AccountAddress {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AccountAddress {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Address string for `key`.
pub fn address_of(key: &[u8]) -> String {
    AccountAddress::from_key_bytes(key).to_string()
}

pub fn validate_address(address: &str) -> Result<(), AddressError> {
    address.parse::<AccountAddress>().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::IdentityKeypair;

    #[test]
    fn address_has_prefix_and_round_trips() {
        let kp = IdentityKeypair::generate();
        let addr = AccountAddress::from_public_key(&kp.public_key());
        let text = addr.to_string();
        assert!(text.starts_with("cust1"), "address was: {text}");
        assert_eq!(text.parse::<AccountAddress>().unwrap(), addr);
    }

    #[test]
    fn same_key_same_address() {
        let kp = IdentityKeypair::from_seed(&[7u8; 32]);
        assert_eq!(
            address_of(kp.public_key().as_bytes()),
            AccountAddress::from_public_key(&kp.public_key()).to_string()
        );
        assert_ne!(
            address_of(kp.public_key().as_bytes()),
            address_of(IdentityKeypair::generate().public_key().as_bytes())
        );
    }

    #[test]
    fn foreign_prefix_rejected() {
        let hrp = Hrp::parse("cosmos").unwrap();
        let encoded = bech32::encode::<Bech32>(hrp, &[0u8; ADDRESS_HASH_LENGTH]).unwrap();
        assert!(matches!(
            validate_address(&encoded),
            Err(AddressError::InvalidHrp(_))
        ));
    }

    #[test]
    fn wrong_length_rejected() {
        let encoded = bech32::encode::<Bech32>(HRP, &[0u8; 32]).unwrap();
        assert_eq!(
            validate_address(&encoded),
            Err(AddressError::InvalidDataLength(32))
        );
    }

    #[test]
    fn corrupted_address_rejected() {
        let mut addr = address_of(&[1u8; 32]);
        let mid = addr.len() / 2;
        let replacement = if addr.as_bytes()[mid] == b'q' { "p" } else { "q" };
        addr.replace_range(mid..mid + 1, replacement);
        assert!(validate_address(&addr).is_err());
        assert!(validate_address("cust1controller").is_err());
    }
}
