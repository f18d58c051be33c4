//! # Decentralized Identifiers
//!
//! Custodia treats DIDs mostly as opaque handles: the DID-document lifecycle
//! belongs to whoever runs the identity store. What we do need is:
//!
//! - syntax validation at every API edge, so a typo never becomes a backup
//!   keyed on garbage;
//! - self-certifying `did:custodia:` identifiers minted from an Ed25519 key,
//!   for the CLI and for tests;
//! - the `#key-1` verification-method reference stamped on proofs.
//!
//! ## Format
//!
//! ```text
//! did:<method>:<method-specific-id>
//! did:custodia:z<base58btc(0xed 0x01 || ed25519-public-key)>
//! ```
//!
//! The `z` prefix is multibase for base58btc and `0xed01` is the multicodec
//! tag for an Ed25519 public key, same as `did:key`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::crypto::keys::IdentityPublicKey;

const DID_SCHEME: &str = "did";
const CUSTODIA_METHOD: &str = "custodia";
const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DidError {
    #[error("invalid DID format: {0}")]
    InvalidFormat(String),

    #[error("DID method '{0}' does not embed a public key")]
    NotSelfCertifying(String),

    #[error("invalid multibase key in DID: {0}")]
    InvalidKey(String),
}

/// A syntactically valid DID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did {
    method: String,
    id: String,
}

impl Did {
    /// Mint a self-certifying `did:custodia:` identifier for `key`.
    pub fn from_public_key(key: &IdentityPublicKey) -> Self {
        let mut bytes = ED25519_MULTICODEC.to_vec();
        bytes.extend_from_slice(key.as_bytes());
        Self {
            method: CUSTODIA_METHOD.to_string(),
            id: format!("z{}", bs58::encode(bytes).into_string()),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn method_specific_id(&self) -> &str {
        &self.id
    }

    /// Extract the embedded key from a `did:custodia:` or `did:key:` DID.
    pub fn public_key(&self) -> Result<IdentityPublicKey, DidError> {
        if self.method != CUSTODIA_METHOD && self.method != "key" {
            return Err(DidError::NotSelfCertifying(self.method.clone()));
        }
        let encoded = self
            .id
            .strip_prefix('z')
            .ok_or_else(|| DidError::InvalidKey("expected base58btc multibase 'z'".into()))?;
        let bytes = bs58::decode(encoded)
            .into_vec()
            .map_err(|e| DidError::InvalidKey(e.to_string()))?;
        let raw = bytes
            .strip_prefix(ED25519_MULTICODEC.as_slice())
            .ok_or_else(|| DidError::InvalidKey("not an Ed25519 multicodec key".into()))?;
        IdentityPublicKey::try_from_slice(raw).map_err(|e| DidError::InvalidKey(e.to_string()))
    }

    /// Reference to the DID's first verification method.
    pub fn key_reference(&self) -> String {
        format!("{self}#key-1")
    }
}

impl FromStr for Did {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let (Some(scheme), Some(method), Some(id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DidError::InvalidFormat(
                "DID must have format 'did:<method>:<identifier>'".into(),
            ));
        };

        if scheme != DID_SCHEME {
            return Err(DidError::InvalidFormat(format!(
                "expected 'did' prefix, got '{scheme}'"
            )));
        }
        if method.is_empty()
            || !method
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(DidError::InvalidFormat(format!("bad method name '{method}'")));
        }
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '%'))
        {
            return Err(DidError::InvalidFormat(format!(
                "bad method-specific id '{id}'"
            )));
        }

        Ok(Self {
            method: method.to_string(),
            id: id.to_string(),
        })
    }
}

impl TryFrom<String> for Did {
    type Error = DidError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.to_string()
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{DID_SCHEME}:{}:{}", self.method, self.id)
    }
}

/// Syntax check for DID strings at API edges.
pub fn validate_did(did: &str) -> Result<(), DidError> {
    did.parse::<Did>().map(|_| ())
}
