//! # Integrity Codec
//!
//! Deterministic serialize-then-hash, and detached signatures over the
//! result. Every hash a Custodia component persists or signs (backup
//! integrity hashes, bundle data hashes, vote and message signatures) goes
//! through here, so "same value" always means "same bytes".
//!
//! ## Canonical form
//!
//! Values are serialized with serde into a `serde_json::Value`, object keys
//! are sorted recursively, and the tree is written out compactly. Key order
//! therefore never depends on struct field order, `HashMap` iteration, or
//! whether some other crate in the build turned on `preserve_order`.
//!
//! ## Signatures
//!
//! Detached signatures cover the 32-byte domain-separated digest, not the
//! full canonical bytes. A signer on a constrained device only ever sees 32
//! bytes, and the domain tag stops a vote signature from being replayed as a
//! bundle signature.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::signatures::Signer;
use super::suite::{CryptoSuite, StandardSuite};
use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("canonical serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed hex in {field}")]
    MalformedHex { field: &'static str },

    #[error("signature does not verify")]
    BadSignature,
}

impl CodecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Serialization(_) => ErrorKind::Internal,
            CodecError::MalformedHex { .. } => ErrorKind::Validation,
            CodecError::BadSignature => ErrorKind::Integrity,
        }
    }
}

// ---------------------------------------------------------------------------
// IntegrityCodec
// ---------------------------------------------------------------------------

/// Canonical hashing and detached signing over a pluggable [`CryptoSuite`].
#[derive(Clone)]
pub struct IntegrityCodec {
    suite: Arc<dyn CryptoSuite>,
}

impl std::fmt::Debug for IntegrityCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityCodec")
            .field("suite", &self.suite.signature_label())
            .finish()
    }
}

impl Default for IntegrityCodec {
    fn default() -> Self {
        Self::standard()
    }
}

impl IntegrityCodec {
    pub fn new(suite: Arc<dyn CryptoSuite>) -> Self {
        Self { suite }
    }

    /// Codec over [`StandardSuite`].
    pub fn standard() -> Self {
        Self::new(Arc::new(StandardSuite))
    }

    pub fn suite(&self) -> &Arc<dyn CryptoSuite> {
        &self.suite
    }

    /// Canonical bytes for `value`.
    ///
    /// ```
    /// use std::collections::HashMap;
    /// use custodia_protocol::crypto::codec::IntegrityCodec;
    ///
    /// let mut a = HashMap::new();
    /// a.insert("z", 1);
    /// a.insert("a", 2);
    /// let bytes = IntegrityCodec::canonical_bytes(&a).unwrap();
    /// assert_eq!(bytes, br#"{"a":2,"z":1}"#);
    /// ```
    pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
        let tree = canonicalize(serde_json::to_value(value)?);
        Ok(serde_json::to_vec(&tree)?)
    }

    /// Domain-separated digest of the canonical form.
    pub fn digest<T: Serialize + ?Sized>(
        &self,
        domain: &str,
        value: &T,
    ) -> Result<[u8; 32], CodecError> {
        let bytes = Self::canonical_bytes(value)?;
        Ok(self.suite.hash(domain, &bytes))
    }

    /// [`digest`](Self::digest), hex encoded.
    pub fn digest_hex<T: Serialize + ?Sized>(
        &self,
        domain: &str,
        value: &T,
    ) -> Result<String, CodecError> {
        Ok(hex::encode(self.digest(domain, value)?))
    }

    /// Digest of raw bytes, for payloads that are already canonical.
    pub fn digest_bytes(&self, domain: &str, data: &[u8]) -> [u8; 32] {
        self.suite.hash(domain, data)
    }

    /// Hex signature over the digest of `value`.
    pub fn sign_detached<T: Serialize + ?Sized>(
        &self,
        signer: &dyn Signer,
        domain: &str,
        value: &T,
    ) -> Result<String, CodecError> {
        let digest = self.digest(domain, value)?;
        Ok(hex::encode(signer.sign_bytes(&digest)))
    }

    /// Check a hex signature produced by [`sign_detached`](Self::sign_detached).
    pub fn verify_detached<T: Serialize + ?Sized>(
        &self,
        public_key: &[u8],
        domain: &str,
        value: &T,
        signature_hex: &str,
    ) -> Result<(), CodecError> {
        let digest = self.digest(domain, value)?;
        self.verify_digest(public_key, &digest, signature_hex)
    }

    /// Check a hex signature over an already computed digest.
    pub fn verify_digest(
        &self,
        public_key: &[u8],
        digest: &[u8; 32],
        signature_hex: &str,
    ) -> Result<(), CodecError> {
        let signature = hex::decode(signature_hex)
            .map_err(|_| CodecError::MalformedHex { field: "signature" })?;
        if self.suite.verify(public_key, digest, &signature) {
            Ok(())
        } else {
            Err(CodecError::BadSignature)
        }
    }
}

/// Recursively rebuild objects with sorted keys.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
