//! # Key Management
//!
//! Ed25519 keypairs for holders, guardians, and bundle issuers.
//!
//! A holder's key signs offline challenges; a guardian's key signs recovery
//! votes; an issuer's key signs bundles and the proofs inside them. Same
//! curve, same type, very different blast radius when lost, which is the
//! whole reason the recovery half of this crate exists.
//!
//! ## Security considerations
//!
//! - Private keys are zeroized on drop (ed25519-dalek does this for us).
//! - Key generation uses `OsRng`.
//! - Key bytes are never logged. `Debug` prints the public half only.

use ed25519_dalek::{
    Signature as DalekSignature, Signer as _, SigningKey, Verifier, VerifyingKey,
    SECRET_KEY_LENGTH,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::config::{SIGNATURE_LENGTH, VERIFYING_KEY_LENGTH};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key bytes: wrong length or bad encoding")]
    InvalidSecretKey,

    #[error("invalid public key bytes: not a valid Ed25519 point")]
    InvalidPublicKey,

    #[error("invalid signature bytes: expected {SIGNATURE_LENGTH} bytes")]
    InvalidSignature,
}

/// An Ed25519 signing keypair.
///
/// Not `Serialize` on purpose. Exporting a secret key should be a deliberate
/// call to [`secret_key_hex`](Self::secret_key_hex), not a side effect of
/// dropping a struct into `serde_json::to_string`.
///
/// ```
/// use custodia_protocol::crypto::keys::IdentityKeypair;
///
/// let kp = IdentityKeypair::generate();
/// let sig = kp.sign(b"challenge");
/// assert!(kp.public_key().verify(b"challenge", &sig));
/// ```
pub struct IdentityKeypair {
    signing_key: SigningKey,
}

/// The shareable half of a keypair.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityPublicKey {
    bytes: [u8; VERIFYING_KEY_LENGTH],
}

/// A detached Ed25519 signature. Always 64 bytes once parsed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySignature {
    bytes: Vec<u8>,
}

impl IdentityKeypair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Deterministic keypair from a 32-byte seed. Weak seed, weak key.
    pub fn from_seed(seed: &[u8; SECRET_KEY_LENGTH]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from a hex-encoded 32-byte secret.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; SECRET_KEY_LENGTH] =
            bytes.try_into().map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn public_key(&self) -> IdentityPublicKey {
        IdentityPublicKey {
            bytes: self.signing_key.verifying_key().to_bytes(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> IdentitySignature {
        IdentitySignature {
            bytes: self.signing_key.sign(message).to_bytes().to_vec(),
        }
    }

    /// Hex-encoded secret key. Handle like the liability it is.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

impl Clone for IdentityKeypair {
    fn clone(&self) -> Self {
        Self::from_seed(&self.signing_key.to_bytes())
    }
}

impl fmt::Debug for IdentityKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityKeypair(pub={})", self.public_key().to_hex())
    }
}

// ---------------------------------------------------------------------------
// IdentityPublicKey
// ---------------------------------------------------------------------------

impl IdentityPublicKey {
    /// Parse and validate raw key bytes. Rejects anything that is not a
    /// decodable Ed25519 point.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; VERIFYING_KEY_LENGTH] =
            slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidPublicKey)?;
        Self::try_from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; VERIFYING_KEY_LENGTH] {
        &self.bytes
    }

    /// `true` iff `signature` is a valid Ed25519 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &IdentitySignature) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(&self.bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; SIGNATURE_LENGTH]>::try_from(signature.bytes.as_slice()) else {
            return false;
        };
        verifying_key
            .verify(message, &DalekSignature::from_bytes(&sig_bytes))
            .is_ok()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    /// First 8 bytes of the SHA-256 of the key, hex encoded. Short enough
    /// to read aloud when comparing keys out of band.
    pub fn fingerprint(&self) -> String {
        hex::encode(&crate::crypto::hash::sha256_array(&self.bytes)[..8])
    }
}

impl fmt::Debug for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdentityPublicKey({})", self.to_hex())
    }
}

impl fmt::Display for IdentityPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// IdentitySignature
// ---------------------------------------------------------------------------

impl IdentitySignature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(KeyError::InvalidSignature);
        }
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSignature)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }
}

impl fmt::Debug for IdentitySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        write!(f, "IdentitySignature({}...)", &hex[..hex.len().min(16)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let kp = IdentityKeypair::generate();
        let sig = kp.sign(b"hello");
        assert!(kp.public_key().verify(b"hello", &sig));
        assert!(!kp.public_key().verify(b"goodbye", &sig));
    }

    #[test]
    fn wrong_key_rejects() {
        let a = IdentityKeypair::generate();
        let b = IdentityKeypair::generate();
        assert!(!b.public_key().verify(b"m", &a.sign(b"m")));
    }

    #[test]
    fn hex_roundtrip_preserves_identity() {
        let kp = IdentityKeypair::generate();
        let restored = IdentityKeypair::from_hex(&kp.secret_key_hex()).unwrap();
        assert_eq!(kp.public_key(), restored.public_key());
    }

    #[test]
    fn seed_is_deterministic() {
        let a = IdentityKeypair::from_seed(&[7u8; 32]);
        let b = IdentityKeypair::from_seed(&[7u8; 32]);
        assert_eq!(a.public_key(), b.public_key());
    }

    #[test]
    fn rejects_bad_secret_hex() {
        assert_eq!(
            IdentityKeypair::from_hex("abcd").unwrap_err(),
            KeyError::InvalidSecretKey
        );
        assert!(IdentityKeypair::from_hex("not hex at all").is_err());
    }

    #[test]
    fn rejects_short_public_key() {
        assert_eq!(
            IdentityPublicKey::try_from_slice(&[1u8; 31]).unwrap_err(),
            KeyError::InvalidPublicKey
        );
    }

    #[test]
    fn truncated_signature_never_verifies() {
        let kp = IdentityKeypair::generate();
        let sig = kp.sign(b"m");
        let short = IdentitySignature {
            bytes: sig.as_bytes()[..63].to_vec(),
        };
        assert!(!kp.public_key().verify(b"m", &short));
        assert!(IdentitySignature::from_bytes(&sig.as_bytes()[..63]).is_err());
    }

    #[test]
    fn debug_does_not_leak_secret() {
        let kp = IdentityKeypair::generate();
        let dbg = format!("{kp:?}");
        assert!(!dbg.contains(&kp.secret_key_hex()));
        assert!(dbg.contains(&kp.public_key().to_hex()));
    }

    #[test]
    fn fingerprint_is_short_and_stable() {
        let kp = IdentityKeypair::from_seed(&[1u8; 32]);
        assert_eq!(kp.public_key().fingerprint().len(), 16);
        assert_eq!(kp.public_key().fingerprint(), kp.public_key().fingerprint());
    }
}
