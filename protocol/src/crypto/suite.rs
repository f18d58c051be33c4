//! The pluggable crypto capability.
//!
//! Nothing above this module names an algorithm. The vault asks the suite to
//! seal sections, the codec asks it to hash, the verifier asks it to check
//! signatures. Swapping Ed25519 for something post-quantum means writing one
//! new [`CryptoSuite`] impl, not touching the state machines.

use super::encryption::{self, EncryptionError};
use super::hash::domain_separated_hash;
use super::signatures::verify_raw;
use crate::config::{SIGNING_ALGORITHM, SYMMETRIC_ALGORITHM};

/// Hash, seal, open, and verify.
pub trait CryptoSuite: Send + Sync {
    /// Recorded on backups as `encryptionMethod`.
    fn encryption_label(&self) -> &'static str;

    /// Recorded on proofs as the signature algorithm.
    fn signature_label(&self) -> &'static str;

    /// Domain-separated 32-byte content hash.
    fn hash(&self, domain: &str, data: &[u8]) -> [u8; 32];

    /// Seal `plaintext` under caller-supplied key material, binding `aad`.
    fn encrypt(&self, key: &[u8], plaintext: &[u8], aad: &[u8])
        -> Result<Vec<u8>, EncryptionError>;

    /// Open data produced by [`encrypt`](Self::encrypt).
    fn decrypt(&self, key: &[u8], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError>;

    /// `true` iff `signature` is valid for `message` under `public_key`.
    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool;
}

/// Ed25519 + AES-256-GCM + BLAKE3.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardSuite;

impl CryptoSuite for StandardSuite {
    fn encryption_label(&self) -> &'static str {
        SYMMETRIC_ALGORITHM
    }

    fn signature_label(&self) -> &'static str {
        SIGNING_ALGORITHM
    }

    fn hash(&self, domain: &str, data: &[u8]) -> [u8; 32] {
        domain_separated_hash(domain, data)
    }

    fn encrypt(
        &self,
        key: &[u8],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, EncryptionError> {
        let key = encryption::stretch_key(key)?;
        encryption::seal(&key, plaintext, aad)
    }

    fn decrypt(&self, key: &[u8], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, EncryptionError> {
        let key = encryption::stretch_key(key)?;
        encryption::open(&key, sealed, aad)
    }

    fn verify(&self, public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
        verify_raw(public_key, message, signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::IdentityKeypair;
    use crate::crypto::signatures::Signer;

    #[test]
    fn seals_with_any_length_key() {
        let suite = StandardSuite;
        let sealed = suite.encrypt(b"short", b"payload", b"aad").unwrap();
        assert_eq!(suite.decrypt(b"short", &sealed, b"aad").unwrap(), b"payload");
    }

    #[test]
    fn empty_key_is_refused() {
        assert_eq!(
            StandardSuite.encrypt(b"", b"payload", b"").unwrap_err(),
            EncryptionError::EmptyKey
        );
    }

    #[test]
    fn verifies_keypair_signatures() {
        let kp = IdentityKeypair::generate();
        let sig = kp.sign_bytes(b"m");
        assert!(StandardSuite.verify(&kp.public_key_bytes(), b"m", &sig));
        assert!(!StandardSuite.verify(&kp.public_key_bytes(), b"n", &sig));
        assert!(!StandardSuite.verify(b"junk", b"m", &sig));
    }

    #[test]
    fn labels() {
        assert_eq!(StandardSuite.encryption_label(), "AES-256-GCM");
        assert_eq!(StandardSuite.signature_label(), "Ed25519");
    }
}
