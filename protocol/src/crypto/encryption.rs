//! # AES-256-GCM Encryption
//!
//! Authenticated encryption for backup sections.
//!
//! ## Nonce management
//!
//! GCM is unforgiving about nonce reuse: two messages under the same key and
//! nonce leak the XOR of their plaintexts and let an attacker forge tags.
//! Every call draws a fresh random 96-bit nonce from `OsRng`. A holder would
//! need around 2^48 backup sections under one key before the birthday bound
//! gets interesting.
//!
//! ## Wire format
//!
//! `nonce || ciphertext || tag`. The first 12 bytes are the nonce. Sections
//! are sealed with their own name as associated data, so a ciphertext lifted
//! from the `credentials` slot will not open in the `identity` slot.
//!
//! ## Keys
//!
//! Holders hand us key material of whatever length their recovery tooling
//! produced. [`stretch_key`] runs it through BLAKE3 `derive_key` to get the
//! 32 bytes AES wants. That is a KDF for high-entropy input, not a password
//! hash; low-entropy passphrases should be stretched by the caller.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH, AES_TAG_LENGTH, DOMAIN_BACKUP_KEY};
use crate::crypto::hash::domain_separated_hash;

/// Errors from sealing and opening.
///
/// Deliberately vague. "Wrong key" and "tampered ciphertext" are the same
/// answer as far as anyone outside this module is concerned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("encryption key must not be empty")]
    EmptyKey,

    #[error("ciphertext too short: must be at least {} bytes", AES_NONCE_LENGTH + AES_TAG_LENGTH)]
    CiphertextTooShort,
}

/// Stretch arbitrary non-empty key material to an AES-256 key.
pub fn stretch_key(material: &[u8]) -> Result<[u8; AES_KEY_LENGTH], EncryptionError> {
    if material.is_empty() {
        return Err(EncryptionError::EmptyKey);
    }
    Ok(domain_separated_hash(DOMAIN_BACKUP_KEY, material))
}

/// Seal `plaintext` under `key`, binding `aad`. Returns `nonce || ciphertext`.
///
/// ```
/// use custodia_protocol::crypto::encryption::{seal, open};
///
/// let key = [0x42u8; 32];
/// let sealed = seal(&key, b"seed words", b"identity").unwrap();
/// assert_eq!(open(&key, &sealed, b"identity").unwrap(), b"seed words");
/// assert!(open(&key, &sealed, b"credentials").is_err());
/// ```
pub fn seal(
    key: &[u8; AES_KEY_LENGTH],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;

    let mut nonce_bytes = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::EncryptFailed)?;

    let mut out = Vec::with_capacity(AES_NONCE_LENGTH + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Open data produced by [`seal`] with the same key and `aad`.
pub fn open(
    key: &[u8; AES_KEY_LENGTH],
    sealed: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    if sealed.len() < AES_NONCE_LENGTH + AES_TAG_LENGTH {
        return Err(EncryptionError::CiphertextTooShort);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(AES_NONCE_LENGTH);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;

    cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| EncryptionError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> [u8; 32] {
        stretch_key(b"correct horse battery staple").unwrap()
    }

    #[test]
    fn roundtrip() {
        let k = key();
        let sealed = seal(&k, b"holder state", b"identity").unwrap();
        assert_eq!(open(&k, &sealed, b"identity").unwrap(), b"holder state");
    }

    #[test]
    fn nonces_are_fresh() {
        let k = key();
        let a = seal(&k, b"same", b"").unwrap();
        let b = seal(&k, b"same", b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&key(), b"data", b"x").unwrap();
        let other = stretch_key(b"wrong").unwrap();
        assert_eq!(open(&other, &sealed, b"x"), Err(EncryptionError::DecryptFailed));
    }

    #[test]
    fn swapped_aad_fails() {
        let k = key();
        let sealed = seal(&k, b"data", b"credentials").unwrap();
        assert!(open(&k, &sealed, b"identity").is_err());
    }

    #[test]
    fn bit_flip_fails() {
        let k = key();
        let mut sealed = seal(&k, b"data", b"x").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(open(&k, &sealed, b"x").is_err());
    }

    #[test]
    fn truncated_input_is_rejected_early() {
        assert_eq!(
            open(&key(), &[0u8; 10], b""),
            Err(EncryptionError::CiphertextTooShort)
        );
    }

    #[test]
    fn empty_key_material_is_rejected() {
        assert_eq!(stretch_key(b""), Err(EncryptionError::EmptyKey));
    }

    #[test]
    fn stretch_is_deterministic() {
        assert_eq!(stretch_key(b"k").unwrap(), stretch_key(b"k").unwrap());
        assert_ne!(stretch_key(b"k").unwrap(), stretch_key(b"K").unwrap());
    }
}
