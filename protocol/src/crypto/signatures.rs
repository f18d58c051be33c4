//! # Digital Signatures
//!
//! The signing seam. Bundle issuers, guardians, and holders all sign through
//! the [`Signer`] trait so a hardware token or remote signer can stand in for
//! an in-memory [`IdentityKeypair`] without touching the callers.
//!
//! Verification lives on the other side of the seam, in
//! [`CryptoSuite::verify`](super::suite::CryptoSuite::verify), which takes
//! raw bytes and never panics on malformed input.

use ed25519_dalek::{Signature as DalekSignature, Verifier, VerifyingKey};
use thiserror::Error;

use super::keys::IdentityKeypair;
use crate::config::{SIGNATURE_LENGTH, VERIFYING_KEY_LENGTH};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature verification failed")]
    VerificationFailed,

    #[error("invalid signature bytes: expected {SIGNATURE_LENGTH} bytes")]
    InvalidSignatureBytes,

    #[error("invalid public key")]
    InvalidPublicKey,
}

/// Anything that can produce detached signatures.
pub trait Signer: Send + Sync {
    /// Raw public key bytes matching the signatures this signer produces.
    fn public_key_bytes(&self) -> Vec<u8>;

    /// Detached signature over `message`.
    fn sign_bytes(&self, message: &[u8]) -> Vec<u8>;
}

impl Signer for IdentityKeypair {
    fn public_key_bytes(&self) -> Vec<u8> {
        self.public_key().as_bytes().to_vec()
    }

    fn sign_bytes(&self, message: &[u8]) -> Vec<u8> {
        self.sign(message).as_bytes().to_vec()
    }
}

/// Verify an Ed25519 signature given as raw slices.
///
/// Length checks come first so a truncated key or signature is reported as
/// malformed rather than as a failed verification.
pub fn verify_raw(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    let key_bytes: [u8; VERIFYING_KEY_LENGTH] = public_key
        .try_into()
        .map_err(|_| SignatureError::InvalidPublicKey)?;
    let sig_bytes: [u8; SIGNATURE_LENGTH] = signature
        .try_into()
        .map_err(|_| SignatureError::InvalidSignatureBytes)?;

    let verifying_key =
        VerifyingKey::from_bytes(&key_bytes).map_err(|_| SignatureError::InvalidPublicKey)?;

    verifying_key
        .verify(message, &DalekSignature::from_bytes(&sig_bytes))
        .map_err(|_| SignatureError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keypair_signs_through_trait() {
        let kp = IdentityKeypair::generate();
        let signer: &dyn Signer = &kp;
        let sig = signer.sign_bytes(b"vote");
        assert_eq!(sig.len(), SIGNATURE_LENGTH);
        assert!(verify_raw(&signer.public_key_bytes(), b"vote", &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let kp = IdentityKeypair::generate();
        let sig = kp.sign_bytes(b"approve");
        assert_eq!(
            verify_raw(&kp.public_key_bytes(), b"reject", &sig),
            Err(SignatureError::VerificationFailed)
        );
    }

    #[test]
    fn malformed_inputs_are_classified() {
        let kp = IdentityKeypair::generate();
        let sig = kp.sign_bytes(b"m");
        assert_eq!(
            verify_raw(&[0u8; 5], b"m", &sig),
            Err(SignatureError::InvalidPublicKey)
        );
        assert_eq!(
            verify_raw(&kp.public_key_bytes(), b"m", &sig[..10]),
            Err(SignatureError::InvalidSignatureBytes)
        );
    }

    #[test]
    fn signatures_are_deterministic() {
        let kp = IdentityKeypair::from_seed(&[9u8; 32]);
        assert_eq!(kp.sign_bytes(b"m"), kp.sign_bytes(b"m"));
    }
}
