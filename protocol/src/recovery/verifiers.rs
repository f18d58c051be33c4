//! Per-method proof checking.
//!
//! A verifier turns a submitted proof into a confidence in `0..=100`. It
//! does not decide whether the attempt counts; the coordinator compares the
//! confidence against the method's `required_confidence`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::backup::types::{MethodConfigKey, RecoveryMethod, RecoveryMethodType};
use crate::config::{DOMAIN_RECOVERY_PROOF, MAX_CONFIDENCE};
use crate::crypto::codec::IntegrityCodec;
use crate::crypto::hash::blake3_hash;
use crate::crypto::signatures::Signer;

/// What a proof is checked against besides the method itself.
#[derive(Debug, Clone, Copy)]
pub struct ProofContext<'a> {
    pub request_id: &'a str,
    pub holder_did: &'a str,
}

pub trait ProofVerifier: Send + Sync {
    fn verify(&self, method: &RecoveryMethod, ctx: &ProofContext<'_>, proof: &[u8]) -> u8;
}

impl<F> ProofVerifier for F
where
    F: Fn(&RecoveryMethod, &ProofContext<'_>, &[u8]) -> u8 + Send + Sync,
{
    fn verify(&self, method: &RecoveryMethod, ctx: &ProofContext<'_>, proof: &[u8]) -> u8 {
        self(method, ctx, proof)
    }
}

/// Secret knowledge: the proof is the secret, the method stores
/// `hex(blake3(secret))` under [`MethodConfigKey::Commitment`].
#[derive(Debug, Clone, Copy)]
pub struct CommitmentVerifier {
    confidence: u8,
}

impl CommitmentVerifier {
    pub fn new(confidence: u8) -> Self {
        Self {
            confidence: confidence.min(MAX_CONFIDENCE),
        }
    }

    pub fn commitment(secret: &[u8]) -> String {
        hex::encode(blake3_hash(secret))
    }
}

impl Default for CommitmentVerifier {
    fn default() -> Self {
        Self::new(MAX_CONFIDENCE)
    }
}

impl ProofVerifier for CommitmentVerifier {
    fn verify(&self, method: &RecoveryMethod, _ctx: &ProofContext<'_>, proof: &[u8]) -> u8 {
        match method.config(MethodConfigKey::Commitment) {
            Some(expected) if expected.eq_ignore_ascii_case(&Self::commitment(proof)) => {
                self.confidence
            }
            _ => 0,
        }
    }
}

/// Possession of a key: the proof is a signature over the request ID by the
/// key stored under [`MethodConfigKey::PublicKey`].
#[derive(Debug, Clone, Default)]
pub struct SignatureProofVerifier {
    codec: IntegrityCodec,
}

impl SignatureProofVerifier {
    pub fn new(codec: IntegrityCodec) -> Self {
        Self { codec }
    }
}

impl ProofVerifier for SignatureProofVerifier {
    fn verify(&self, method: &RecoveryMethod, ctx: &ProofContext<'_>, proof: &[u8]) -> u8 {
        let Some(public_key) = method
            .config(MethodConfigKey::PublicKey)
            .and_then(|k| hex::decode(k).ok())
        else {
            return 0;
        };
        let digest = recovery_proof_digest(&self.codec, ctx.request_id);
        if self.codec.suite().verify(&public_key, &digest, proof) {
            MAX_CONFIDENCE
        } else {
            0
        }
    }
}

/// The digest a hardware key signs to prove possession for `request_id`.
pub fn recovery_proof_digest(codec: &IntegrityCodec, request_id: &str) -> [u8; 32] {
    codec.digest_bytes(DOMAIN_RECOVERY_PROOF, request_id.as_bytes())
}

/// Client-side helper for [`SignatureProofVerifier`].
pub fn sign_recovery_proof(codec: &IntegrityCodec, signer: &dyn Signer, request_id: &str) -> Vec<u8> {
    signer.sign_bytes(&recovery_proof_digest(codec, request_id))
}

/// Verifier lookup by method type. Types with no verifier score zero.
#[derive(Clone, Default)]
pub struct ProofVerifiers {
    by_type: HashMap<RecoveryMethodType, Arc<dyn ProofVerifier>>,
}

impl ProofVerifiers {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Commitment checks for mnemonic phrases and backup codes, signature
    /// checks for hardware keys.
    pub fn standard(codec: IntegrityCodec) -> Self {
        let commitment: Arc<dyn ProofVerifier> = Arc::new(CommitmentVerifier::default());
        let mut verifiers = Self::empty();
        verifiers
            .register(RecoveryMethodType::MnemonicPhrase, commitment.clone())
            .register(RecoveryMethodType::BackupCodes, commitment)
            .register(
                RecoveryMethodType::HardwareKey,
                Arc::new(SignatureProofVerifier::new(codec)),
            );
        verifiers
    }

    pub fn register(
        &mut self,
        method_type: RecoveryMethodType,
        verifier: Arc<dyn ProofVerifier>,
    ) -> &mut Self {
        self.by_type.insert(method_type, verifier);
        self
    }

    pub fn verify(&self, method: &RecoveryMethod, ctx: &ProofContext<'_>, proof: &[u8]) -> u8 {
        self.by_type
            .get(&method.method_type)
            .map(|v| v.verify(method, ctx, proof).min(MAX_CONFIDENCE))
            .unwrap_or(0)
    }

    pub fn supports(&self, method_type: RecoveryMethodType) -> bool {
        self.by_type.contains_key(&method_type)
    }
}

impl fmt::Debug for ProofVerifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.by_type.keys().map(|t| t.as_str()).collect();
        types.sort_unstable();
        f.debug_struct("ProofVerifiers").field("types", &types).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::IdentityKeypair;

    const CTX: ProofContext<'static> = ProofContext {
        request_id: "recovery_1",
        holder_did: "did:example:alice",
    };

    #[test]
    fn commitment_matches_secret() {
        let method = RecoveryMethod::new("seed", RecoveryMethodType::MnemonicPhrase, "Seed", 80)
            .with_config(
                MethodConfigKey::Commitment,
                CommitmentVerifier::commitment(b"correct horse battery staple"),
            );
        let v = CommitmentVerifier::default();
        assert_eq!(v.verify(&method, &CTX, b"correct horse battery staple"), 100);
        assert_eq!(v.verify(&method, &CTX, b"wrong"), 0);
        assert_eq!(CommitmentVerifier::new(40).verify(&method, &CTX, b"correct horse battery staple"), 40);
    }

    #[test]
    fn commitment_without_config_scores_zero() {
        let method = RecoveryMethod::new("seed", RecoveryMethodType::MnemonicPhrase, "Seed", 80);
        assert_eq!(CommitmentVerifier::default().verify(&method, &CTX, b"x"), 0);
    }

    #[test]
    fn hardware_key_signs_request_id() {
        let codec = IntegrityCodec::standard();
        let kp = IdentityKeypair::generate();
        let method = RecoveryMethod::new("token", RecoveryMethodType::HardwareKey, "Token", 90)
            .with_config(MethodConfigKey::PublicKey, kp.public_key().to_hex());
        let v = SignatureProofVerifier::new(codec.clone());

        let proof = sign_recovery_proof(&codec, &kp, CTX.request_id);
        assert_eq!(v.verify(&method, &CTX, &proof), 100);

        let other = ProofContext {
            request_id: "recovery_2",
            ..CTX
        };
        assert_eq!(v.verify(&method, &other, &proof), 0);
    }

    #[test]
    fn unregistered_types_score_zero() {
        let verifiers = ProofVerifiers::standard(IntegrityCodec::standard());
        let method = RecoveryMethod::new("mail", RecoveryMethodType::EmailVerification, "Mail", 50);
        assert!(!verifiers.supports(RecoveryMethodType::EmailVerification));
        assert_eq!(verifiers.verify(&method, &CTX, b"anything"), 0);
    }

    fn overconfident(_: &RecoveryMethod, _: &ProofContext<'_>, _: &[u8]) -> u8 {
        250
    }

    #[test]
    fn functions_are_verifiers_and_get_clamped() {
        let mut verifiers = ProofVerifiers::empty();
        verifiers.register(RecoveryMethodType::IdentityProvider, Arc::new(overconfident));
        let method = RecoveryMethod::new("idp", RecoveryMethodType::IdentityProvider, "IdP", 50);
        assert_eq!(verifiers.verify(&method, &CTX, b""), 100);
    }
}
