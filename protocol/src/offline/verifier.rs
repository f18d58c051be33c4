//! # Offline Verifier
//!
//! Scores a bundle against a verification request with no network and no
//! state. Everything the verifier knows sits in the struct: policy, the
//! issuer keys it trusts, the matcher, and the instant it treats as now.
//!
//! A handful of problems stop verification outright: corrupt structure,
//! expiry, an untrusted issuer, a broken seal, or a DID mismatch. Everything
//! else is graded. Depending on the mode, a shortfall either becomes an
//! error (and the result fails) or a warning that only costs confidence.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::biometric::{clamp_score, BiometricMatcher, TemplateHashMatcher};
use super::types::{
    BiometricClaim, CredentialClaim, IdentityClaim, KycClaim, OfflineCredential,
    OfflineVerificationData, OfflineVerificationRequest, OfflineVerificationResult, ProofType,
    RevocationData, VerificationMode,
};
use crate::config::{
    OfflineVerificationConfig, DOMAIN_BIOMETRIC_PROOF, DOMAIN_CHALLENGE, DOMAIN_CREDENTIAL,
    DOMAIN_IDENTITY_PROOF, DOMAIN_KYC_PROOF, MAX_VERIFICATION_LEVEL, MINIMAL_MODE_MARGIN,
    MIN_VERIFICATION_LEVEL, PARTIAL_MODE_MARGIN, VERIFYING_KEY_LENGTH,
};
use crate::crypto::codec::{CodecError, IntegrityCodec};
use crate::crypto::hash::{blake3_hash, decode_hash, verify_merkle_proof};
use crate::crypto::signatures::Signer;
use crate::identity::did::validate_did;

/// Per-mode component weights, before renormalization.
#[derive(Debug, Clone, Copy)]
struct Weights {
    identity: f64,
    kyc: f64,
    credentials: f64,
    biometric: f64,
}

fn weights(mode: VerificationMode) -> Weights {
    match mode {
        VerificationMode::Full => Weights {
            identity: 0.4,
            kyc: 0.2,
            credentials: 0.2,
            biometric: 0.2,
        },
        VerificationMode::Partial => Weights {
            identity: 0.6,
            kyc: 0.1,
            credentials: 0.1,
            biometric: 0.2,
        },
        VerificationMode::Minimal => Weights {
            identity: 0.8,
            kyc: 0.0,
            credentials: 0.0,
            biometric: 0.2,
        },
        VerificationMode::Emergency => Weights {
            identity: 0.7,
            kyc: 0.0,
            credentials: 0.0,
            biometric: 0.3,
        },
    }
}

/// Holder-side helper: sign the challenge in `request` so a verifier can
/// check possession of the bundle's public key.
pub fn sign_challenge(
    codec: &IntegrityCodec,
    holder: &dyn Signer,
    request: &OfflineVerificationRequest,
) -> Result<String, CodecError> {
    codec.sign_detached(holder, DOMAIN_CHALLENGE, &request.challenge_claim())
}

pub struct OfflineVerifier {
    config: OfflineVerificationConfig,
    trusted_issuers: BTreeMap<String, Vec<u8>>,
    codec: IntegrityCodec,
    matcher: Arc<dyn BiometricMatcher>,
    now: DateTime<Utc>,
}

impl OfflineVerifier {
    /// Standard suite, exact-hash biometric matching, the current time, and
    /// no trusted issuers yet.
    pub fn new(config: OfflineVerificationConfig) -> Self {
        Self {
            config,
            trusted_issuers: BTreeMap::new(),
            codec: IntegrityCodec::standard(),
            matcher: Arc::new(TemplateHashMatcher),
            now: Utc::now(),
        }
    }

    pub fn with_codec(mut self, codec: IntegrityCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn BiometricMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Pin "now". Devices without a trustworthy clock pass whatever they
    /// last synced.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn trust_issuer(mut self, did: impl Into<String>, public_key: impl Into<Vec<u8>>) -> Self {
        self.add_trusted_issuer(did, public_key);
        self
    }

    pub fn add_trusted_issuer(&mut self, did: impl Into<String>, public_key: impl Into<Vec<u8>>) {
        self.trusted_issuers.insert(did.into(), public_key.into());
    }

    pub fn config(&self) -> &OfflineVerificationConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Minimum overall confidence for `mode` to succeed.
    pub fn threshold(&self, mode: VerificationMode) -> f64 {
        match mode {
            VerificationMode::Full => self.config.required_confidence,
            VerificationMode::Partial => {
                (self.config.required_confidence - PARTIAL_MODE_MARGIN).max(0.0)
            }
            VerificationMode::Minimal => {
                (self.config.emergency_threshold + MINIMAL_MODE_MARGIN).min(100.0)
            }
            VerificationMode::Emergency => self.config.emergency_threshold,
        }
    }

    /// Grade `bundle` for `request`. Never fails; problems land in
    /// `errors` and `warnings`.
    pub fn verify(
        &self,
        bundle: &OfflineVerificationData,
        request: &OfflineVerificationRequest,
    ) -> OfflineVerificationResult {
        let mode = request.mode;
        let mut out = OfflineVerificationResult {
            success: false,
            did: bundle.did.clone(),
            verification_level: 0,
            verified_types: Vec::new(),
            identity_verified: false,
            kyc_verified: false,
            biometric_verified: false,
            credentials_valid: false,
            not_revoked: false,
            identity_confidence: 0.0,
            biometric_confidence: 0.0,
            overall_confidence: 0.0,
            mode,
            errors: Vec::new(),
            warnings: Vec::new(),
            verified_at: self.now,
            cache_age: (self.now - bundle.issued_at).num_seconds(),
        };

        let issuer_key = match self.gate(bundle, request) {
            Ok(key) => key,
            Err(reason) => {
                debug!(did = %bundle.did, %mode, %reason, "offline verification rejected");
                out.errors.push(reason);
                return out;
            }
        };

        let revoked = self.revocation(bundle, mode, &mut out);
        out.identity_confidence = self.identity(bundle, request, issuer_key, &mut out);

        let w = weights(mode);
        let mut parts = vec![(w.identity, out.identity_confidence)];
        if mode.checks_credentials() {
            let kyc = self.kyc(bundle, mode, issuer_key, &mut out);
            let credentials = self.credentials(bundle, request, issuer_key, &revoked, &mut out);
            parts.push((w.kyc, kyc));
            parts.push((w.credentials, credentials));
        }
        if let Some(score) = self.biometric(bundle, request, issuer_key, &mut out) {
            parts.push((w.biometric, score));
        }

        let total: f64 = parts.iter().map(|(weight, _)| weight).sum();
        out.overall_confidence = if total > 0.0 {
            parts.iter().map(|(weight, score)| weight * score).sum::<f64>() / total
        } else {
            0.0
        };

        let threshold = self.threshold(mode);
        if out.overall_confidence < threshold {
            out.errors.push(format!(
                "overall confidence {:.1} is below the {mode} threshold {threshold:.1}",
                out.overall_confidence
            ));
        }
        out.success = out.errors.is_empty();
        out.verification_level = result_level(&out).min(bundle.verification_level);

        debug!(
            did = %bundle.did,
            %mode,
            success = out.success,
            overall = out.overall_confidence,
            level = out.verification_level,
            errors = out.errors.len(),
            warnings = out.warnings.len(),
            "offline verification finished"
        );
        out
    }

    /// The fail-fast checks. Returns the issuer key on success.
    fn gate(
        &self,
        bundle: &OfflineVerificationData,
        request: &OfflineVerificationRequest,
    ) -> Result<&[u8], String> {
        check_structure(bundle)?;
        if bundle.is_expired(self.now) {
            return Err(format!("bundle expired at {}", bundle.expires_at));
        }
        if request.mode == VerificationMode::Emergency && !self.config.emergency_mode_enabled {
            return Err("emergency verification is disabled".to_string());
        }
        let key = self
            .trusted_issuers
            .get(&bundle.issuer_did)
            .ok_or_else(|| format!("issuer {} is not trusted", bundle.issuer_did))?;

        let digest = bundle
            .digest(&self.codec)
            .map_err(|e| format!("bundle cannot be hashed: {e}"))?;
        if !hex::encode(digest).eq_ignore_ascii_case(&bundle.data_hash) {
            return Err("bundle data hash mismatch".to_string());
        }
        self.codec
            .verify_digest(key, &digest, &bundle.signature)
            .map_err(|_| "bundle signature does not verify".to_string())?;

        if request.did != bundle.did {
            return Err(format!(
                "request is for {}, bundle is for {}",
                request.did, bundle.did
            ));
        }
        Ok(key.as_slice())
    }

    /// Revocation hits against the bundle's own DID and credentials. Returns
    /// the revoked credential IDs so the credential walk can skip them.
    fn revocation(
        &self,
        bundle: &OfflineVerificationData,
        mode: VerificationMode,
        out: &mut OfflineVerificationResult,
    ) -> BTreeSet<String> {
        let rev = &bundle.revocation_data;
        let own_credentials: BTreeSet<&str> = bundle.credential_ids().collect();
        let mut identity_revoked = rev.is_identity_revoked(&bundle.did);
        let mut revoked: BTreeSet<String> = own_credentials
            .iter()
            .filter(|id| rev.is_credential_revoked(id))
            .map(|id| id.to_string())
            .collect();

        if !rev.merkle_proofs.is_empty() {
            match decode_hash(&rev.merkle_root) {
                Some(root) => {
                    for (id, proof) in &rev.merkle_proofs {
                        let is_identity = *id == bundle.did;
                        if !is_identity && !own_credentials.contains(id.as_str()) {
                            continue;
                        }
                        let leaf = RevocationData::leaf(&self.codec, id);
                        if !verify_merkle_proof(&leaf, proof, &root) {
                            out.warnings
                                .push(format!("revocation proof for {id} does not match the root"));
                        } else if is_identity {
                            identity_revoked = true;
                        } else {
                            revoked.insert(id.clone());
                        }
                    }
                }
                None => out
                    .warnings
                    .push("revocation merkle root is malformed".to_string()),
            }
        }

        let fatal = !mode.tolerates_revocation();
        if identity_revoked {
            note(out, fatal, format!("identity {} is revoked", bundle.did));
        }
        for id in &revoked {
            note(out, fatal, format!("credential {id} is revoked"));
        }
        out.not_revoked = !identity_revoked && revoked.is_empty();

        if rev.is_stale(self.now) {
            note(
                out,
                mode == VerificationMode::Full,
                format!("revocation data went stale at {}", rev.valid_until),
            );
        }
        revoked
    }

    /// Proof validity, freshness and level, blended 50/30/20.
    fn identity(
        &self,
        bundle: &OfflineVerificationData,
        request: &OfflineVerificationRequest,
        issuer_key: &[u8],
        out: &mut OfflineVerificationResult,
    ) -> f64 {
        let mode = request.mode;
        let proof = &bundle.identity_proof;
        let mut valid = proof.proof_type == ProofType::Ed25519Signature2020
            && self
                .codec
                .verify_detached(
                    issuer_key,
                    DOMAIN_IDENTITY_PROOF,
                    &IdentityClaim::of(bundle, proof),
                    &proof.proof_value,
                )
                .is_ok();
        if !valid {
            note(
                out,
                mode != VerificationMode::Emergency,
                "identity proof does not verify".to_string(),
            );
        }

        match &request.challenge_response {
            Some(response) => {
                let holder_key = hex::decode(&bundle.public_key).unwrap_or_default();
                let answered = self
                    .codec
                    .verify_detached(
                        &holder_key,
                        DOMAIN_CHALLENGE,
                        &request.challenge_claim(),
                        response,
                    )
                    .is_ok();
                if !answered {
                    valid = false;
                    out.errors
                        .push("challenge response does not verify".to_string());
                }
            }
            None if mode == VerificationMode::Full => {
                valid = false;
                out.errors
                    .push("full verification requires a challenge response".to_string());
            }
            None => out
                .warnings
                .push("no challenge response, key possession not shown".to_string()),
        }
        out.identity_verified = valid;

        let window = self.config.max_offline_duration().num_seconds().max(1) as f64;
        let age = (self.now - bundle.issued_at).num_seconds().max(0) as f64;
        let freshness = (100.0 * (1.0 - age / window)).clamp(0.0, 100.0);
        if age > window {
            out.warnings.push(format!(
                "bundle data is {age:.0}s old, past the {window:.0}s offline window"
            ));
        }

        let required = request.required_level.max(MIN_VERIFICATION_LEVEL);
        let level = 100.0 * (f64::from(bundle.verification_level) / f64::from(required)).min(1.0);
        if bundle.verification_level < required {
            note(
                out,
                mode == VerificationMode::Full,
                format!(
                    "bundle is verified to level {}, request needs {required}",
                    bundle.verification_level
                ),
            );
        }

        let proof_score = if valid { 100.0 } else { 0.0 };
        0.5 * proof_score + 0.3 * freshness + 0.2 * level
    }

    fn kyc(
        &self,
        bundle: &OfflineVerificationData,
        mode: VerificationMode,
        issuer_key: &[u8],
        out: &mut OfflineVerificationResult,
    ) -> f64 {
        let fatal = mode == VerificationMode::Full;
        match &bundle.kyc_proof {
            None => {
                note(out, fatal, "bundle carries no KYC proof".to_string());
                0.0
            }
            Some(proof) => {
                out.kyc_verified = proof.proof_type == ProofType::KycProof2020
                    && self
                        .codec
                        .verify_detached(
                            issuer_key,
                            DOMAIN_KYC_PROOF,
                            &KycClaim::of(bundle, proof),
                            &proof.proof_value,
                        )
                        .is_ok();
                if out.kyc_verified {
                    100.0
                } else {
                    note(out, fatal, "KYC proof does not verify".to_string());
                    0.0
                }
            }
        }
    }

    /// Walk credentials by priority until every required type is covered.
    fn credentials(
        &self,
        bundle: &OfflineVerificationData,
        request: &OfflineVerificationRequest,
        issuer_key: &[u8],
        revoked: &BTreeSet<String>,
        out: &mut OfflineVerificationResult,
    ) -> f64 {
        let required: BTreeSet<&str> = request.required_types.iter().map(String::as_str).collect();
        let mut satisfied: BTreeSet<&str> = BTreeSet::new();
        let mut valid = 0usize;

        let mut ordered: Vec<&OfflineCredential> = bundle.credentials.iter().collect();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority));

        for credential in ordered {
            if !required.is_empty() && satisfied.len() == required.len() {
                break;
            }
            if revoked.contains(&credential.id) {
                continue;
            }
            if credential.is_expired(self.now) {
                out.warnings
                    .push(format!("credential {} has expired", credential.id));
                continue;
            }
            let attested = self
                .codec
                .verify_detached(
                    issuer_key,
                    DOMAIN_CREDENTIAL,
                    &CredentialClaim::of(&bundle.did, credential),
                    &credential.proof.proof_value,
                )
                .is_ok();
            if !attested {
                out.warnings
                    .push(format!("credential {} has an invalid proof", credential.id));
                continue;
            }

            valid += 1;
            for ty in &credential.types {
                if !out.verified_types.contains(ty) {
                    out.verified_types.push(ty.clone());
                }
                if required.contains(ty.as_str()) {
                    satisfied.insert(ty.as_str());
                }
            }
        }

        let (ok, score) = if required.is_empty() {
            (valid > 0, if valid > 0 { 100.0 } else { 0.0 })
        } else {
            (
                satisfied.len() == required.len(),
                100.0 * satisfied.len() as f64 / required.len() as f64,
            )
        };
        out.credentials_valid = ok;
        if !ok {
            let reason = if required.is_empty() {
                "bundle carries no valid credentials".to_string()
            } else {
                let missing: Vec<&str> = required.difference(&satisfied).copied().collect();
                format!("required credential types not satisfied: {}", missing.join(", "))
            };
            note(out, request.mode == VerificationMode::Full, reason);
        }
        score
    }

    /// Best match over the modalities both sides have. `None` when
    /// biometrics were not engaged or could not be evaluated.
    fn biometric(
        &self,
        bundle: &OfflineVerificationData,
        request: &OfflineVerificationRequest,
        issuer_key: &[u8],
        out: &mut OfflineVerificationResult,
    ) -> Option<f64> {
        if request.biometric_samples.is_empty() && bundle.biometric_proof.is_none() {
            return None;
        }
        let fatal = request.mode == VerificationMode::Full;

        let attested = bundle.biometric_proof.as_ref().is_some_and(|proof| {
            proof.proof_type == ProofType::BiometricProof2020
                && self
                    .codec
                    .verify_detached(
                        issuer_key,
                        DOMAIN_BIOMETRIC_PROOF,
                        &BiometricClaim::of(bundle, proof),
                        &proof.proof_value,
                    )
                    .is_ok()
        });
        if !attested {
            note(out, fatal, "bundle carries no attested biometric templates".to_string());
            return None;
        }

        let mut best: Option<f64> = None;
        for (modality, sample) in &request.biometric_samples {
            let Some(template) = bundle.biometric_templates.get(modality) else {
                continue;
            };
            if template.expires_at.is_some_and(|exp| exp < self.now) {
                out.warnings.push(format!("{modality} template has expired"));
                continue;
            }
            if !hex::encode(blake3_hash(&template.template)).eq_ignore_ascii_case(&template.template_hash) {
                out.warnings
                    .push(format!("{modality} template does not match its hash"));
                continue;
            }
            let score = clamp_score(self.matcher.score(template, sample)) * 100.0;
            best = Some(best.map_or(score, |b: f64| b.max(score)));
        }

        let Some(score) = best else {
            note(out, fatal, "no biometric sample for an enrolled modality".to_string());
            return None;
        };
        out.biometric_confidence = score;
        out.biometric_verified = score >= self.config.biometric_threshold;
        if !out.biometric_verified {
            note(
                out,
                fatal,
                format!(
                    "biometric match {score:.1} is below the threshold {:.1}",
                    self.config.biometric_threshold
                ),
            );
        }
        Some(score)
    }
}

impl std::fmt::Debug for OfflineVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineVerifier")
            .field("config", &self.config)
            .field("trusted_issuers", &self.trusted_issuers.keys().collect::<Vec<_>>())
            .field("now", &self.now)
            .finish()
    }
}

fn note(out: &mut OfflineVerificationResult, fatal: bool, message: String) {
    if fatal {
        out.errors.push(message);
    } else {
        out.warnings.push(message);
    }
}

fn check_structure(bundle: &OfflineVerificationData) -> Result<(), String> {
    validate_did(&bundle.did).map_err(|e| format!("corrupt bundle: {e}"))?;
    validate_did(&bundle.issuer_did).map_err(|e| format!("corrupt bundle issuer: {e}"))?;
    let key_ok = hex::decode(&bundle.public_key)
        .map(|k| k.len() == VERIFYING_KEY_LENGTH)
        .unwrap_or(false);
    if !key_ok {
        return Err("corrupt bundle: public key is not a 32-byte hex key".to_string());
    }
    if !(MIN_VERIFICATION_LEVEL..=MAX_VERIFICATION_LEVEL).contains(&bundle.verification_level) {
        return Err(format!(
            "corrupt bundle: verification level {} out of range",
            bundle.verification_level
        ));
    }
    if bundle.issued_at > bundle.expires_at {
        return Err("corrupt bundle: issued after it expires".to_string());
    }
    if bundle.data_hash.is_empty() || bundle.signature.is_empty() {
        return Err("corrupt bundle: not sealed".to_string());
    }
    Ok(())
}

fn result_level(out: &OfflineVerificationResult) -> u8 {
    if !out.identity_verified {
        0
    } else if out.kyc_verified && out.credentials_valid && out.not_revoked {
        4
    } else if out.biometric_verified {
        3
    } else if out.kyc_verified {
        2
    } else {
        1
    }
}
