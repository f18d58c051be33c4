//! # Offline Package Builder
//!
//! Mints signed, self-contained verification bundles from the identity
//! store's current state.
//!
//! Every claim a verifier relies on is attested separately (identity, KYC,
//! biometric templates, each credential) so a device can check the parts it
//! cares about. The whole bundle is then hashed with `data_hash` and
//! `signature` blank, and the issuer signs that digest.
//!
//! Small formats have hard size budgets. When `fit_to_budget` is on and a
//! bundle does not fit, biometric templates go first, then credentials from
//! the lowest priority up, re-sealing after every cut.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::encoding::{self, EncodingError};
use super::types::{
    BiometricClaim, BundleFormat, CredentialClaim, CryptographicProof, IdentityClaim, KycClaim,
    OfflineCredential, OfflineVerificationData, ProofType, RevocationData,
};
use crate::clock::Clock;
use crate::config::{
    BundleConfig, DOMAIN_BIOMETRIC_PROOF, DOMAIN_CREDENTIAL, DOMAIN_IDENTITY_PROOF,
    DOMAIN_KYC_PROOF, DOMAIN_REVOCATION_LIST, KYC_PROOF_MIN_LEVEL, MAX_BUNDLE_EXPIRATION_HOURS,
    MAX_VERIFICATION_LEVEL, MIN_VERIFICATION_LEVEL,
};
use crate::crypto::codec::{CodecError, IntegrityCodec};
use crate::crypto::hash::{merkle_proof, merkle_root};
use crate::crypto::signatures::Signer;
use crate::error::ErrorKind;
use crate::identity::did::validate_did;
use crate::identity::store::{
    BiometricModality, BiometricTemplate, CredentialRecord, IdentityRecord, IdentityStore,
    RevocationSnapshot, StoreError,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("invalid bundle request: {0}")]
    InvalidRequest(String),

    #[error("no identity on record for {0}")]
    IdentityNotFound(String),

    #[error("{did} is verified to level {actual}, bundle requires {required}")]
    InsufficientLevel {
        did: String,
        actual: u8,
        required: u8,
    },

    #[error("{format} bundle needs {size} bytes, budget is {budget}")]
    BundleTooLarge {
        format: BundleFormat,
        size: usize,
        budget: usize,
    },

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BundleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BundleError::InvalidRequest(_)
            | BundleError::InsufficientLevel { .. }
            | BundleError::BundleTooLarge { .. } => ErrorKind::Validation,
            BundleError::IdentityNotFound(_) => ErrorKind::NotFound,
            BundleError::Encoding(e) => e.kind(),
            BundleError::Codec(e) => e.kind(),
            BundleError::Store(e) => e.kind(),
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    pub did: String,
    pub format: BundleFormat,
    pub expiration_hours: u32,
    pub required_level: u8,
    /// Credential IDs or types to carry. Empty means every offline-usable
    /// credential.
    pub include_credentials: Vec<String>,
    pub include_biometric: bool,
}

impl BuildRequest {
    /// A one-day, level-1 bundle with all offline-usable credentials.
    pub fn new(did: impl Into<String>, format: BundleFormat) -> Self {
        Self {
            did: did.into(),
            format,
            expiration_hours: 24,
            required_level: MIN_VERIFICATION_LEVEL,
            include_credentials: Vec::new(),
            include_biometric: false,
        }
    }

    pub fn validate(&self) -> Result<(), BundleError> {
        validate_did(&self.did).map_err(|e| BundleError::InvalidRequest(e.to_string()))?;
        if self.expiration_hours == 0 || self.expiration_hours > MAX_BUNDLE_EXPIRATION_HOURS {
            return Err(BundleError::InvalidRequest(format!(
                "expiration_hours must be in 1..={MAX_BUNDLE_EXPIRATION_HOURS}, got {}",
                self.expiration_hours
            )));
        }
        if !(MIN_VERIFICATION_LEVEL..=MAX_VERIFICATION_LEVEL).contains(&self.required_level) {
            return Err(BundleError::InvalidRequest(format!(
                "required_level must be in {MIN_VERIFICATION_LEVEL}..={MAX_VERIFICATION_LEVEL}, got {}",
                self.required_level
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct OfflinePackageBuilder {
    store: Arc<dyn IdentityStore>,
    codec: IntegrityCodec,
    issuer_did: String,
    signer: Arc<dyn Signer>,
    clock: Arc<dyn Clock>,
    config: BundleConfig,
}

impl OfflinePackageBuilder {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        codec: IntegrityCodec,
        issuer_did: impl Into<String>,
        signer: Arc<dyn Signer>,
        clock: Arc<dyn Clock>,
        config: BundleConfig,
    ) -> Self {
        Self {
            store,
            codec,
            issuer_did: issuer_did.into(),
            signer,
            clock,
            config,
        }
    }

    pub fn issuer_did(&self) -> &str {
        &self.issuer_did
    }

    pub fn issuer_public_key(&self) -> Vec<u8> {
        self.signer.public_key_bytes()
    }

    pub fn build(&self, request: &BuildRequest) -> Result<OfflineVerificationData, BundleError> {
        self.build_encoded(request).map(|(bundle, _)| bundle)
    }

    /// Build and encode in one go; the bytes are the ones that were checked
    /// against the format's budget.
    pub fn build_encoded(
        &self,
        request: &BuildRequest,
    ) -> Result<(OfflineVerificationData, Vec<u8>), BundleError> {
        request.validate()?;

        let identity = self
            .store
            .identity(&request.did)?
            .ok_or_else(|| BundleError::IdentityNotFound(request.did.clone()))?;
        if identity.verification_level < request.required_level {
            return Err(BundleError::InsufficientLevel {
                did: request.did.clone(),
                actual: identity.verification_level,
                required: request.required_level,
            });
        }

        let now = self.clock.now();
        let mut bundle = self.assemble(&identity, request, now)?;
        let bytes = self.fit(&mut bundle)?;

        info!(
            did = %bundle.did,
            format = %bundle.format,
            credentials = bundle.credentials.len(),
            biometrics = bundle.biometric_templates.len(),
            size = bytes.len(),
            expires_at = %bundle.expires_at,
            "offline bundle built"
        );
        Ok((bundle, bytes))
    }

    fn assemble(
        &self,
        identity: &IdentityRecord,
        request: &BuildRequest,
        now: DateTime<Utc>,
    ) -> Result<OfflineVerificationData, BundleError> {
        let did = identity.did.as_str();
        let credentials = self.credentials(did, &request.include_credentials, now)?;

        let templates = if request.include_biometric {
            self.templates(did, now)?
        } else {
            BTreeMap::new()
        };

        let mut contacts = self.store.emergency_contacts(did)?;
        // Call-list order: priority 1 is tried first.
        contacts.sort_by_key(|c| c.priority);

        let credential_ids: BTreeSet<&str> = credentials.iter().map(|c| c.id.as_str()).collect();
        let revocation_data =
            self.revocation_data(&self.store.revocation_snapshot()?, did, &credential_ids)?;

        let mut bundle = OfflineVerificationData {
            did: did.to_string(),
            identity_hash: identity.identity_hash.clone(),
            public_key: identity.public_key.clone(),
            issued_at: now,
            expires_at: now + chrono::Duration::hours(i64::from(request.expiration_hours)),
            issuer_did: self.issuer_did.clone(),
            verification_level: identity.verification_level,
            kyc_level: identity.kyc_level,
            identity_proof: self.draft_proof(ProofType::Ed25519Signature2020, "authentication", now),
            kyc_proof: None,
            biometric_proof: None,
            credentials,
            revocation_data,
            biometric_templates: templates,
            emergency_contacts: contacts,
            format: request.format,
            data_hash: String::new(),
            signature: String::new(),
        };

        let mut proof = bundle.identity_proof.clone();
        proof.proof_value = self.sign(DOMAIN_IDENTITY_PROOF, &IdentityClaim::of(&bundle, &proof))?;
        bundle.identity_proof = proof;

        if identity.kyc_level >= KYC_PROOF_MIN_LEVEL {
            let mut proof = self.draft_proof(ProofType::KycProof2020, "kycVerification", now);
            proof.proof_value = self.sign(DOMAIN_KYC_PROOF, &KycClaim::of(&bundle, &proof))?;
            bundle.kyc_proof = Some(proof);
        }

        if !bundle.biometric_templates.is_empty() {
            let mut proof =
                self.draft_proof(ProofType::BiometricProof2020, "biometricVerification", now);
            proof.proof_value =
                self.sign(DOMAIN_BIOMETRIC_PROOF, &BiometricClaim::of(&bundle, &proof))?;
            bundle.biometric_proof = Some(proof);
        }

        Ok(bundle)
    }

    /// Selected credentials, highest priority first, each re-attested.
    fn credentials(
        &self,
        did: &str,
        include: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<OfflineCredential>, BundleError> {
        let mut selected: Vec<CredentialRecord> = self
            .store
            .credentials(did)?
            .into_iter()
            .filter(|c| {
                if include.is_empty() {
                    c.offline_usable
                } else {
                    include.iter().any(|sel| *sel == c.id || c.has_type(sel))
                }
            })
            .filter(|c| {
                let live = !c.is_expired(now);
                if !live {
                    debug!(did, credential = %c.id, "skipping expired credential");
                }
                live
            })
            .collect();
        selected.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        selected
            .into_iter()
            .map(|record| {
                let mut credential = OfflineCredential {
                    id: record.id,
                    types: record.types,
                    issuer: record.issuer,
                    issuance_date: record.issuance_date,
                    expiration_date: record.expiration_date,
                    subject: record.subject,
                    proof: self.draft_proof(ProofType::Ed25519Signature2020, "assertionMethod", now),
                    offline_usable: record.offline_usable,
                    priority: record.priority,
                };
                credential.proof.proof_value =
                    self.sign(DOMAIN_CREDENTIAL, &CredentialClaim::of(did, &credential))?;
                Ok(credential)
            })
            .collect()
    }

    /// Unexpired templates, the best quality one per modality.
    fn templates(
        &self,
        did: &str,
        now: DateTime<Utc>,
    ) -> Result<BTreeMap<BiometricModality, BiometricTemplate>, BundleError> {
        let mut by_modality = BTreeMap::new();
        for template in self.store.biometric_templates(did)? {
            if template.expires_at.is_some_and(|exp| exp < now) {
                continue;
            }
            match by_modality.get(&template.modality) {
                Some(BiometricTemplate { quality, .. }) if *quality >= template.quality => {}
                _ => {
                    by_modality.insert(template.modality, template);
                }
            }
        }
        Ok(by_modality)
    }

    fn revocation_data(
        &self,
        snapshot: &RevocationSnapshot,
        did: &str,
        credential_ids: &BTreeSet<&str>,
    ) -> Result<RevocationData, BundleError> {
        let concerns = |id: &str| id == did || credential_ids.contains(id);

        let all: Vec<&str> = snapshot
            .revoked_credential_ids
            .iter()
            .chain(&snapshot.revoked_identity_ids)
            .map(String::as_str)
            .collect();
        let leaves: Vec<[u8; 32]> = all
            .iter()
            .map(|id| RevocationData::leaf(&self.codec, id))
            .collect();
        let root = merkle_root(&leaves);

        let mut proofs = BTreeMap::new();
        for (index, id) in all.iter().enumerate() {
            if concerns(*id) {
                if let Some(proof) = merkle_proof(&leaves, index) {
                    proofs.insert(id.to_string(), proof);
                }
            }
        }

        let mut room = self.config.max_cached_revocations;
        let identity_ids = cache(&snapshot.revoked_identity_ids, &concerns, &mut room);
        let credential_ids = cache(&snapshot.revoked_credential_ids, &concerns, &mut room);
        let cached = identity_ids.len() + credential_ids.len();
        if cached < all.len() {
            debug!(
                did,
                cached,
                total = all.len(),
                "revocation list truncated for bundle"
            );
        }

        Ok(RevocationData {
            revocation_list_hash: self.codec.digest_hex(DOMAIN_REVOCATION_LIST, snapshot)?,
            last_updated: snapshot.last_updated,
            valid_until: snapshot.valid_until,
            revoked_credential_ids: credential_ids,
            revoked_identity_ids: identity_ids,
            merkle_root: hex::encode(root),
            merkle_proofs: proofs,
        })
    }

    /// Seal and encode until the bundle fits its format's budget.
    fn fit(&self, bundle: &mut OfflineVerificationData) -> Result<Vec<u8>, BundleError> {
        let budget = bundle.format.budget();
        loop {
            self.seal(bundle)?;
            let bytes = encoding::encode(bundle)?;
            if bytes.len() <= budget {
                return Ok(bytes);
            }
            if !self.config.fit_to_budget || !shed(bundle) {
                return Err(BundleError::BundleTooLarge {
                    format: bundle.format,
                    size: bytes.len(),
                    budget,
                });
            }
            warn!(
                did = %bundle.did,
                format = %bundle.format,
                size = bytes.len(),
                budget,
                credentials = bundle.credentials.len(),
                "bundle over budget, shedding payload"
            );
        }
    }

    fn seal(&self, bundle: &mut OfflineVerificationData) -> Result<(), BundleError> {
        let digest = bundle.digest(&self.codec)?;
        bundle.data_hash = hex::encode(digest);
        bundle.signature = hex::encode(self.signer.sign_bytes(&digest));
        Ok(())
    }

    fn draft_proof(&self, proof_type: ProofType, purpose: &str, now: DateTime<Utc>) -> CryptographicProof {
        CryptographicProof {
            proof_type,
            proof_value: String::new(),
            proof_purpose: purpose.to_string(),
            created: now,
            verification_method: format!("{}#key-1", self.issuer_did),
            nonce: Uuid::new_v4().simple().to_string(),
        }
    }

    fn sign<T: Serialize>(&self, domain: &str, claim: &T) -> Result<String, CodecError> {
        self.codec.sign_detached(self.signer.as_ref(), domain, claim)
    }
}

impl std::fmt::Debug for OfflinePackageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflinePackageBuilder")
            .field("issuer_did", &self.issuer_did)
            .field("config", &self.config)
            .finish()
    }
}

/// Entries of `list` that concern the bundle, then others while `room`
/// lasts. Concerning entries are kept even past the cap.
fn cache(list: &[String], concerns: &impl Fn(&str) -> bool, room: &mut usize) -> Vec<String> {
    let mut kept: Vec<String> = list
        .iter()
        .filter(|id| concerns(id.as_str()))
        .cloned()
        .collect();
    *room = room.saturating_sub(kept.len());
    let rest: Vec<String> = list
        .iter()
        .filter(|id| !concerns(id.as_str()))
        .take(*room)
        .cloned()
        .collect();
    *room -= rest.len();
    kept.extend(rest);
    kept
}

/// Drop the least valuable payload. `false` when nothing is left to drop.
fn shed(bundle: &mut OfflineVerificationData) -> bool {
    if !bundle.biometric_templates.is_empty() || bundle.biometric_proof.is_some() {
        bundle.biometric_templates.clear();
        bundle.biometric_proof = None;
        return true;
    }
    bundle.credentials.pop().is_some()
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::crypto::hash::{decode_hash, verify_merkle_proof};
    use crate::identity::store::fixtures::credential;

    #[test]
    fn bundle_is_sealed_by_issuer() {
        let f = fixture();
        let bundle = f
            .builder
            .build(&BuildRequest::new(f.did.clone(), BundleFormat::SelfContained))
            .unwrap();
        let codec = IntegrityCodec::standard();
        let digest = bundle.digest(&codec).unwrap();
        assert_eq!(bundle.data_hash, hex::encode(digest));
        codec
            .verify_digest(f.issuer.public_key().as_bytes(), &digest, &bundle.signature)
            .unwrap();
        assert_eq!(bundle.issuer_did, f.issuer_did);
        assert_eq!(bundle.expires_at - bundle.issued_at, chrono::Duration::hours(24));
    }

    #[test]
    fn credentials_are_priority_ordered_and_attested() {
        let f = fixture();
        let bundle = f
            .builder
            .build(&BuildRequest::new(f.did.clone(), BundleFormat::SelfContained))
            .unwrap();
        let ids: Vec<_> = bundle.credential_ids().collect();
        assert_eq!(ids, vec!["cred-kyc", "cred-age"]);

        let codec = IntegrityCodec::standard();
        for cred in &bundle.credentials {
            codec
                .verify_detached(
                    f.issuer.public_key().as_bytes(),
                    DOMAIN_CREDENTIAL,
                    &CredentialClaim::of(&f.did, cred),
                    &cred.proof.proof_value,
                )
                .unwrap();
        }
    }

    #[test]
    fn include_filter_matches_id_or_type() {
        let f = fixture();
        let mut req = BuildRequest::new(f.did.clone(), BundleFormat::SelfContained);
        req.include_credentials = vec!["AgeCredential".into()];
        let bundle = f.builder.build(&req).unwrap();
        assert_eq!(bundle.credential_ids().collect::<Vec<_>>(), vec!["cred-age"]);

        req.include_credentials = vec!["cred-kyc".into()];
        let bundle = f.builder.build(&req).unwrap();
        assert_eq!(bundle.credential_ids().collect::<Vec<_>>(), vec!["cred-kyc"]);
    }

    #[test]
    fn kyc_and_biometric_proofs_are_conditional() {
        let f = fixture();
        let mut req = BuildRequest::new(f.did.clone(), BundleFormat::SelfContained);
        let plain = f.builder.build(&req).unwrap();
        assert!(plain.kyc_proof.is_some());
        assert!(plain.biometric_proof.is_none());
        assert!(plain.biometric_templates.is_empty());

        req.include_biometric = true;
        let with_bio = f.builder.build(&req).unwrap();
        assert!(with_bio.biometric_proof.is_some());
        assert_eq!(with_bio.biometric_templates.len(), 1);
    }

    #[test]
    fn rejects_bad_requests() {
        let f = fixture();
        let mut req = BuildRequest::new(f.did.clone(), BundleFormat::SelfContained);
        req.expiration_hours = 0;
        assert!(matches!(f.builder.build(&req), Err(BundleError::InvalidRequest(_))));
        req.expiration_hours = MAX_BUNDLE_EXPIRATION_HOURS + 1;
        assert!(matches!(f.builder.build(&req), Err(BundleError::InvalidRequest(_))));
        req.expiration_hours = MAX_BUNDLE_EXPIRATION_HOURS;
        req.required_level = 6;
        assert_eq!(f.builder.build(&req).unwrap_err().kind(), ErrorKind::Validation);

        req.required_level = 5;
        assert!(matches!(
            f.builder.build(&req),
            Err(BundleError::InsufficientLevel { actual: 4, required: 5, .. })
        ));

        let unknown = BuildRequest::new("did:example:nobody", BundleFormat::SelfContained);
        assert_eq!(f.builder.build(&unknown).unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn revocations_concerning_the_bundle_carry_proofs() {
        let f = fixture();
        f.store.revoke_credential("someone-elses");
        f.store.revoke_credential("cred-age");
        f.store.revoke_identity("did:example:mallory");
        let bundle = f
            .builder
            .build(&BuildRequest::new(f.did.clone(), BundleFormat::SelfContained))
            .unwrap();

        let rev = &bundle.revocation_data;
        assert!(rev.is_credential_revoked("cred-age"));
        assert_eq!(rev.merkle_proofs.len(), 1);
        let proof = &rev.merkle_proofs["cred-age"];
        let root = decode_hash(&rev.merkle_root).unwrap();
        let leaf = RevocationData::leaf(&IntegrityCodec::standard(), "cred-age");
        assert!(verify_merkle_proof(&leaf, proof, &root));
    }

    #[test]
    fn revocation_cache_keeps_relevant_entries() {
        let f = fixture_with(BundleConfig {
            max_cached_revocations: 3,
            fit_to_budget: true,
        });
        for i in 0..10 {
            f.store.revoke_credential(&format!("other-{i}"));
        }
        f.store.revoke_credential("cred-kyc");
        let bundle = f
            .builder
            .build(&BuildRequest::new(f.did.clone(), BundleFormat::SelfContained))
            .unwrap();
        let cached = &bundle.revocation_data.revoked_credential_ids;
        assert_eq!(cached.len(), 3);
        assert_eq!(cached[0], "cred-kyc");
    }

    fn crowded() -> Fixture {
        let f = fixture();
        for i in 0..40u8 {
            let mut cred = credential(&format!("bulk-{i:02}"), "MembershipCredential", i);
            cred.subject.insert(
                "notes".into(),
                crate::identity::store::ClaimValue::Text("x".repeat(64)),
            );
            f.store.add_credential(&f.did, cred);
        }
        f
    }

    #[test]
    fn qr_bundles_shed_to_fit() {
        let f = crowded();
        let mut req = BuildRequest::new(f.did.clone(), BundleFormat::QrCode);
        req.include_biometric = true;
        let (bundle, bytes) = f.builder.build_encoded(&req).unwrap();

        assert!(bytes.len() <= BundleFormat::QrCode.budget());
        assert!(bundle.biometric_templates.is_empty());
        assert!(bundle.biometric_proof.is_none());
        assert!(bundle.credentials.len() < 42);
        // the survivors are the highest priority ones
        assert_eq!(bundle.credentials[0].id, "cred-kyc");
        assert_eq!(encoding::decode(&bytes, BundleFormat::QrCode).unwrap(), bundle);
    }

    #[test]
    fn over_budget_without_fitting_fails() {
        let f = crowded();
        let builder = OfflinePackageBuilder::new(
            f.store.clone(),
            IntegrityCodec::standard(),
            f.issuer_did.clone(),
            Arc::new(f.issuer.clone()),
            f.clock.clone(),
            BundleConfig {
                fit_to_budget: false,
                ..BundleConfig::default()
            },
        );
        let err = builder
            .build(&BuildRequest::new(f.did.clone(), BundleFormat::QrCode))
            .unwrap_err();
        assert!(matches!(err, BundleError::BundleTooLarge { budget: 4096, .. }));

        // the same payload is fine as a file
        builder
            .build(&BuildRequest::new(f.did.clone(), BundleFormat::Compressed))
            .unwrap();
    }
}
