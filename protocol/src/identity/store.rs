//! # Identity & Credential Store
//!
//! Credential issuance and DID-document lifecycle are somebody else's
//! problem. Custodia reads from whatever system owns them through the
//! [`IdentityStore`] trait, and writes back exactly two things, both during
//! recovery execution, through [`ControllerRegistry`].
//!
//! [`MemoryIdentityStore`] is the in-process implementation used by tests
//! and the CLI. It serializes to a JSON snapshot, which is also the file
//! format `custodia bundle build --store` reads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::IdentityNotFound(_) => ErrorKind::NotFound,
            StoreError::Unavailable(_) => ErrorKind::Internal,
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The current state of a DID as the store sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub did: String,
    /// Hash of the current DID document, as computed by the store.
    pub identity_hash: String,
    /// Hex-encoded Ed25519 public key of the current controller key.
    pub public_key: String,
    /// Address currently authorized to act for this identity.
    pub controller: String,
    pub verification_level: u8,
    pub kyc_level: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A claim value. Closed set; anything fancier goes in `List` or `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimValue {
    Text(String),
    Integer(i64),
    Boolean(bool),
    Date(DateTime<Utc>),
    List(Vec<ClaimValue>),
}

/// A verifiable credential as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub id: String,
    pub types: Vec<String>,
    pub issuer: String,
    pub issuance_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub subject: BTreeMap<String, ClaimValue>,
    pub offline_usable: bool,
    /// Higher goes first in offline bundles.
    pub priority: u8,
}

impl CredentialRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.is_some_and(|exp| now > exp)
    }

    pub fn has_type(&self, ty: &str) -> bool {
        self.types.iter().any(|t| t == ty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BiometricModality {
    Fingerprint,
    Face,
    Iris,
    Voice,
    Palm,
}

impl std::fmt::Display for BiometricModality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BiometricModality::Fingerprint => "fingerprint",
            BiometricModality::Face => "face",
            BiometricModality::Iris => "iris",
            BiometricModality::Voice => "voice",
            BiometricModality::Palm => "palm",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for BiometricModality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fingerprint" => Ok(BiometricModality::Fingerprint),
            "face" => Ok(BiometricModality::Face),
            "iris" => Ok(BiometricModality::Iris),
            "voice" => Ok(BiometricModality::Voice),
            "palm" => Ok(BiometricModality::Palm),
            other => Err(format!("unknown biometric modality: {other}")),
        }
    }
}

/// An enrolled biometric template. The bytes are opaque to Custodia; only
/// the matcher knows what they mean.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricTemplate {
    pub modality: BiometricModality,
    #[serde(with = "hex::serde")]
    pub template: Vec<u8>,
    /// Hex BLAKE3 of `template`.
    pub template_hash: String,
    /// Enrollment quality, 0–100.
    pub quality: u8,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BiometricTemplate {
    pub fn new(modality: BiometricModality, template: Vec<u8>, quality: u8) -> Self {
        let template_hash = hex::encode(crate::crypto::hash::blake3_hash(&template));
        Self {
            modality,
            template,
            template_hash,
            quality,
            created_at: Utc::now(),
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyContact {
    pub name: String,
    pub relationship: String,
    pub contact_method: String,
    /// Hex public key the contact can use to vouch for the holder.
    pub verification_key: String,
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub consent_id: String,
    pub purpose: String,
    pub granted_to: String,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub policy_id: String,
    pub resource: String,
    pub actions: Vec<String>,
    pub grantees: Vec<String>,
}

/// Key material or proofs the holder wants restored after recovery,
/// e.g. ZK proving keys or signed attestations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofMaterial {
    pub proof_id: String,
    pub proof_type: String,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
}

/// The revocation list as of the last online sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationSnapshot {
    pub revoked_credential_ids: Vec<String>,
    pub revoked_identity_ids: Vec<String>,
    pub last_updated: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

impl Default for RevocationSnapshot {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            revoked_credential_ids: Vec::new(),
            revoked_identity_ids: Vec::new(),
            last_updated: now,
            valid_until: now + chrono::Duration::days(7),
        }
    }
}

/// Everything a backup captures for one holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderState {
    pub identity: IdentityRecord,
    pub credentials: Vec<CredentialRecord>,
    pub biometrics: Vec<BiometricTemplate>,
    pub consents: Vec<ConsentRecord>,
    pub access_policies: Vec<AccessPolicy>,
    pub proof_material: Vec<ProofMaterial>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Read-only view of the identity/credential system.
pub trait IdentityStore: Send + Sync {
    fn identity(&self, did: &str) -> Result<Option<IdentityRecord>, StoreError>;

    fn credentials(&self, did: &str) -> Result<Vec<CredentialRecord>, StoreError>;

    fn biometric_templates(&self, did: &str) -> Result<Vec<BiometricTemplate>, StoreError>;

    fn emergency_contacts(&self, did: &str) -> Result<Vec<EmergencyContact>, StoreError>;

    fn revocation_snapshot(&self) -> Result<RevocationSnapshot, StoreError>;

    /// Full private state for backup, or `None` for an unknown holder.
    fn holder_state(&self, did: &str) -> Result<Option<HolderState>, StoreError>;
}

/// The two writes recovery execution performs.
pub trait ControllerRegistry: Send + Sync {
    /// Make `controller` the address authorized to act for `did`.
    fn install_controller(&self, did: &str, controller: &str) -> Result<(), StoreError>;

    /// Put back whatever sections a backup restored. Sections that failed to
    /// restore are `None` and leave the current value alone.
    fn restore_state(&self, did: &str, restored: RestoredState) -> Result<(), StoreError>;
}

/// Decrypted backup sections, section by section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoredState {
    pub identity: Option<IdentityRecord>,
    pub credentials: Option<Vec<CredentialRecord>>,
    pub biometrics: Option<Vec<BiometricTemplate>>,
    pub consents: Option<Vec<ConsentRecord>>,
    pub access_policies: Option<Vec<AccessPolicy>>,
    pub proof_material: Option<Vec<ProofMaterial>>,
}

// ---------------------------------------------------------------------------
// MemoryIdentityStore
// ---------------------------------------------------------------------------

/// Serializable contents of a [`MemoryIdentityStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub identities: BTreeMap<String, IdentityRecord>,
    pub credentials: BTreeMap<String, Vec<CredentialRecord>>,
    pub biometrics: BTreeMap<String, Vec<BiometricTemplate>>,
    pub contacts: BTreeMap<String, Vec<EmergencyContact>>,
    pub consents: BTreeMap<String, Vec<ConsentRecord>>,
    pub access_policies: BTreeMap<String, Vec<AccessPolicy>>,
    pub proof_material: BTreeMap<String, Vec<ProofMaterial>>,
    pub revocations: RevocationSnapshot,
}

/// In-memory store behind a single `RwLock`. Reads vastly outnumber writes.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    inner: RwLock<StoreSnapshot>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.inner.read().clone()
    }

    pub fn upsert_identity(&self, record: IdentityRecord) {
        self.inner
            .write()
            .identities
            .insert(record.did.clone(), record);
    }

    pub fn add_credential(&self, did: &str, credential: CredentialRecord) {
        self.inner
            .write()
            .credentials
            .entry(did.to_string())
            .or_default()
            .push(credential);
    }

    pub fn add_biometric(&self, did: &str, template: BiometricTemplate) {
        self.inner
            .write()
            .biometrics
            .entry(did.to_string())
            .or_default()
            .push(template);
    }

    pub fn add_contact(&self, did: &str, contact: EmergencyContact) {
        self.inner
            .write()
            .contacts
            .entry(did.to_string())
            .or_default()
            .push(contact);
    }

    pub fn add_consent(&self, did: &str, consent: ConsentRecord) {
        self.inner
            .write()
            .consents
            .entry(did.to_string())
            .or_default()
            .push(consent);
    }

    pub fn add_access_policy(&self, did: &str, policy: AccessPolicy) {
        self.inner
            .write()
            .access_policies
            .entry(did.to_string())
            .or_default()
            .push(policy);
    }

    pub fn add_proof_material(&self, did: &str, material: ProofMaterial) {
        self.inner
            .write()
            .proof_material
            .entry(did.to_string())
            .or_default()
            .push(material);
    }

    pub fn revoke_credential(&self, credential_id: &str) {
        let mut inner = self.inner.write();
        inner
            .revocations
            .revoked_credential_ids
            .push(credential_id.to_string());
        inner.revocations.last_updated = Utc::now();
    }

    pub fn revoke_identity(&self, did: &str) {
        let mut inner = self.inner.write();
        inner.revocations.revoked_identity_ids.push(did.to_string());
        inner.revocations.last_updated = Utc::now();
    }

    pub fn set_revocation_validity(&self, valid_until: DateTime<Utc>) {
        self.inner.write().revocations.valid_until = valid_until;
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn identity(&self, did: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.inner.read().identities.get(did).cloned())
    }

    fn credentials(&self, did: &str) -> Result<Vec<CredentialRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .credentials
            .get(did)
            .cloned()
            .unwrap_or_default())
    }

    fn biometric_templates(&self, did: &str) -> Result<Vec<BiometricTemplate>, StoreError> {
        Ok(self
            .inner
            .read()
            .biometrics
            .get(did)
            .cloned()
            .unwrap_or_default())
    }

    fn emergency_contacts(&self, did: &str) -> Result<Vec<EmergencyContact>, StoreError> {
        Ok(self
            .inner
            .read()
            .contacts
            .get(did)
            .cloned()
            .unwrap_or_default())
    }

    fn revocation_snapshot(&self) -> Result<RevocationSnapshot, StoreError> {
        Ok(self.inner.read().revocations.clone())
    }

    fn holder_state(&self, did: &str) -> Result<Option<HolderState>, StoreError> {
        let inner = self.inner.read();
        let Some(identity) = inner.identities.get(did).cloned() else {
            return Ok(None);
        };
        Ok(Some(HolderState {
            identity,
            credentials: inner.credentials.get(did).cloned().unwrap_or_default(),
            biometrics: inner.biometrics.get(did).cloned().unwrap_or_default(),
            consents: inner.consents.get(did).cloned().unwrap_or_default(),
            access_policies: inner.access_policies.get(did).cloned().unwrap_or_default(),
            proof_material: inner.proof_material.get(did).cloned().unwrap_or_default(),
        }))
    }
}

impl ControllerRegistry for MemoryIdentityStore {
    fn install_controller(&self, did: &str, controller: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        let record = inner
            .identities
            .get_mut(did)
            .ok_or_else(|| StoreError::IdentityNotFound(did.to_string()))?;
        record.controller = controller.to_string();
        record.updated_at = Utc::now();
        Ok(())
    }

    fn restore_state(&self, did: &str, restored: RestoredState) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.identities.contains_key(did) {
            return Err(StoreError::IdentityNotFound(did.to_string()));
        }
        if let Some(identity) = restored.identity {
            // The controller was just installed; the backup's copy is stale.
            let controller = inner
                .identities
                .get(did)
                .map(|r| r.controller.clone())
                .unwrap_or_else(|| identity.controller.clone());
            inner.identities.insert(
                did.to_string(),
                IdentityRecord {
                    controller,
                    updated_at: Utc::now(),
                    ..identity
                },
            );
        }
        if let Some(v) = restored.credentials {
            inner.credentials.insert(did.to_string(), v);
        }
        if let Some(v) = restored.biometrics {
            inner.biometrics.insert(did.to_string(), v);
        }
        if let Some(v) = restored.consents {
            inner.consents.insert(did.to_string(), v);
        }
        if let Some(v) = restored.access_policies {
            inner.access_policies.insert(did.to_string(), v);
        }
        if let Some(v) = restored.proof_material {
            inner.proof_material.insert(did.to_string(), v);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn identity(did: &str, public_key: &str) -> IdentityRecord {
        let now = Utc::now();
        IdentityRecord {
            did: did.to_string(),
            identity_hash: hex::encode(crate::crypto::hash::blake3_hash(did.as_bytes())),
            public_key: public_key.to_string(),
            controller: "cust1controller".to_string(),
            verification_level: 4,
            kyc_level: 2,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn credential(id: &str, ty: &str, priority: u8) -> CredentialRecord {
        let mut subject = BTreeMap::new();
        subject.insert("name".to_string(), ClaimValue::Text("Ada".into()));
        subject.insert("over18".to_string(), ClaimValue::Boolean(true));
        CredentialRecord {
            id: id.to_string(),
            types: vec!["VerifiableCredential".to_string(), ty.to_string()],
            issuer: "did:example:issuer".to_string(),
            issuance_date: Utc::now() - chrono::Duration::days(30),
            expiration_date: Some(Utc::now() + chrono::Duration::days(365)),
            subject,
            offline_usable: true,
            priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    const DID: &str = "did:example:alice";

    fn populated() -> MemoryIdentityStore {
        let store = MemoryIdentityStore::new();
        store.upsert_identity(identity(DID, "aa"));
        store.add_credential(DID, credential("cred-1", "KYCCredential", 10));
        store.add_consent(
            DID,
            ConsentRecord {
                consent_id: "c1".into(),
                purpose: "marketing".into(),
                granted_to: "did:example:shop".into(),
                granted_at: Utc::now(),
                expires_at: None,
            },
        );
        store
    }

    #[test]
    fn unknown_holder_has_no_state() {
        assert!(populated().holder_state("did:example:bob").unwrap().is_none());
    }

    #[test]
    fn holder_state_collects_sections() {
        let state = populated().holder_state(DID).unwrap().unwrap();
        assert_eq!(state.credentials.len(), 1);
        assert_eq!(state.consents.len(), 1);
        assert!(state.biometrics.is_empty());
    }

    #[test]
    fn install_controller_updates_record() {
        let store = populated();
        store.install_controller(DID, "cust1new").unwrap();
        assert_eq!(store.identity(DID).unwrap().unwrap().controller, "cust1new");
        assert_eq!(
            store.install_controller("did:example:bob", "x"),
            Err(StoreError::IdentityNotFound("did:example:bob".into()))
        );
    }

    #[test]
    fn restore_keeps_fresh_controller() {
        let store = populated();
        let backup_copy = store.identity(DID).unwrap().unwrap();
        store.install_controller(DID, "cust1new").unwrap();
        store
            .restore_state(
                DID,
                RestoredState {
                    identity: Some(backup_copy),
                    credentials: Some(vec![]),
                    ..RestoredState::default()
                },
            )
            .unwrap();
        assert_eq!(store.identity(DID).unwrap().unwrap().controller, "cust1new");
        assert!(store.credentials(DID).unwrap().is_empty());
    }

    #[test]
    fn revocations_accumulate() {
        let store = populated();
        store.revoke_credential("cred-1");
        store.revoke_identity("did:example:mallory");
        let snap = store.revocation_snapshot().unwrap();
        assert_eq!(snap.revoked_credential_ids, vec!["cred-1"]);
        assert_eq!(snap.revoked_identity_ids, vec!["did:example:mallory"]);
    }

    #[test]
    fn snapshot_roundtrips_through_json() {
        let store = populated();
        store.add_biometric(DID, BiometricTemplate::new(BiometricModality::Face, vec![1, 2, 3], 90));
        let json = serde_json::to_string(&store.snapshot()).unwrap();
        let restored = MemoryIdentityStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.snapshot(), store.snapshot());
    }

    #[test]
    fn credential_expiry() {
        let mut cred = credential("c", "T", 1);
        assert!(!cred.is_expired(Utc::now()));
        cred.expiration_date = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(cred.is_expired(Utc::now()));
        assert!(cred.has_type("T"));
    }

    #[test]
    fn modality_names_parse_back() {
        for m in [BiometricModality::Fingerprint, BiometricModality::Palm] {
            assert_eq!(m.to_string().parse::<BiometricModality>().unwrap(), m);
        }
        assert_eq!("FACE".parse::<BiometricModality>().unwrap(), BiometricModality::Face);
        assert!("retina".parse::<BiometricModality>().is_err());
    }
}
