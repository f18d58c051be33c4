//! # Backup Vault
//!
//! Creates, versions, and checks encrypted identity backups.
//!
//! A backup is sealed section by section: identity, credentials, biometrics,
//! consents, access policies, proof material. Each section is encrypted on
//! its own with its name bound as associated data. One damaged section
//! leaves the others readable, and sections cannot be shuffled between slots.
//! The integrity hash then commits to the sealed bytes of every section plus
//! the fields that say whose backup this is and which version.
//!
//! ## Versioning
//!
//! Versions are per holder and strictly increasing. Creating a backup takes
//! the holder's lock from a [`KeyedLocks`] table, bumps the holder's issued
//! version counter, and inserts the backup before releasing it. Deleting a
//! backup never hands its version out again. Older versions are kept for
//! audit and stay usable until they expire; nothing rewrites them.
//!
//! ## Status transitions
//!
//! Only the recovery coordinator moves a backup in and out of `Recovering`,
//! through the crate-private methods at the bottom of the impl. The move from
//! `Active` to `Recovering` is a compare-and-set under the map's entry lock,
//! which is what makes "at most one recovery per backup" hold.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{
    BackupStatus, BackupVerificationResult, EncryptedPayload, EncryptedSection, IdentityBackup,
    PayloadSection, RecoveryMethod, RecoveryPolicy,
};
use crate::clock::Clock;
use crate::config::{
    RecoveryConfig, BACKUP_SCHEMA_VERSION, COMPLETENESS_WARNING_THRESHOLD, DOMAIN_BACKUP_PAYLOAD,
    MAX_CONFIDENCE, MIN_CONFIDENCE,
};
use crate::crypto::codec::{CodecError, IntegrityCodec};
use crate::crypto::encryption::EncryptionError;
use crate::error::ErrorKind;
use crate::identity::did::validate_did;
use crate::identity::store::{HolderState, IdentityStore, RestoredState, StoreError};
use crate::sync::KeyedLocks;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid backup request: {0}")]
    InvalidRequest(String),

    #[error("no identity on record for {0}")]
    IdentityNotFound(String),

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("backup {0} has expired")]
    BackupExpired(String),

    #[error("backup {backup_id} is {status}")]
    BackupNotActive {
        backup_id: String,
        status: BackupStatus,
    },

    #[error("backup {backup_id} does not belong to {holder}")]
    NotOwner { backup_id: String, holder: String },

    #[error("integrity hash mismatch on backup {0}")]
    IntegrityMismatch(String),

    #[error("section {section} of backup {backup_id} is unreadable")]
    SectionUnreadable {
        backup_id: String,
        section: PayloadSection,
    },

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl VaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VaultError::InvalidRequest(_) => ErrorKind::Validation,
            VaultError::IdentityNotFound(_) | VaultError::BackupNotFound(_) => ErrorKind::NotFound,
            VaultError::BackupExpired(_) => ErrorKind::Expired,
            VaultError::BackupNotActive { status, .. } => match status {
                BackupStatus::Recovering => ErrorKind::Conflict,
                BackupStatus::Expired => ErrorKind::Expired,
                _ => ErrorKind::Validation,
            },
            VaultError::NotOwner { .. } => ErrorKind::Unauthorized,
            VaultError::IntegrityMismatch(_) | VaultError::SectionUnreadable { .. } => {
                ErrorKind::Integrity
            }
            VaultError::Encryption(EncryptionError::EmptyKey) => ErrorKind::Validation,
            VaultError::Encryption(_) => ErrorKind::Integrity,
            VaultError::Codec(e) => e.kind(),
            VaultError::Store(e) => e.kind(),
        }
    }
}

/// What the integrity hash commits to. The payload, plus enough of the
/// envelope that a payload cannot be replanted under another holder or
/// version.
#[derive(Serialize)]
struct IntegrityEnvelope<'a> {
    backup_id: &'a str,
    holder_did: &'a str,
    version: u64,
    encryption_method: &'a str,
    payload: &'a EncryptedPayload,
}

impl<'a> From<&'a IdentityBackup> for IntegrityEnvelope<'a> {
    fn from(b: &'a IdentityBackup) -> Self {
        Self {
            backup_id: &b.backup_id,
            holder_did: &b.holder_did,
            version: b.version,
            encryption_method: &b.encryption_method,
            payload: &b.encrypted_payload,
        }
    }
}

// ---------------------------------------------------------------------------
// BackupVault
// ---------------------------------------------------------------------------

pub struct BackupVault {
    backups: DashMap<String, IdentityBackup>,
    /// Backup IDs per holder, ascending by version.
    by_holder: DashMap<String, Vec<String>>,
    /// Highest version ever issued per holder. Deletion never lowers it.
    issued_versions: DashMap<String, u64>,
    holder_locks: KeyedLocks,
    store: Arc<dyn IdentityStore>,
    codec: IntegrityCodec,
    clock: Arc<dyn Clock>,
    config: RecoveryConfig,
}

impl BackupVault {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        codec: IntegrityCodec,
        clock: Arc<dyn Clock>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            backups: DashMap::new(),
            by_holder: DashMap::new(),
            issued_versions: DashMap::new(),
            holder_locks: KeyedLocks::new(),
            store,
            codec,
            clock,
            config,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Snapshot the holder's current private state into a new backup version.
    pub fn create_backup(
        &self,
        holder_did: &str,
        recovery_methods: Vec<RecoveryMethod>,
        encryption_key: &[u8],
        retention_days: u32,
        policy: RecoveryPolicy,
    ) -> Result<IdentityBackup, VaultError> {
        validate_did(holder_did).map_err(|e| VaultError::InvalidRequest(e.to_string()))?;
        self.validate_methods(&recovery_methods)?;
        if let Some(score) = policy.required_score {
            if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&score) {
                return Err(VaultError::InvalidRequest(format!(
                    "required score {score} outside {MIN_CONFIDENCE}..={MAX_CONFIDENCE}"
                )));
            }
        }
        if encryption_key.is_empty() {
            return Err(VaultError::InvalidRequest(
                "encryption key must not be empty".into(),
            ));
        }
        if retention_days == 0 || retention_days > self.config.max_retention_days {
            return Err(VaultError::InvalidRequest(format!(
                "retention must be 1..={} days, got {retention_days}",
                self.config.max_retention_days
            )));
        }

        let state = self
            .store
            .holder_state(holder_did)?
            .ok_or_else(|| VaultError::IdentityNotFound(holder_did.to_string()))?;
        let payload = self.seal_state(&state, encryption_key)?;

        let lock = self.holder_locks.handle(holder_did);
        let _guard = lock.lock();

        let version = self.next_version(holder_did);
        let now = self.clock.now();
        let mut backup = IdentityBackup {
            backup_id: format!("backup_{}", Uuid::new_v4().simple()),
            holder_did: holder_did.to_string(),
            version,
            created_at: now,
            expires_at: now + chrono::Duration::days(i64::from(retention_days)),
            retention_days,
            encryption_method: self.codec.suite().encryption_label().to_string(),
            encrypted_payload: payload,
            recovery_methods,
            recovery_policy: policy,
            integrity_hash: String::new(),
            status: BackupStatus::Active,
            recovery_epoch: 0,
        };
        backup.integrity_hash = self.integrity_hash(&backup)?;

        self.backups
            .insert(backup.backup_id.clone(), backup.clone());
        self.by_holder
            .entry(holder_did.to_string())
            .or_default()
            .push(backup.backup_id.clone());

        info!(
            backup_id = %backup.backup_id,
            holder = %holder_did,
            version,
            sections = backup.encrypted_payload.sections.len(),
            methods = backup.recovery_methods.len(),
            "identity backup created"
        );
        Ok(backup)
    }

    /// Recompute the integrity hash and, given a key, try every section.
    /// Never mutates the backup.
    pub fn verify_integrity(
        &self,
        backup_id: &str,
        verification_key: Option<&[u8]>,
    ) -> Result<BackupVerificationResult, VaultError> {
        let backup = self.get_backup(backup_id)?;
        let now = self.clock.now();

        let integrity_valid = self.integrity_hash(&backup)? == backup.integrity_hash;
        let decryption_valid = verification_key.map(|key| {
            backup
                .encrypted_payload
                .sections
                .iter()
                .all(|s| self.open_section(&backup, s, key).is_ok())
        });
        let completeness = backup.encrypted_payload.completeness();

        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        if !integrity_valid {
            issues.push("integrity hash mismatch: payload modified since creation".to_string());
            recommendations.push("create a new backup from current identity state".to_string());
        }
        match decryption_valid {
            Some(false) => {
                issues.push("one or more sections failed to decrypt".to_string());
                recommendations.push("confirm the key or rotate to a new backup".to_string());
            }
            None => recommendations
                .push("supply the backup key to test decryption end to end".to_string()),
            Some(true) => {}
        }
        if completeness < COMPLETENESS_WARNING_THRESHOLD {
            issues.push(format!("payload completeness {completeness:.0}%"));
            recommendations.push("enroll missing data and refresh the backup".to_string());
        }
        if backup.is_expired(now) {
            issues.push(format!("backup expired at {}", backup.expires_at));
            recommendations.push("create a new backup; expired backups cannot recover".to_string());
        }

        let mut score = 0.0;
        if integrity_valid {
            score += 40.0;
        }
        if decryption_valid == Some(true) {
            score += 30.0;
        }
        score += completeness / 100.0 * 30.0;

        debug!(backup_id, integrity_valid, ?decryption_valid, score, "backup verified");

        Ok(BackupVerificationResult {
            backup_id: backup.backup_id.clone(),
            integrity_valid,
            decryption_valid,
            sections_present: backup.encrypted_payload.present(),
            completeness,
            recoverability_score: score.round().clamp(0.0, 100.0) as u8,
            issues,
            recommendations,
            verified_at: now,
        })
    }

    pub fn get_backup(&self, backup_id: &str) -> Result<IdentityBackup, VaultError> {
        self.backups
            .get(backup_id)
            .map(|b| b.clone())
            .ok_or_else(|| VaultError::BackupNotFound(backup_id.to_string()))
    }

    /// Highest version for `holder_did`, whatever its status.
    pub fn latest_backup(&self, holder_did: &str) -> Option<IdentityBackup> {
        let ids = self.by_holder.get(holder_did)?;
        let last = ids.last()?;
        self.backups.get(last).map(|b| b.clone())
    }

    /// Every retained version, oldest first.
    pub fn list_backups(&self, holder_did: &str) -> Vec<IdentityBackup> {
        let Some(ids) = self.by_holder.get(holder_did).map(|ids| ids.clone()) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.backups.get(id).map(|b| b.clone()))
            .collect()
    }

    /// Holder-initiated revocation. A backup under recovery must finish or
    /// be cancelled first.
    pub fn revoke_backup(
        &self,
        holder_did: &str,
        backup_id: &str,
    ) -> Result<IdentityBackup, VaultError> {
        let mut entry = self
            .backups
            .get_mut(backup_id)
            .ok_or_else(|| VaultError::BackupNotFound(backup_id.to_string()))?;
        if entry.holder_did != holder_did {
            return Err(VaultError::NotOwner {
                backup_id: backup_id.to_string(),
                holder: holder_did.to_string(),
            });
        }
        if entry.status == BackupStatus::Recovering {
            return Err(VaultError::BackupNotActive {
                backup_id: backup_id.to_string(),
                status: entry.status,
            });
        }
        entry.status = BackupStatus::Revoked;
        info!(backup_id, holder = %holder_did, "backup revoked");
        Ok(entry.clone())
    }

    /// Holder-initiated deletion. The only way a backup ever leaves the vault.
    pub fn delete_backup(
        &self,
        holder_did: &str,
        backup_id: &str,
    ) -> Result<IdentityBackup, VaultError> {
        let lock = self.holder_locks.handle(holder_did);
        let _guard = lock.lock();

        let removed = self
            .backups
            .remove_if(backup_id, |_, b| {
                b.holder_did == holder_did && b.status != BackupStatus::Recovering
            })
            .map(|(_, b)| b);

        let Some(backup) = removed else {
            let existing = self.get_backup(backup_id)?;
            if existing.holder_did != holder_did {
                return Err(VaultError::NotOwner {
                    backup_id: backup_id.to_string(),
                    holder: holder_did.to_string(),
                });
            }
            return Err(VaultError::BackupNotActive {
                backup_id: backup_id.to_string(),
                status: existing.status,
            });
        };

        if let Some(mut ids) = self.by_holder.get_mut(holder_did) {
            ids.retain(|id| id != backup_id);
        }
        warn!(backup_id, holder = %holder_did, status = %backup.status, "backup deleted");
        Ok(backup)
    }

    /// Check the integrity hash, then open and parse every section.
    ///
    /// Any failure aborts the whole restore. Half a restored identity is
    /// worse than none.
    pub fn decrypt_sections(
        &self,
        backup_id: &str,
        key: &[u8],
    ) -> Result<RestoredState, VaultError> {
        let backup = self.get_backup(backup_id)?;
        if self.integrity_hash(&backup)? != backup.integrity_hash {
            return Err(VaultError::IntegrityMismatch(backup_id.to_string()));
        }

        let mut restored = RestoredState::default();
        for section in &backup.encrypted_payload.sections {
            let plaintext = self.open_section(&backup, section, key)?;
            match section.section {
                PayloadSection::Identity => {
                    restored.identity = Some(parse_section(&backup, section, &plaintext)?)
                }
                PayloadSection::Credentials => {
                    restored.credentials = Some(parse_section(&backup, section, &plaintext)?)
                }
                PayloadSection::Biometrics => {
                    restored.biometrics = Some(parse_section(&backup, section, &plaintext)?)
                }
                PayloadSection::Consents => {
                    restored.consents = Some(parse_section(&backup, section, &plaintext)?)
                }
                PayloadSection::AccessPolicies => {
                    restored.access_policies = Some(parse_section(&backup, section, &plaintext)?)
                }
                PayloadSection::ProofMaterial => {
                    restored.proof_material = Some(parse_section(&backup, section, &plaintext)?)
                }
            }
        }
        Ok(restored)
    }

    // -----------------------------------------------------------------------
    // Status transitions driven by the recovery coordinator
    // -----------------------------------------------------------------------

    /// Compare-and-set `Active -> Recovering`.
    pub(crate) fn begin_recovery(
        &self,
        backup_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IdentityBackup, VaultError> {
        let mut entry = self
            .backups
            .get_mut(backup_id)
            .ok_or_else(|| VaultError::BackupNotFound(backup_id.to_string()))?;
        if entry.is_expired(now) {
            return Err(VaultError::BackupExpired(backup_id.to_string()));
        }
        if !entry.status.allows_recovery() {
            return Err(VaultError::BackupNotActive {
                backup_id: backup_id.to_string(),
                status: entry.status,
            });
        }
        entry.status = BackupStatus::Recovering;
        Ok(entry.clone())
    }

    /// `Recovering -> Active` after a request ends without executing.
    pub(crate) fn release(&self, backup_id: &str) {
        if let Some(mut entry) = self.backups.get_mut(backup_id) {
            if entry.status == BackupStatus::Recovering {
                entry.status = BackupStatus::Active;
            }
        }
    }

    /// `Recovering -> Active` with a new epoch after a successful recovery.
    pub(crate) fn complete_recovery(&self, backup_id: &str) -> Result<u32, VaultError> {
        let mut entry = self
            .backups
            .get_mut(backup_id)
            .ok_or_else(|| VaultError::BackupNotFound(backup_id.to_string()))?;
        entry.status = BackupStatus::Active;
        entry.recovery_epoch += 1;
        Ok(entry.recovery_epoch)
    }

    pub(crate) fn mark_corrupted(&self, backup_id: &str) {
        if let Some(mut entry) = self.backups.get_mut(backup_id) {
            entry.status = BackupStatus::Corrupted;
            warn!(backup_id, holder = %entry.holder_did, "backup marked corrupted");
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn validate_methods(&self, methods: &[RecoveryMethod]) -> Result<(), VaultError> {
        if !methods.iter().any(|m| m.enabled) {
            return Err(VaultError::InvalidRequest(
                "at least one enabled recovery method is required".into(),
            ));
        }
        for method in methods {
            method.validate().map_err(VaultError::InvalidRequest)?;
        }
        let mut ids: Vec<&str> = methods.iter().map(|m| m.method_id.as_str()).collect();
        ids.sort_unstable();
        if ids.windows(2).any(|w| w[0] == w[1]) {
            return Err(VaultError::InvalidRequest(
                "recovery method ids must be unique".into(),
            ));
        }
        Ok(())
    }

    /// Caller holds the holder's lock.
    fn next_version(&self, holder_did: &str) -> u64 {
        let mut issued = self
            .issued_versions
            .entry(holder_did.to_string())
            .or_insert(0);
        *issued += 1;
        *issued
    }

    fn integrity_hash(&self, backup: &IdentityBackup) -> Result<String, VaultError> {
        Ok(self
            .codec
            .digest_hex(DOMAIN_BACKUP_PAYLOAD, &IntegrityEnvelope::from(backup))?)
    }

    fn seal_state(&self, state: &HolderState, key: &[u8]) -> Result<EncryptedPayload, VaultError> {
        let mut sections = Vec::with_capacity(PayloadSection::ALL.len());
        let mut push = |section: PayloadSection, plaintext: Vec<u8>| -> Result<(), VaultError> {
            let ciphertext = self
                .codec
                .suite()
                .encrypt(key, &plaintext, section.as_str().as_bytes())?;
            sections.push(EncryptedSection {
                section,
                schema_version: BACKUP_SCHEMA_VERSION,
                ciphertext,
            });
            Ok(())
        };

        push(PayloadSection::Identity, to_plaintext(&state.identity)?)?;
        if !state.credentials.is_empty() {
            push(PayloadSection::Credentials, to_plaintext(&state.credentials)?)?;
        }
        if !state.biometrics.is_empty() {
            push(PayloadSection::Biometrics, to_plaintext(&state.biometrics)?)?;
        }
        if !state.consents.is_empty() {
            push(PayloadSection::Consents, to_plaintext(&state.consents)?)?;
        }
        if !state.access_policies.is_empty() {
            push(PayloadSection::AccessPolicies, to_plaintext(&state.access_policies)?)?;
        }
        if !state.proof_material.is_empty() {
            push(PayloadSection::ProofMaterial, to_plaintext(&state.proof_material)?)?;
        }
        Ok(EncryptedPayload { sections })
    }

    fn open_section(
        &self,
        backup: &IdentityBackup,
        section: &EncryptedSection,
        key: &[u8],
    ) -> Result<Vec<u8>, VaultError> {
        if section.schema_version != BACKUP_SCHEMA_VERSION {
            return Err(VaultError::SectionUnreadable {
                backup_id: backup.backup_id.clone(),
                section: section.section,
            });
        }
        Ok(self.codec.suite().decrypt(
            key,
            &section.ciphertext,
            section.section.as_str().as_bytes(),
        )?)
    }
}

fn to_plaintext<T: Serialize>(value: &T) -> Result<Vec<u8>, VaultError> {
    Ok(IntegrityCodec::canonical_bytes(value)?)
}

fn parse_section<T: DeserializeOwned>(
    backup: &IdentityBackup,
    section: &EncryptedSection,
    plaintext: &[u8],
) -> Result<T, VaultError> {
    serde_json::from_slice(plaintext).map_err(|_| VaultError::SectionUnreadable {
        backup_id: backup.backup_id.clone(),
        section: section.section,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::types::{MethodConfigKey, RecoveryMethodType};
    use crate::clock::ManualClock;
    use crate::identity::store::fixtures::{credential, identity};
    use crate::identity::store::{ConsentRecord, MemoryIdentityStore};
    use proptest::prelude::*;

    const HOLDER: &str = "did:example:alice";
    const KEY: &[u8] = b"backup key material";

    fn setup() -> (BackupVault, Arc<MemoryIdentityStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryIdentityStore::new());
        store.upsert_identity(identity(HOLDER, "aa"));
        store.add_credential(HOLDER, credential("cred-1", "KYCCredential", 10));
        store.add_consent(
            HOLDER,
            ConsentRecord {
                consent_id: "c1".into(),
                purpose: "analytics".into(),
                granted_to: "did:example:shop".into(),
                granted_at: Utc::now(),
                expires_at: None,
            },
        );
        let clock = Arc::new(ManualClock::starting_now());
        let vault = BackupVault::new(
            store.clone(),
            IntegrityCodec::standard(),
            clock.clone(),
            RecoveryConfig::default(),
        );
        (vault, store, clock)
    }

    fn methods() -> Vec<RecoveryMethod> {
        vec![RecoveryMethod::new(
            "mnemonic",
            RecoveryMethodType::MnemonicPhrase,
            "Paper seed",
            80,
        )
        .with_config(MethodConfigKey::Commitment, "00")]
    }

    fn create(vault: &BackupVault) -> IdentityBackup {
        vault
            .create_backup(HOLDER, methods(), KEY, 30, RecoveryPolicy::default())
            .unwrap()
    }

    #[test]
    fn create_backup_seals_present_sections() {
        let (vault, _, _) = setup();
        let backup = create(&vault);
        assert_eq!(backup.version, 1);
        assert_eq!(backup.status, BackupStatus::Active);
        assert_eq!(backup.encryption_method, "AES-256-GCM");
        assert!(backup.backup_id.starts_with("backup_"));
        assert_eq!(
            backup.encrypted_payload.present(),
            vec![
                PayloadSection::Identity,
                PayloadSection::Credentials,
                PayloadSection::Consents
            ]
        );
        assert_eq!(backup.integrity_hash.len(), 64);
    }

    #[test]
    fn versions_increase_per_holder() {
        let (vault, store, _) = setup();
        store.upsert_identity(identity("did:example:bob", "bb"));
        assert_eq!(create(&vault).version, 1);
        assert_eq!(create(&vault).version, 2);
        let bob = vault
            .create_backup("did:example:bob", methods(), KEY, 30, RecoveryPolicy::default())
            .unwrap();
        assert_eq!(bob.version, 1);
        assert_eq!(create(&vault).version, 3);
        assert_eq!(vault.list_backups(HOLDER).len(), 3);
        assert_eq!(vault.latest_backup(HOLDER).unwrap().version, 3);
    }

    #[test]
    fn concurrent_creates_get_distinct_versions() {
        let (vault, _, _) = setup();
        let vault = Arc::new(vault);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let vault = Arc::clone(&vault);
                std::thread::spawn(move || create(&vault).version)
            })
            .collect();
        let mut versions: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        versions.sort_unstable();
        assert_eq!(versions, (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn rejects_invalid_requests() {
        let (vault, _, _) = setup();
        let p = RecoveryPolicy::default();

        let err = vault.create_backup(HOLDER, vec![], KEY, 30, p).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let disabled = vec![methods().remove(0).disabled()];
        assert!(vault.create_backup(HOLDER, disabled, KEY, 30, p).is_err());

        let mut bad_conf = methods();
        bad_conf[0].required_confidence = 0;
        assert!(matches!(
            vault.create_backup(HOLDER, bad_conf, KEY, 30, p),
            Err(VaultError::InvalidRequest(_))
        ));

        assert!(vault.create_backup(HOLDER, methods(), b"", 30, p).is_err());
        assert!(vault.create_backup(HOLDER, methods(), KEY, 0, p).is_err());
        assert!(vault.create_backup("alice", methods(), KEY, 30, p).is_err());

        let mut dup = methods();
        dup.push(dup[0].clone());
        assert!(vault.create_backup(HOLDER, dup, KEY, 30, p).is_err());

        let bad_score = RecoveryPolicy {
            required_score: Some(0),
            ..p
        };
        assert!(vault.create_backup(HOLDER, methods(), KEY, 30, bad_score).is_err());
    }

    #[test]
    fn unknown_holder_is_not_found() {
        let (vault, _, _) = setup();
        let err = vault
            .create_backup("did:example:nobody", methods(), KEY, 30, RecoveryPolicy::default())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn verify_untouched_backup_with_key() {
        let (vault, _, _) = setup();
        let backup = create(&vault);
        let result = vault.verify_integrity(&backup.backup_id, Some(KEY)).unwrap();
        assert!(result.integrity_valid);
        assert_eq!(result.decryption_valid, Some(true));
        assert!(result.is_recoverable());
        // 40 + 30 + 3/6 * 30
        assert_eq!(result.recoverability_score, 85);
        assert!(result.issues.iter().any(|i| i.contains("completeness")));
    }

    #[test]
    fn verify_without_key_skips_decryption() {
        let (vault, _, _) = setup();
        let backup = create(&vault);
        let result = vault.verify_integrity(&backup.backup_id, None).unwrap();
        assert_eq!(result.decryption_valid, None);
        assert_eq!(result.recoverability_score, 55);
    }

    #[test]
    fn verify_with_wrong_key_reports_decryption_failure() {
        let (vault, _, _) = setup();
        let backup = create(&vault);
        let result = vault
            .verify_integrity(&backup.backup_id, Some(b"wrong"))
            .unwrap();
        assert!(result.integrity_valid);
        assert_eq!(result.decryption_valid, Some(false));
        assert!(!result.is_recoverable());
    }

    #[test]
    fn verify_flags_expired_backups_without_mutating() {
        let (vault, _, clock) = setup();
        let backup = create(&vault);
        clock.advance(chrono::Duration::days(31));
        let result = vault.verify_integrity(&backup.backup_id, None).unwrap();
        assert!(result.issues.iter().any(|i| i.contains("expired")));
        let stored = vault.get_backup(&backup.backup_id).unwrap();
        assert_eq!(stored.status, BackupStatus::Active);
        assert_eq!(stored.effective_status(clock.now()), BackupStatus::Expired);
    }

    #[test]
    fn decrypt_sections_restores_state() {
        let (vault, store, _) = setup();
        let backup = create(&vault);
        let restored = vault.decrypt_sections(&backup.backup_id, KEY).unwrap();
        let state = store.holder_state(HOLDER).unwrap().unwrap();
        assert_eq!(restored.identity, Some(state.identity));
        assert_eq!(restored.credentials, Some(state.credentials));
        assert_eq!(restored.biometrics, None);
    }

    #[test]
    fn decrypt_sections_refuses_tampered_payload() {
        let (vault, _, _) = setup();
        let backup = create(&vault);
        vault
            .backups
            .get_mut(&backup.backup_id)
            .unwrap()
            .encrypted_payload
            .sections[0]
            .ciphertext[20] ^= 0xff;
        let err = vault.decrypt_sections(&backup.backup_id, KEY).unwrap_err();
        assert!(matches!(err, VaultError::IntegrityMismatch(_)));
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn begin_recovery_is_exclusive() {
        let (vault, _, clock) = setup();
        let backup = create(&vault);
        vault.begin_recovery(&backup.backup_id, clock.now()).unwrap();
        let err = vault
            .begin_recovery(&backup.backup_id, clock.now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        vault.release(&backup.backup_id);
        assert!(vault.begin_recovery(&backup.backup_id, clock.now()).is_ok());
    }

    #[test]
    fn begin_recovery_rejects_expired() {
        let (vault, _, clock) = setup();
        let backup = create(&vault);
        clock.advance(chrono::Duration::days(31));
        let err = vault
            .begin_recovery(&backup.backup_id, clock.now())
            .unwrap_err();
        assert!(matches!(err, VaultError::BackupExpired(_)));
    }

    #[test]
    fn complete_recovery_bumps_epoch() {
        let (vault, _, clock) = setup();
        let backup = create(&vault);
        vault.begin_recovery(&backup.backup_id, clock.now()).unwrap();
        assert_eq!(vault.complete_recovery(&backup.backup_id).unwrap(), 1);
        assert_eq!(
            vault.get_backup(&backup.backup_id).unwrap().status,
            BackupStatus::Active
        );

        let err = vault.complete_recovery("backup_missing").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn revoke_and_delete_are_holder_only() {
        let (vault, _, _) = setup();
        let backup = create(&vault);
        let err = vault
            .revoke_backup("did:example:mallory", &backup.backup_id)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let revoked = vault.revoke_backup(HOLDER, &backup.backup_id).unwrap();
        assert_eq!(revoked.status, BackupStatus::Revoked);

        assert!(vault
            .delete_backup("did:example:mallory", &backup.backup_id)
            .is_err());
        vault.delete_backup(HOLDER, &backup.backup_id).unwrap();
        assert!(vault.get_backup(&backup.backup_id).is_err());
        assert!(vault.list_backups(HOLDER).is_empty());
    }

    #[test]
    fn deleted_versions_are_never_reissued() {
        let (vault, _, _) = setup();
        assert_eq!(create(&vault).version, 1);
        let second = create(&vault);
        assert_eq!(second.version, 2);
        vault.delete_backup(HOLDER, &second.backup_id).unwrap();

        let third = create(&vault);
        assert_eq!(third.version, 3);
        assert_eq!(vault.latest_backup(HOLDER).unwrap().backup_id, third.backup_id);
    }

    #[test]
    fn cannot_delete_while_recovering() {
        let (vault, _, clock) = setup();
        let backup = create(&vault);
        vault.begin_recovery(&backup.backup_id, clock.now()).unwrap();
        let err = vault.delete_backup(HOLDER, &backup.backup_id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn corrupted_backups_are_kept() {
        let (vault, _, _) = setup();
        let backup = create(&vault);
        vault.mark_corrupted(&backup.backup_id);
        assert_eq!(
            vault.get_backup(&backup.backup_id).unwrap().status,
            BackupStatus::Corrupted
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn any_single_byte_mutation_breaks_integrity(
            section_pick in 0usize..3,
            offset_pick in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let (vault, _, _) = setup();
            let backup = create(&vault);
            {
                let mut entry = vault.backups.get_mut(&backup.backup_id).unwrap();
                let section = &mut entry.encrypted_payload.sections[section_pick];
                let offset = offset_pick.index(section.ciphertext.len());
                section.ciphertext[offset] ^= flip;
            }
            let result = vault.verify_integrity(&backup.backup_id, Some(KEY)).unwrap();
            prop_assert!(!result.integrity_valid);
            prop_assert_eq!(result.decryption_valid, Some(false));
            prop_assert!(result.recoverability_score < 40);
        }
    }
}
