//! Backup data model: recovery methods, policies, sealed payloads, and the
//! backup record itself.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{MAX_CONFIDENCE, MIN_CONFIDENCE};

// ---------------------------------------------------------------------------
// Recovery methods
// ---------------------------------------------------------------------------

/// How a holder proves they are who they say they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecoveryMethodType {
    MnemonicPhrase,
    SocialRecovery,
    GuardianMultisig,
    BiometricBackup,
    HardwareKey,
    BackupCodes,
    EmailVerification,
    #[serde(rename = "SMSVerification")]
    SmsVerification,
    IdentityProvider,
    InstitutionalRecovery,
    #[serde(rename = "ZKProof")]
    ZkProof,
}

impl RecoveryMethodType {
    /// Methods satisfied by guardian quorum rather than a submitted proof.
    pub fn is_guardian_based(&self) -> bool {
        matches!(
            self,
            RecoveryMethodType::SocialRecovery | RecoveryMethodType::GuardianMultisig
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryMethodType::MnemonicPhrase => "MnemonicPhrase",
            RecoveryMethodType::SocialRecovery => "SocialRecovery",
            RecoveryMethodType::GuardianMultisig => "GuardianMultisig",
            RecoveryMethodType::BiometricBackup => "BiometricBackup",
            RecoveryMethodType::HardwareKey => "HardwareKey",
            RecoveryMethodType::BackupCodes => "BackupCodes",
            RecoveryMethodType::EmailVerification => "EmailVerification",
            RecoveryMethodType::SmsVerification => "SMSVerification",
            RecoveryMethodType::IdentityProvider => "IdentityProvider",
            RecoveryMethodType::InstitutionalRecovery => "InstitutionalRecovery",
            RecoveryMethodType::ZkProof => "ZKProof",
        }
    }
}

impl fmt::Display for RecoveryMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keys allowed in a recovery method's configuration map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MethodConfigKey {
    /// Hex BLAKE3 commitment to a secret (mnemonic, backup code).
    Commitment,
    /// Hex Ed25519 key of a hardware token.
    PublicKey,
    /// External identity provider name.
    Provider,
    /// Email address or phone number.
    Contact,
    /// Institution identifier.
    Institution,
    /// ZK circuit identifier.
    Circuit,
}

/// One way of proving control during recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryMethod {
    pub method_id: String,
    pub method_type: RecoveryMethodType,
    pub name: String,
    /// Minimum confidence a single proof must reach to count as verified.
    pub required_confidence: u8,
    pub enabled: bool,
    pub configuration: BTreeMap<MethodConfigKey, String>,
    pub created_at: DateTime<Utc>,
}

impl RecoveryMethod {
    pub fn new(
        method_id: impl Into<String>,
        method_type: RecoveryMethodType,
        name: impl Into<String>,
        required_confidence: u8,
    ) -> Self {
        Self {
            method_id: method_id.into(),
            method_type,
            name: name.into(),
            required_confidence,
            enabled: true,
            configuration: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_config(mut self, key: MethodConfigKey, value: impl Into<String>) -> Self {
        self.configuration.insert(key, value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn config(&self, key: MethodConfigKey) -> Option<&str> {
        self.configuration.get(&key).map(String::as_str)
    }

    /// Field-level checks. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        if self.method_id.trim().is_empty() {
            return Err("recovery method id must not be empty".into());
        }
        if self.name.trim().is_empty() {
            return Err(format!("recovery method {} has an empty name", self.method_id));
        }
        if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&self.required_confidence) {
            return Err(format!(
                "recovery method {} requires confidence {} outside {MIN_CONFIDENCE}..={MAX_CONFIDENCE}",
                self.method_id, self.required_confidence
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Recovery policy
// ---------------------------------------------------------------------------

/// How evidence from several methods adds up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CombinationPolicy {
    /// Any single method suffices; the score is the best method's score.
    #[default]
    Maximum,
    /// Scores of distinct methods add up, capped at 100.
    Additive,
    /// Every enabled method must be satisfied; the score is the weakest.
    RequireAll,
}

impl fmt::Display for CombinationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CombinationPolicy::Maximum => "maximum",
            CombinationPolicy::Additive => "additive",
            CombinationPolicy::RequireAll => "require_all",
        })
    }
}

/// Holder-chosen recovery rules, snapshotted into each request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPolicy {
    pub combination: CombinationPolicy,
    /// Explicit score to reach. `None` means the strictest enabled method's
    /// `required_confidence`.
    pub required_score: Option<u8>,
}

impl RecoveryPolicy {
    pub fn additive(required_score: u8) -> Self {
        Self {
            combination: CombinationPolicy::Additive,
            required_score: Some(required_score),
        }
    }
}

// ---------------------------------------------------------------------------
// Sealed payload
// ---------------------------------------------------------------------------

/// The independently sealed parts of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PayloadSection {
    Identity,
    Credentials,
    Biometrics,
    Consents,
    AccessPolicies,
    ProofMaterial,
}

impl PayloadSection {
    pub const ALL: [PayloadSection; 6] = [
        PayloadSection::Identity,
        PayloadSection::Credentials,
        PayloadSection::Biometrics,
        PayloadSection::Consents,
        PayloadSection::AccessPolicies,
        PayloadSection::ProofMaterial,
    ];

    /// Also used as AEAD associated data, so it must never change.
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadSection::Identity => "identity",
            PayloadSection::Credentials => "credentials",
            PayloadSection::Biometrics => "biometrics",
            PayloadSection::Consents => "consents",
            PayloadSection::AccessPolicies => "access_policies",
            PayloadSection::ProofMaterial => "proof_material",
        }
    }
}

impl fmt::Display for PayloadSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sealed section with its schema tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedSection {
    pub section: PayloadSection,
    pub schema_version: u16,
    /// `nonce || ciphertext || tag`.
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
}

/// All sealed sections, in [`PayloadSection::ALL`] order. Empty sections are
/// omitted rather than sealed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub sections: Vec<EncryptedSection>,
}

impl EncryptedPayload {
    pub fn section(&self, section: PayloadSection) -> Option<&EncryptedSection> {
        self.sections.iter().find(|s| s.section == section)
    }

    pub fn present(&self) -> Vec<PayloadSection> {
        self.sections.iter().map(|s| s.section).collect()
    }

    /// Percentage of [`PayloadSection::ALL`] present.
    pub fn completeness(&self) -> f64 {
        let present = PayloadSection::ALL
            .iter()
            .filter(|s| self.section(**s).is_some())
            .count();
        present as f64 * 100.0 / PayloadSection::ALL.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Backup record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupStatus {
    Active,
    Expired,
    Revoked,
    Corrupted,
    /// Referenced by an in-flight recovery request.
    Recovering,
}

impl BackupStatus {
    pub fn allows_recovery(&self) -> bool {
        matches!(self, BackupStatus::Active)
    }

    /// No path back to `Active` without a new backup.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BackupStatus::Expired | BackupStatus::Revoked | BackupStatus::Corrupted
        )
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackupStatus::Active => "active",
            BackupStatus::Expired => "expired",
            BackupStatus::Revoked => "revoked",
            BackupStatus::Corrupted => "corrupted",
            BackupStatus::Recovering => "recovering",
        })
    }
}

/// An encrypted snapshot of one holder's private state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityBackup {
    pub backup_id: String,
    pub holder_did: String,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub retention_days: u32,
    pub encryption_method: String,
    pub encrypted_payload: EncryptedPayload,
    pub recovery_methods: Vec<RecoveryMethod>,
    pub recovery_policy: RecoveryPolicy,
    /// Hex digest over the sealed payload and the fields that identify it.
    pub integrity_hash: String,
    pub status: BackupStatus,
    /// Completed recoveries against this backup.
    pub recovery_epoch: u32,
}

impl IdentityBackup {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Stored status with lazy expiry applied.
    pub fn effective_status(&self, now: DateTime<Utc>) -> BackupStatus {
        if self.status == BackupStatus::Active && self.is_expired(now) {
            BackupStatus::Expired
        } else {
            self.status
        }
    }

    pub fn method(&self, method_id: &str) -> Option<&RecoveryMethod> {
        self.recovery_methods
            .iter()
            .find(|m| m.method_id == method_id)
    }

    pub fn enabled_methods(&self) -> impl Iterator<Item = &RecoveryMethod> {
        self.recovery_methods.iter().filter(|m| m.enabled)
    }

    pub fn has_guardian_method(&self) -> bool {
        self.enabled_methods()
            .any(|m| m.method_type.is_guardian_based())
    }

    /// Score a recovery must reach: the policy override, or the strictest
    /// enabled method.
    pub fn required_score(&self) -> u8 {
        self.recovery_policy.required_score.unwrap_or_else(|| {
            self.enabled_methods()
                .map(|m| m.required_confidence)
                .max()
                .unwrap_or(MAX_CONFIDENCE)
        })
    }
}

/// Outcome of [`BackupVault::verify_integrity`](super::BackupVault::verify_integrity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupVerificationResult {
    pub backup_id: String,
    pub integrity_valid: bool,
    /// `None` when no key was supplied.
    pub decryption_valid: Option<bool>,
    pub sections_present: Vec<PayloadSection>,
    /// Percentage of expected sections present.
    pub completeness: f64,
    /// 0–100: 40 for the hash, 30 for decryption, 30 scaled by completeness.
    pub recoverability_score: u8,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub verified_at: DateTime<Utc>,
}

impl BackupVerificationResult {
    pub fn is_recoverable(&self) -> bool {
        self.integrity_valid && self.decryption_valid != Some(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn method(id: &str, ty: RecoveryMethodType, conf: u8) -> RecoveryMethod {
        RecoveryMethod::new(id, ty, format!("{ty} method"), conf)
    }

    #[test]
    fn method_validation() {
        assert!(method("m", RecoveryMethodType::MnemonicPhrase, 50).validate().is_ok());
        assert!(method("", RecoveryMethodType::MnemonicPhrase, 50).validate().is_err());
        assert!(method("m", RecoveryMethodType::MnemonicPhrase, 0).validate().is_err());
        assert!(method("m", RecoveryMethodType::MnemonicPhrase, 101).validate().is_err());
        let mut unnamed = method("m", RecoveryMethodType::HardwareKey, 50);
        unnamed.name = "  ".into();
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn guardian_types() {
        assert!(RecoveryMethodType::SocialRecovery.is_guardian_based());
        assert!(RecoveryMethodType::GuardianMultisig.is_guardian_based());
        assert!(!RecoveryMethodType::HardwareKey.is_guardian_based());
    }

    #[test]
    fn wire_names_match_display() {
        for ty in [
            RecoveryMethodType::SmsVerification,
            RecoveryMethodType::ZkProof,
            RecoveryMethodType::MnemonicPhrase,
        ] {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{ty}\""));
        }
    }

    #[test]
    fn completeness_counts_sections() {
        let payload = EncryptedPayload {
            sections: vec![
                EncryptedSection {
                    section: PayloadSection::Identity,
                    schema_version: 1,
                    ciphertext: vec![1],
                },
                EncryptedSection {
                    section: PayloadSection::Credentials,
                    schema_version: 1,
                    ciphertext: vec![2],
                },
                EncryptedSection {
                    section: PayloadSection::Consents,
                    schema_version: 1,
                    ciphertext: vec![3],
                },
            ],
        };
        assert!((payload.completeness() - 50.0).abs() < f64::EPSILON);
        assert!(payload.section(PayloadSection::Biometrics).is_none());
    }

    #[test]
    fn status_helpers() {
        assert!(BackupStatus::Active.allows_recovery());
        assert!(!BackupStatus::Recovering.allows_recovery());
        assert!(BackupStatus::Corrupted.is_terminal());
        assert!(!BackupStatus::Recovering.is_terminal());
    }
}
