//! # Protocol Configuration & Constants
//!
//! Every magic number in Custodia lives here. If you're hardcoding a constant
//! somewhere else, you're doing it wrong and you owe the team coffee.
//!
//! The first half of the file is compile-time constants (key lengths, hash
//! domains, size budgets). The second half is runtime policy: the knobs an
//! operator may reasonably want to turn, grouped into serde-friendly structs
//! with sane `Default`s so a missing TOML table never means a missing policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate-level protocol version, stamped into bundles and message envelopes.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Schema version for encrypted backup sections. Bump when the plaintext
/// layout of any [`PayloadSection`](crate::backup::PayloadSection) changes.
pub const BACKUP_SCHEMA_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Signature scheme for every key in the system.
pub const SIGNING_ALGORITHM: &str = "Ed25519";

/// Ed25519 secret key length in bytes.
pub const SIGNING_KEY_LENGTH: usize = 32;

/// Ed25519 public key length in bytes.
pub const VERIFYING_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Label recorded as `encryptionMethod` on every backup sealed by the
/// standard suite.
pub const SYMMETRIC_ALGORITHM: &str = "AES-256-GCM";

/// AES-256-GCM key length in bytes.
pub const AES_KEY_LENGTH: usize = 32;

/// AES-256-GCM nonce length in bytes. Twelve. Not sixteen.
pub const AES_NONCE_LENGTH: usize = 12;

/// AES-256-GCM authentication tag length in bytes.
pub const AES_TAG_LENGTH: usize = 16;

/// Hash output length in bytes. BLAKE3 and SHA-256 both give 32.
pub const HASH_OUTPUT_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// Hash Domains
// ---------------------------------------------------------------------------
//
// BLAKE3 `derive_key` contexts. Each one must be globally unique and never
// change once data hashed under it exists in the wild.

pub const DOMAIN_BACKUP_PAYLOAD: &str = "custodia 2026-01-01 backup payload v1";
pub const DOMAIN_BACKUP_KEY: &str = "custodia 2026-01-01 backup key stretch v1";
pub const DOMAIN_BUNDLE: &str = "custodia 2026-01-01 offline bundle v1";
pub const DOMAIN_IDENTITY_PROOF: &str = "custodia 2026-01-01 identity proof v1";
pub const DOMAIN_KYC_PROOF: &str = "custodia 2026-01-01 kyc proof v1";
pub const DOMAIN_BIOMETRIC_PROOF: &str = "custodia 2026-01-01 biometric proof v1";
pub const DOMAIN_CREDENTIAL: &str = "custodia 2026-01-01 credential attestation v1";
pub const DOMAIN_CHALLENGE: &str = "custodia 2026-01-01 offline challenge v1";
pub const DOMAIN_REVOCATION_LEAF: &str = "custodia 2026-01-01 revocation leaf v1";
pub const DOMAIN_REVOCATION_LIST: &str = "custodia 2026-01-01 revocation list v1";
pub const DOMAIN_GUARDIAN_VOTE: &str = "custodia 2026-01-01 guardian vote v1";
pub const DOMAIN_RECOVERY_PROOF: &str = "custodia 2026-01-01 recovery proof v1";
pub const DOMAIN_MESSAGE: &str = "custodia 2026-01-01 signed message v1";

// ---------------------------------------------------------------------------
// Recovery Defaults
// ---------------------------------------------------------------------------

/// How long a recovery request stays open before it lapses.
pub const DEFAULT_REQUEST_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Proof submissions allowed per request, failures included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Upper bound on backup retention. Ten years of holding ciphertext is
/// already optimistic about AES.
pub const MAX_RETENTION_DAYS: u32 = 3650;

/// Confidence bounds shared by recovery methods and request scores.
pub const MIN_CONFIDENCE: u8 = 1;
pub const MAX_CONFIDENCE: u8 = 100;

/// Below this completeness percentage a backup verification recommends
/// taking a fresh backup.
pub const COMPLETENESS_WARNING_THRESHOLD: f64 = 90.0;

// ---------------------------------------------------------------------------
// Offline Verification Defaults
// ---------------------------------------------------------------------------

/// Bundles older than this have fully decayed freshness.
pub const DEFAULT_MAX_OFFLINE_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Confidence scores are on a 0–100 scale throughout.
pub const DEFAULT_REQUIRED_CONFIDENCE: f64 = 85.0;
pub const DEFAULT_BIOMETRIC_THRESHOLD: f64 = 95.0;
pub const DEFAULT_EMERGENCY_THRESHOLD: f64 = 70.0;

/// Partial mode tolerates this much less than the full requirement.
pub const PARTIAL_MODE_MARGIN: f64 = 15.0;

/// Minimal mode demands this much more than the emergency floor.
pub const MINIMAL_MODE_MARGIN: f64 = 15.0;

/// One year. Bundles that live longer are a liability, not a convenience.
pub const MAX_BUNDLE_EXPIRATION_HOURS: u32 = 8760;

/// Verification levels run from 1 (basic identity) to 5 (institutional).
pub const MIN_VERIFICATION_LEVEL: u8 = 1;
pub const MAX_VERIFICATION_LEVEL: u8 = 5;

/// KYC proofs are only minted for identities at or above this KYC level.
pub const KYC_PROOF_MIN_LEVEL: u8 = 2;

// ---------------------------------------------------------------------------
// Bundle Size Budgets
// ---------------------------------------------------------------------------

/// A version-40 QR code tops out just under 3KB of binary; 4KB of base64
/// text is the practical ceiling for dense codes.
pub const QR_CODE_BUDGET: usize = 4 * 1024;

/// NTAG-class NFC tags with room to spare.
pub const NFC_BUDGET: usize = 8 * 1024;

/// Self-contained and compressed bundles.
pub const FILE_BUNDLE_BUDGET: usize = 10 * 1024 * 1024;

/// Printable bundles are paper. Paper is large but not infinite.
pub const PRINTABLE_BUDGET: usize = 10 * 1024 * 1024;

/// Revoked IDs cached per bundle when the full list is larger.
pub const DEFAULT_MAX_CACHED_REVOCATIONS: usize = 1024;

// ---------------------------------------------------------------------------
// Runtime Policy
// ---------------------------------------------------------------------------

/// Errors raised by [`CustodiaConfig::validate`] and friends.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

/// Converts whole seconds to a chrono duration, saturating instead of
/// panicking on absurd inputs.
fn chrono_secs(secs: u64) -> chrono::Duration {
    const MAX_SECS: u64 = (i64::MAX / 1_000) as u64;
    chrono::Duration::seconds(secs.min(MAX_SECS) as i64)
}

/// Recovery request policy applied at `Initiate` time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub request_ttl_secs: u64,
    pub max_attempts: u32,
    pub max_retention_days: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            request_ttl_secs: DEFAULT_REQUEST_TTL.as_secs(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_retention_days: MAX_RETENTION_DAYS,
        }
    }
}

impl RecoveryConfig {
    pub fn request_ttl(&self) -> chrono::Duration {
        chrono_secs(self.request_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_ttl_secs == 0 {
            return Err(invalid("request_ttl_secs", "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be positive"));
        }
        if self.max_retention_days == 0 || self.max_retention_days > MAX_RETENTION_DAYS {
            return Err(invalid(
                "max_retention_days",
                format!("must be in 1..={MAX_RETENTION_DAYS}"),
            ));
        }
        Ok(())
    }
}

/// Thresholds for the offline verifier. All confidences are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineVerificationConfig {
    pub max_offline_duration_secs: u64,
    pub required_confidence: f64,
    pub biometric_threshold: f64,
    pub emergency_threshold: f64,
    pub emergency_mode_enabled: bool,
}

impl Default for OfflineVerificationConfig {
    fn default() -> Self {
        Self {
            max_offline_duration_secs: DEFAULT_MAX_OFFLINE_DURATION.as_secs(),
            required_confidence: DEFAULT_REQUIRED_CONFIDENCE,
            biometric_threshold: DEFAULT_BIOMETRIC_THRESHOLD,
            emergency_threshold: DEFAULT_EMERGENCY_THRESHOLD,
            emergency_mode_enabled: true,
        }
    }
}

impl OfflineVerificationConfig {
    pub fn max_offline_duration(&self) -> chrono::Duration {
        chrono_secs(self.max_offline_duration_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_offline_duration_secs == 0 {
            return Err(invalid("max_offline_duration_secs", "must be positive"));
        }
        for (field, value) in [
            ("required_confidence", self.required_confidence),
            ("biometric_threshold", self.biometric_threshold),
            ("emergency_threshold", self.emergency_threshold),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(invalid(field, "must be within 0..=100"));
            }
        }
        Ok(())
    }
}

/// Knobs for the bundle builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    pub max_cached_revocations: usize,
    /// Drop low-priority payload to fit a format's size budget instead of
    /// failing outright.
    pub fit_to_budget: bool,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            max_cached_revocations: DEFAULT_MAX_CACHED_REVOCATIONS,
            fit_to_budget: true,
        }
    }
}

/// Everything an operator can tune, in one deserializable tree.
///
/// ```toml
/// [recovery]
/// max_attempts = 3
///
/// [offline]
/// required_confidence = 90.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodiaConfig {
    pub recovery: RecoveryConfig,
    pub offline: OfflineVerificationConfig,
    pub bundle: BundleConfig,
}

impl CustodiaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.recovery.validate()?;
        self.offline.validate()
    }
}
