//! Offline bundle data model.
//!
//! Everything here must survive JSON and bincode alike, so there are no
//! skipped fields, no flattening, and no internally tagged enums.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{
    DOMAIN_BUNDLE, DOMAIN_REVOCATION_LEAF, FILE_BUNDLE_BUDGET, NFC_BUDGET, PRINTABLE_BUDGET,
    QR_CODE_BUDGET,
};
use crate::crypto::codec::{CodecError, IntegrityCodec};
use crate::crypto::hash::MerkleProof;
use crate::identity::store::{BiometricModality, BiometricTemplate, ClaimValue, EmergencyContact};

// ---------------------------------------------------------------------------
// Formats and modes
// ---------------------------------------------------------------------------

/// Transport encoding of a bundle. Only the bytes and the size budget
/// differ; verification is identical for every format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BundleFormat {
    SelfContained,
    Compressed,
    #[serde(rename = "QRCode")]
    QrCode,
    #[serde(rename = "NFC")]
    Nfc,
    Printable,
}

impl BundleFormat {
    pub const ALL: [BundleFormat; 5] = [
        BundleFormat::SelfContained,
        BundleFormat::Compressed,
        BundleFormat::QrCode,
        BundleFormat::Nfc,
        BundleFormat::Printable,
    ];

    /// Maximum encoded size in bytes.
    pub fn budget(&self) -> usize {
        match self {
            BundleFormat::QrCode => QR_CODE_BUDGET,
            BundleFormat::Nfc => NFC_BUDGET,
            BundleFormat::SelfContained | BundleFormat::Compressed => FILE_BUNDLE_BUDGET,
            BundleFormat::Printable => PRINTABLE_BUDGET,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BundleFormat::SelfContained => "self-contained",
            BundleFormat::Compressed => "compressed",
            BundleFormat::QrCode => "qr",
            BundleFormat::Nfc => "nfc",
            BundleFormat::Printable => "printable",
        }
    }
}

impl fmt::Display for BundleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BundleFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BundleFormat::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown bundle format '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VerificationMode {
    Full,
    Partial,
    Minimal,
    Emergency,
}

impl VerificationMode {
    /// Full and Partial check every part of the bundle.
    pub fn is_strict(&self) -> bool {
        matches!(self, VerificationMode::Full | VerificationMode::Partial)
    }

    /// Revocation hits are downgraded to warnings only in Emergency.
    pub fn tolerates_revocation(&self) -> bool {
        matches!(self, VerificationMode::Emergency)
    }

    /// Whether KYC and credentials take part in the score at all.
    pub fn checks_credentials(&self) -> bool {
        self.is_strict()
    }
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VerificationMode::Full => "full",
            VerificationMode::Partial => "partial",
            VerificationMode::Minimal => "minimal",
            VerificationMode::Emergency => "emergency",
        })
    }
}

impl std::str::FromStr for VerificationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(VerificationMode::Full),
            "partial" => Ok(VerificationMode::Partial),
            "minimal" => Ok(VerificationMode::Minimal),
            "emergency" => Ok(VerificationMode::Emergency),
            other => Err(format!("unknown verification mode '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Proofs and payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofType {
    Ed25519Signature2020,
    #[serde(rename = "KYCProof2020")]
    KycProof2020,
    BiometricProof2020,
}

/// A detached issuer attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CryptographicProof {
    pub proof_type: ProofType,
    /// Hex signature over the attested claim's digest.
    pub proof_value: String,
    pub proof_purpose: String,
    pub created: DateTime<Utc>,
    /// Key reference of the signer, e.g. `did:custodia:z...#key-1`.
    pub verification_method: String,
    pub nonce: String,
}

/// A credential as carried in a bundle, re-attested by the bundle issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineCredential {
    pub id: String,
    pub types: Vec<String>,
    pub issuer: String,
    pub issuance_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub subject: BTreeMap<String, ClaimValue>,
    pub proof: CryptographicProof,
    pub offline_usable: bool,
    pub priority: u8,
}

impl OfflineCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.is_some_and(|exp| now > exp)
    }

    pub fn has_type(&self, ty: &str) -> bool {
        self.types.iter().any(|t| t == ty)
    }
}

/// Revocation state as of the last online sync.
///
/// Non-membership cannot be proven offline. The lists are checked by direct
/// membership; `merkle_proofs` let a verifier confirm that a specific entry
/// concerning this bundle is in the list committed to by `merkle_root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationData {
    pub revocation_list_hash: String,
    pub last_updated: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub revoked_credential_ids: Vec<String>,
    pub revoked_identity_ids: Vec<String>,
    pub merkle_root: String,
    /// Inclusion proofs keyed by revoked ID.
    pub merkle_proofs: BTreeMap<String, MerkleProof>,
}

impl RevocationData {
    /// Merkle leaf for a revoked ID.
    pub fn leaf(codec: &IntegrityCodec, id: &str) -> [u8; 32] {
        codec.digest_bytes(DOMAIN_REVOCATION_LEAF, id.as_bytes())
    }

    pub fn is_identity_revoked(&self, did: &str) -> bool {
        self.revoked_identity_ids.iter().any(|r| r == did)
    }

    pub fn is_credential_revoked(&self, credential_id: &str) -> bool {
        self.revoked_credential_ids.iter().any(|r| r == credential_id)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.valid_until < now
    }
}

/// Everything an offline verifier needs, signed by the issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineVerificationData {
    pub did: String,
    pub identity_hash: String,
    /// Hex Ed25519 key of the holder, for challenge responses.
    pub public_key: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer_did: String,
    pub verification_level: u8,
    pub kyc_level: u8,
    pub identity_proof: CryptographicProof,
    pub kyc_proof: Option<CryptographicProof>,
    pub biometric_proof: Option<CryptographicProof>,
    /// Highest priority first.
    pub credentials: Vec<OfflineCredential>,
    pub revocation_data: RevocationData,
    pub biometric_templates: BTreeMap<BiometricModality, BiometricTemplate>,
    pub emergency_contacts: Vec<EmergencyContact>,
    pub format: BundleFormat,
    /// Hex digest of this structure with `data_hash` and `signature` blank.
    pub data_hash: String,
    /// Issuer's hex signature over `data_hash`.
    pub signature: String,
}

impl OfflineVerificationData {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Copy with the sealing fields blanked, i.e. what `data_hash` covers.
    pub fn unsealed(&self) -> Self {
        Self {
            data_hash: String::new(),
            signature: String::new(),
            ..self.clone()
        }
    }

    /// The digest `data_hash` records and `signature` signs.
    pub fn digest(&self, codec: &IntegrityCodec) -> Result<[u8; 32], CodecError> {
        codec.digest(DOMAIN_BUNDLE, &self.unsealed())
    }

    /// Credential IDs carried by this bundle.
    pub fn credential_ids(&self) -> impl Iterator<Item = &str> {
        self.credentials.iter().map(|c| c.id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Attested claims
// ---------------------------------------------------------------------------

/// What the identity proof attests.
#[derive(Debug, Serialize)]
pub struct IdentityClaim<'a> {
    pub did: &'a str,
    pub identity_hash: &'a str,
    pub public_key: &'a str,
    pub verification_level: u8,
    pub nonce: &'a str,
    pub created: DateTime<Utc>,
}

impl<'a> IdentityClaim<'a> {
    pub fn of(bundle: &'a OfflineVerificationData, proof: &'a CryptographicProof) -> Self {
        Self {
            did: &bundle.did,
            identity_hash: &bundle.identity_hash,
            public_key: &bundle.public_key,
            verification_level: bundle.verification_level,
            nonce: &proof.nonce,
            created: proof.created,
        }
    }
}

/// What the KYC proof attests.
#[derive(Debug, Serialize)]
pub struct KycClaim<'a> {
    pub did: &'a str,
    pub kyc_level: u8,
    pub nonce: &'a str,
    pub created: DateTime<Utc>,
}

impl<'a> KycClaim<'a> {
    pub fn of(bundle: &'a OfflineVerificationData, proof: &'a CryptographicProof) -> Self {
        Self {
            did: &bundle.did,
            kyc_level: bundle.kyc_level,
            nonce: &proof.nonce,
            created: proof.created,
        }
    }
}

/// What the biometric proof attests: the enrolled template hashes.
#[derive(Debug, Serialize)]
pub struct BiometricClaim<'a> {
    pub did: &'a str,
    pub template_hashes: BTreeMap<BiometricModality, &'a str>,
    pub nonce: &'a str,
    pub created: DateTime<Utc>,
}

impl<'a> BiometricClaim<'a> {
    pub fn of(bundle: &'a OfflineVerificationData, proof: &'a CryptographicProof) -> Self {
        Self {
            did: &bundle.did,
            template_hashes: bundle
                .biometric_templates
                .iter()
                .map(|(m, t)| (*m, t.template_hash.as_str()))
                .collect(),
            nonce: &proof.nonce,
            created: proof.created,
        }
    }
}

/// What a credential re-attestation covers: every field but the proof
/// value itself.
#[derive(Debug, Serialize)]
pub struct CredentialClaim<'a> {
    pub holder: &'a str,
    pub id: &'a str,
    pub types: &'a [String],
    pub issuer: &'a str,
    pub issuance_date: DateTime<Utc>,
    pub expiration_date: Option<DateTime<Utc>>,
    pub subject: &'a BTreeMap<String, ClaimValue>,
    pub priority: u8,
    pub nonce: &'a str,
    pub created: DateTime<Utc>,
}

impl<'a> CredentialClaim<'a> {
    pub fn of(holder: &'a str, credential: &'a OfflineCredential) -> Self {
        Self {
            holder,
            id: &credential.id,
            types: &credential.types,
            issuer: &credential.issuer,
            issuance_date: credential.issuance_date,
            expiration_date: credential.expiration_date,
            subject: &credential.subject,
            priority: credential.priority,
            nonce: &credential.proof.nonce,
            created: credential.proof.created,
        }
    }
}

/// What the holder signs to answer a challenge.
#[derive(Debug, Serialize)]
pub struct ChallengeClaim<'a> {
    pub did: &'a str,
    pub challenge: &'a str,
    pub nonce: &'a str,
}

// ---------------------------------------------------------------------------
// Verification request / result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineVerificationRequest {
    pub did: String,
    pub challenge: String,
    /// Holder's hex signature over [`ChallengeClaim`].
    pub challenge_response: Option<String>,
    pub required_level: u8,
    pub required_types: Vec<String>,
    pub biometric_samples: BTreeMap<BiometricModality, Vec<u8>>,
    pub mode: VerificationMode,
    pub timestamp: DateTime<Utc>,
    pub nonce: String,
}

impl OfflineVerificationRequest {
    pub fn new(did: impl Into<String>, mode: VerificationMode) -> Self {
        Self {
            did: did.into(),
            challenge: String::new(),
            challenge_response: None,
            required_level: 1,
            required_types: Vec::new(),
            biometric_samples: BTreeMap::new(),
            mode,
            timestamp: Utc::now(),
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn challenge_claim(&self) -> ChallengeClaim<'_> {
        ChallengeClaim {
            did: &self.did,
            challenge: &self.challenge,
            nonce: &self.nonce,
        }
    }
}

/// Pure verifier output. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineVerificationResult {
    pub success: bool,
    pub did: String,
    pub verification_level: u8,
    pub verified_types: Vec<String>,
    pub identity_verified: bool,
    pub kyc_verified: bool,
    pub biometric_verified: bool,
    pub credentials_valid: bool,
    pub not_revoked: bool,
    pub identity_confidence: f64,
    pub biometric_confidence: f64,
    pub overall_confidence: f64,
    pub mode: VerificationMode,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub verified_at: DateTime<Utc>,
    /// Seconds since the bundle was issued.
    pub cache_age: i64,
}
