//! Request and response types for every operation exposed to accounts.
//!
//! Binary fields (encryption keys, proof data) travel as standard base64 so
//! messages stay printable JSON. Everything a message can get wrong without
//! looking at state is caught by [`Msg::validate_basic`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::TxError;
use crate::backup::types::{BackupVerificationResult, RecoveryMethod, RecoveryPolicy};
use crate::config::{MAX_CONFIDENCE, MIN_CONFIDENCE, VERIFYING_KEY_LENGTH};
use crate::guardian::types::{GuardianEnrollment, VoteChoice};
use crate::identity::address::validate_address;
use crate::identity::did::validate_did;
use crate::offline::builder::BuildRequest;
use crate::offline::types::BundleFormat;
use crate::recovery::types::{AttemptStatus, RecoveryStatus};

/// Common surface of every account-signed message.
pub trait Msg {
    /// Stable name used in signatures and logs.
    fn type_url(&self) -> &'static str;

    /// Account address that must have signed the message.
    fn authority(&self) -> &str;

    /// Stateless checks.
    fn validate_basic(&self) -> Result<(), TxError>;
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn require(field: &str, value: &str) -> Result<(), TxError> {
    if value.trim().is_empty() {
        return Err(TxError::invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

fn check_authority(authority: &str) -> Result<(), TxError> {
    validate_address(authority)
        .map_err(|e| TxError::invalid(format!("invalid authority address: {e}")))
}

fn check_did(field: &str, did: &str) -> Result<(), TxError> {
    validate_did(did).map_err(|e| TxError::invalid(format!("{field}: {e}")))
}

/// Decode a base64 field, rejecting empty results.
pub fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, TxError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| TxError::invalid(format!("{field} is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(TxError::invalid(format!("{field} must not be empty")));
    }
    Ok(bytes)
}

pub fn encode_b64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateBackup {
    pub authority: String,
    pub holder_did: String,
    pub recovery_methods: Vec<RecoveryMethod>,
    /// Base64.
    pub encryption_key: String,
    pub retention_days: u32,
    pub policy: RecoveryPolicy,
}

impl Msg for MsgCreateBackup {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgCreateBackup"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        check_did("holder_did", &self.holder_did)?;
        if self.recovery_methods.is_empty() {
            return Err(TxError::invalid("at least one recovery method is required"));
        }
        for (i, method) in self.recovery_methods.iter().enumerate() {
            method
                .validate()
                .map_err(|e| TxError::invalid(format!("recovery method {i}: {e}")))?;
        }
        decode_b64("encryption_key", &self.encryption_key)?;
        if self.retention_days == 0 {
            return Err(TxError::invalid("retention_days must be positive"));
        }
        if let Some(score) = self.policy.required_score {
            if !(MIN_CONFIDENCE..=MAX_CONFIDENCE).contains(&score) {
                return Err(TxError::invalid(format!(
                    "required_score {score} outside {MIN_CONFIDENCE}..={MAX_CONFIDENCE}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCreateBackupResponse {
    pub backup_id: String,
    pub version: u64,
    pub integrity_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgVerifyBackupIntegrity {
    pub authority: String,
    pub backup_id: String,
    /// Base64. When present, each section is also trial-decrypted.
    pub decryption_key: Option<String>,
}

impl Msg for MsgVerifyBackupIntegrity {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgVerifyBackupIntegrity"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        require("backup_id", &self.backup_id)?;
        if let Some(key) = &self.decryption_key {
            decode_b64("decryption_key", key)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsgVerifyBackupIntegrityResponse {
    pub verification_id: String,
    pub result: BackupVerificationResult,
}

// ---------------------------------------------------------------------------
// Guardians
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAddGuardian {
    pub authority: String,
    pub holder_did: String,
    pub guardian: GuardianEnrollment,
}

impl Msg for MsgAddGuardian {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgAddGuardian"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        check_did("holder_did", &self.holder_did)?;
        check_did("guardian_did", &self.guardian.guardian_did)?;
        if self.guardian.guardian_did == self.holder_did {
            return Err(TxError::invalid("a holder cannot guard itself"));
        }
        validate_address(&self.guardian.address)
            .map_err(|e| TxError::invalid(format!("invalid guardian address: {e}")))?;
        require("guardian name", &self.guardian.name)?;
        if self.guardian.weight == 0 {
            return Err(TxError::invalid("guardian weight must be positive"));
        }
        match hex::decode(&self.guardian.public_key) {
            Ok(key) if key.len() == VERIFYING_KEY_LENGTH => Ok(()),
            _ => Err(TxError::invalid(format!(
                "guardian public key must be {VERIFYING_KEY_LENGTH} hex-encoded bytes"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgAddGuardianResponse {
    pub guardian_id: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSetGuardianThreshold {
    pub authority: String,
    pub holder_did: String,
    pub threshold: u32,
}

impl Msg for MsgSetGuardianThreshold {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgSetGuardianThreshold"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        check_did("holder_did", &self.holder_did)?;
        if self.threshold == 0 {
            return Err(TxError::invalid("quorum threshold must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSetGuardianThresholdResponse {
    pub threshold: u32,
    /// Summed weight of the holder's active guardians.
    pub total_weight: u64,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Recovery
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgInitiateRecovery {
    pub authority: String,
    pub holder_did: String,
    pub backup_id: String,
    pub reason: String,
}

impl Msg for MsgInitiateRecovery {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgInitiateRecovery"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        check_did("holder_did", &self.holder_did)?;
        require("backup_id", &self.backup_id)?;
        require("reason", &self.reason)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgInitiateRecoveryResponse {
    pub request_id: String,
    pub required_score: u8,
    pub expires_at: DateTime<Utc>,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSubmitProof {
    pub authority: String,
    pub request_id: String,
    pub method_id: String,
    /// Base64.
    pub proof_data: String,
}

impl Msg for MsgSubmitProof {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgSubmitProof"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        require("request_id", &self.request_id)?;
        require("method_id", &self.method_id)?;
        decode_b64("proof_data", &self.proof_data).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSubmitProofResponse {
    pub attempt_id: String,
    pub status: AttemptStatus,
    pub confidence: u8,
    pub current_score: u8,
    pub required_score: u8,
    pub request_status: RecoveryStatus,
    pub can_attempt_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSubmitGuardianVote {
    pub authority: String,
    pub request_id: String,
    pub guardian_id: String,
    pub vote: VoteChoice,
    /// Hex signature by the guardian's key over the vote payload.
    pub signature: String,
}

impl Msg for MsgSubmitGuardianVote {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgSubmitGuardianVote"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        require("request_id", &self.request_id)?;
        require("guardian_id", &self.guardian_id)?;
        require("signature", &self.signature)?;
        if hex::decode(&self.signature).is_err() {
            return Err(TxError::invalid("vote signature is not valid hex"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgSubmitGuardianVoteResponse {
    pub vote_id: String,
    pub voted_at: DateTime<Utc>,
    pub weight: u32,
    pub approve_weight: u64,
    pub required_weight: u32,
    pub quorum_reached: bool,
    pub request_status: RecoveryStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgExecuteRecovery {
    pub authority: String,
    pub request_id: String,
    pub new_controller: String,
    /// Base64.
    pub decryption_key: String,
}

impl Msg for MsgExecuteRecovery {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgExecuteRecovery"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        validate_address(&self.new_controller)
            .map_err(|e| TxError::invalid(format!("invalid new controller address: {e}")))?;
        require("request_id", &self.request_id)?;
        decode_b64("decryption_key", &self.decryption_key).map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgExecuteRecoveryResponse {
    pub recovered_at: DateTime<Utc>,
    pub new_controller: String,
    pub data_restored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCancelRecovery {
    pub authority: String,
    pub request_id: String,
}

impl Msg for MsgCancelRecovery {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgCancelRecovery"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        require("request_id", &self.request_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgCancelRecoveryResponse {
    pub request_id: String,
    pub cancelled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Offline bundles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgPrepareOfflineBundle {
    pub authority: String,
    pub request: BuildRequest,
}

impl Msg for MsgPrepareOfflineBundle {
    fn type_url(&self) -> &'static str {
        "/custodia.identity.MsgPrepareOfflineBundle"
    }

    fn authority(&self) -> &str {
        &self.authority
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        check_authority(&self.authority)?;
        self.request.validate().map_err(TxError::from)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgPrepareOfflineBundleResponse {
    pub did: String,
    pub format: BundleFormat,
    pub data_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub credential_count: usize,
    /// The encoded bundle, base64.
    pub bundle: String,
}

// ---------------------------------------------------------------------------
// Envelope enums
// ---------------------------------------------------------------------------

/// Any message the server accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMsg {
    CreateBackup(MsgCreateBackup),
    VerifyBackupIntegrity(MsgVerifyBackupIntegrity),
    AddGuardian(MsgAddGuardian),
    SetGuardianThreshold(MsgSetGuardianThreshold),
    InitiateRecovery(MsgInitiateRecovery),
    SubmitProof(MsgSubmitProof),
    SubmitGuardianVote(MsgSubmitGuardianVote),
    ExecuteRecovery(MsgExecuteRecovery),
    CancelRecovery(MsgCancelRecovery),
    PrepareOfflineBundle(MsgPrepareOfflineBundle),
}

impl TxMsg {
    fn inner(&self) -> &dyn Msg {
        match self {
            TxMsg::CreateBackup(m) => m,
            TxMsg::VerifyBackupIntegrity(m) => m,
            TxMsg::AddGuardian(m) => m,
            TxMsg::SetGuardianThreshold(m) => m,
            TxMsg::InitiateRecovery(m) => m,
            TxMsg::SubmitProof(m) => m,
            TxMsg::SubmitGuardianVote(m) => m,
            TxMsg::ExecuteRecovery(m) => m,
            TxMsg::CancelRecovery(m) => m,
            TxMsg::PrepareOfflineBundle(m) => m,
        }
    }
}

impl Msg for TxMsg {
    fn type_url(&self) -> &'static str {
        self.inner().type_url()
    }

    fn authority(&self) -> &str {
        self.inner().authority()
    }

    fn validate_basic(&self) -> Result<(), TxError> {
        self.inner().validate_basic()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TxResponse {
    CreateBackup(MsgCreateBackupResponse),
    VerifyBackupIntegrity(MsgVerifyBackupIntegrityResponse),
    AddGuardian(MsgAddGuardianResponse),
    SetGuardianThreshold(MsgSetGuardianThresholdResponse),
    InitiateRecovery(MsgInitiateRecoveryResponse),
    SubmitProof(MsgSubmitProofResponse),
    SubmitGuardianVote(MsgSubmitGuardianVoteResponse),
    ExecuteRecovery(MsgExecuteRecoveryResponse),
    CancelRecovery(MsgCancelRecoveryResponse),
    PrepareOfflineBundle(MsgPrepareOfflineBundleResponse),
}
