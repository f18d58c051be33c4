//! Stable error codes at the transaction boundary.
//!
//! Component errors carry detail for logs; clients get a `(codespace,
//! code)` pair that never changes meaning between releases, plus the coarse
//! [`ErrorKind`] and a human-readable message.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backup::types::BackupStatus;
use crate::backup::vault::VaultError;
use crate::crypto::codec::CodecError;
use crate::error::ErrorKind;
use crate::guardian::registry::GuardianError;
use crate::identity::address::AddressError;
use crate::identity::did::DidError;
use crate::identity::store::StoreError;
use crate::offline::builder::BundleError;
use crate::recovery::coordinator::RecoveryError;

/// Codespace every identity module error is reported under.
pub const CODESPACE: &str = "identity";

/// Numeric codes. 4001-4010 cover backups and recovery requests; 4011-4020
/// cover guardians, bundles, authorization, and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum TxCode {
    BackupNotFound = 4001,
    BackupExpired = 4002,
    BackupCorrupted = 4003,
    RecoveryRequestNotFound = 4004,
    RecoveryRequestExpired = 4005,
    InsufficientConfidence = 4006,
    MaxAttemptsExceeded = 4007,
    GuardianNotFound = 4008,
    InvalidRecoveryMethod = 4009,
    RecoveryNotAllowed = 4010,
    DuplicateGuardian = 4011,
    DuplicateVote = 4012,
    InvalidSignature = 4013,
    GuardianNotActive = 4014,
    InvalidThreshold = 4015,
    IdentityNotFound = 4016,
    BundleTooLarge = 4017,
    Unauthorized = 4018,
    InvalidRequest = 4019,
    Internal = 4020,
}

impl TxCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Catch-all code for an error known only by its kind.
    pub fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => TxCode::InvalidRequest,
            ErrorKind::NotFound => TxCode::IdentityNotFound,
            ErrorKind::Conflict => TxCode::RecoveryNotAllowed,
            ErrorKind::Expired => TxCode::BackupExpired,
            ErrorKind::Integrity => TxCode::InvalidSignature,
            ErrorKind::Exhausted => TxCode::MaxAttemptsExceeded,
            ErrorKind::Unauthorized => TxCode::Unauthorized,
            ErrorKind::Internal => TxCode::Internal,
        }
    }
}

impl fmt::Display for TxCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// What a rejected message reports back.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{codespace}/{code} ({kind}): {message}")]
pub struct TxError {
    pub codespace: String,
    pub code: u32,
    pub kind: ErrorKind,
    pub message: String,
}

impl TxError {
    pub fn new(code: TxCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            codespace: CODESPACE.to_string(),
            code: code.as_u32(),
            kind,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(TxCode::InvalidRequest, ErrorKind::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(TxCode::Unauthorized, ErrorKind::Unauthorized, message)
    }

    pub fn is(&self, code: TxCode) -> bool {
        self.code == code.as_u32()
    }
}

impl From<VaultError> for TxError {
    fn from(e: VaultError) -> Self {
        let code = match &e {
            VaultError::InvalidRequest(_) => TxCode::InvalidRequest,
            VaultError::IdentityNotFound(_) => TxCode::IdentityNotFound,
            VaultError::BackupNotFound(_) => TxCode::BackupNotFound,
            VaultError::BackupExpired(_) => TxCode::BackupExpired,
            VaultError::BackupNotActive { status, .. } => match status {
                BackupStatus::Expired => TxCode::BackupExpired,
                BackupStatus::Corrupted => TxCode::BackupCorrupted,
                _ => TxCode::RecoveryNotAllowed,
            },
            VaultError::NotOwner { .. } => TxCode::Unauthorized,
            VaultError::IntegrityMismatch(_) | VaultError::SectionUnreadable { .. } => {
                TxCode::BackupCorrupted
            }
            VaultError::Encryption(_) if e.kind() == ErrorKind::Integrity => {
                TxCode::BackupCorrupted
            }
            VaultError::Encryption(_) => TxCode::InvalidRequest,
            VaultError::Codec(_) | VaultError::Store(_) => TxCode::for_kind(e.kind()),
        };
        Self::new(code, e.kind(), e.to_string())
    }
}

impl From<GuardianError> for TxError {
    fn from(e: GuardianError) -> Self {
        let code = match &e {
            GuardianError::InvalidGuardian(_) => TxCode::InvalidRequest,
            GuardianError::DuplicateGuardian { .. } => TxCode::DuplicateGuardian,
            GuardianError::GuardianNotFound(_) => TxCode::GuardianNotFound,
            GuardianError::NotHoldersGuardian { .. } | GuardianError::GuardianInactive { .. } => {
                TxCode::GuardianNotActive
            }
            GuardianError::DuplicateVote { .. } => TxCode::DuplicateVote,
            GuardianError::InvalidSignature(_) => TxCode::InvalidSignature,
            GuardianError::InvalidThreshold => TxCode::InvalidThreshold,
            GuardianError::Codec(_) => TxCode::for_kind(e.kind()),
        };
        Self::new(code, e.kind(), e.to_string())
    }
}

impl From<RecoveryError> for TxError {
    fn from(e: RecoveryError) -> Self {
        let kind = e.kind();
        let code = match e {
            RecoveryError::Vault(inner) => return inner.into(),
            RecoveryError::Guardian(inner) => return inner.into(),
            RecoveryError::Store(inner) => return inner.into(),
            RecoveryError::InvalidRequest(_) => TxCode::InvalidRequest,
            RecoveryError::RequestNotFound(_) => TxCode::RecoveryRequestNotFound,
            RecoveryError::RequestExpired(_) => TxCode::RecoveryRequestExpired,
            RecoveryError::RecoveryInProgress { .. } | RecoveryError::NotPending { .. } => {
                TxCode::RecoveryNotAllowed
            }
            RecoveryError::AttemptsExhausted { .. } => TxCode::MaxAttemptsExceeded,
            RecoveryError::InvalidMethod { .. } | RecoveryError::NoGuardianPath(_) => {
                TxCode::InvalidRecoveryMethod
            }
            RecoveryError::NotApproved { .. } => TxCode::InsufficientConfidence,
            RecoveryError::Unauthorized { .. } => TxCode::Unauthorized,
            RecoveryError::IntegrityFailure { .. } => TxCode::BackupCorrupted,
        };
        Self::new(code, kind, e.to_string())
    }
}

impl From<BundleError> for TxError {
    fn from(e: BundleError) -> Self {
        let code = match &e {
            BundleError::InvalidRequest(_) | BundleError::InsufficientLevel { .. } => {
                TxCode::InvalidRequest
            }
            BundleError::IdentityNotFound(_) => TxCode::IdentityNotFound,
            BundleError::BundleTooLarge { .. } => TxCode::BundleTooLarge,
            BundleError::Encoding(_) | BundleError::Codec(_) | BundleError::Store(_) => {
                TxCode::for_kind(e.kind())
            }
        };
        Self::new(code, e.kind(), e.to_string())
    }
}

impl From<StoreError> for TxError {
    fn from(e: StoreError) -> Self {
        Self::new(TxCode::for_kind(e.kind()), e.kind(), e.to_string())
    }
}

impl From<CodecError> for TxError {
    fn from(e: CodecError) -> Self {
        let code = match &e {
            CodecError::BadSignature => TxCode::InvalidSignature,
            _ => TxCode::for_kind(e.kind()),
        };
        Self::new(code, e.kind(), e.to_string())
    }
}

impl From<DidError> for TxError {
    fn from(e: DidError) -> Self {
        Self::invalid(e.to_string())
    }
}

impl From<AddressError> for TxError {
    fn from(e: AddressError) -> Self {
        Self::invalid(e.to_string())
    }
}
