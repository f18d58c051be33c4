//! # Backups
//!
//! Encrypted, versioned snapshots of a holder's private identity state and
//! the recovery methods that can unlock them.

pub mod types;
pub mod vault;

pub use types::{
    BackupStatus, BackupVerificationResult, CombinationPolicy, EncryptedPayload,
    EncryptedSection, IdentityBackup, MethodConfigKey, PayloadSection, RecoveryMethod,
    RecoveryMethodType, RecoveryPolicy,
};
pub use vault::{BackupVault, VaultError};
