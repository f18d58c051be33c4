//! # Recovery
//!
//! Multi-factor identity recovery against a backup: proofs and guardian
//! votes raise a request's confidence until it clears the required score,
//! after which the backup can be decrypted and the identity handed to a new
//! controller.

pub mod coordinator;
pub mod types;
pub mod verifiers;

pub use coordinator::{RecoveryCoordinator, RecoveryError, VoteOutcome};
pub use types::{
    combined_confidence, AttemptStatus, RecoveryAttempt, RecoveryRequest, RecoveryStatus,
};
pub use verifiers::{
    recovery_proof_digest, sign_recovery_proof, CommitmentVerifier, ProofContext, ProofVerifier,
    ProofVerifiers, SignatureProofVerifier,
};
