//! # Guardians
//!
//! Social recovery: holders enroll weighted guardians, guardians sign votes
//! on recovery requests, and enough approving weight satisfies the
//! guardian-based recovery methods.

pub mod registry;
pub mod types;

pub use registry::{sign_vote, vote_payload, GuardianError, GuardianRegistry};
pub use types::{
    tally, GuardianEnrollment, GuardianStatus, GuardianVote, SocialRecoveryGuardian, VoteChoice,
    VotePayload, VoteTally,
};
