//! # Guardian Registry
//!
//! Holds each holder's guardians, their quorum threshold, and the signed
//! votes cast on recovery requests.
//!
//! Votes are keyed on `(request_id, guardian_id)` and inserted through a
//! vacant-entry check, so two racing votes from one guardian resolve to
//! exactly one stored vote. The loser gets `DuplicateVote`; nothing is ever
//! overwritten.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::types::{
    tally, GuardianEnrollment, GuardianStatus, GuardianVote, SocialRecoveryGuardian, VoteChoice,
    VotePayload, VoteTally,
};
use crate::clock::Clock;
use crate::config::DOMAIN_GUARDIAN_VOTE;
use crate::crypto::codec::{CodecError, IntegrityCodec};
use crate::crypto::signatures::Signer;
use crate::error::ErrorKind;
use crate::identity::did::validate_did;
use crate::sync::KeyedLocks;

#[derive(Debug, Error)]
pub enum GuardianError {
    #[error("invalid guardian: {0}")]
    InvalidGuardian(String),

    #[error("guardian with address {address} already registered for {holder}")]
    DuplicateGuardian { holder: String, address: String },

    #[error("guardian not found: {0}")]
    GuardianNotFound(String),

    #[error("guardian {guardian_id} does not act for {holder}")]
    NotHoldersGuardian { guardian_id: String, holder: String },

    #[error("guardian {guardian_id} is {status}")]
    GuardianInactive {
        guardian_id: String,
        status: GuardianStatus,
    },

    #[error("guardian {guardian_id} already voted on {request_id}")]
    DuplicateVote {
        request_id: String,
        guardian_id: String,
    },

    #[error("vote signature from guardian {0} does not verify")]
    InvalidSignature(String),

    #[error("quorum threshold must be positive")]
    InvalidThreshold,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl GuardianError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardianError::InvalidGuardian(_) | GuardianError::InvalidThreshold => {
                ErrorKind::Validation
            }
            GuardianError::DuplicateGuardian { .. } | GuardianError::DuplicateVote { .. } => {
                ErrorKind::Conflict
            }
            GuardianError::GuardianNotFound(_) => ErrorKind::NotFound,
            GuardianError::NotHoldersGuardian { .. } | GuardianError::GuardianInactive { .. } => {
                ErrorKind::Unauthorized
            }
            GuardianError::InvalidSignature(_) => ErrorKind::Integrity,
            GuardianError::Codec(e) => e.kind(),
        }
    }
}

/// Build the payload a guardian signs for `vote`.
pub fn vote_payload<'a>(
    request_id: &'a str,
    guardian_id: &'a str,
    vote: VoteChoice,
) -> VotePayload<'a> {
    VotePayload {
        request_id,
        guardian_id,
        vote,
    }
}

/// Client-side helper: sign a vote the way the registry verifies it.
pub fn sign_vote(
    codec: &IntegrityCodec,
    signer: &dyn Signer,
    request_id: &str,
    guardian_id: &str,
    vote: VoteChoice,
) -> Result<String, CodecError> {
    codec.sign_detached(
        signer,
        DOMAIN_GUARDIAN_VOTE,
        &vote_payload(request_id, guardian_id, vote),
    )
}

pub struct GuardianRegistry {
    guardians: DashMap<String, SocialRecoveryGuardian>,
    by_holder: DashMap<String, Vec<String>>,
    thresholds: DashMap<String, u32>,
    votes: DashMap<(String, String), GuardianVote>,
    /// Guardian IDs per request, in cast order.
    voters: DashMap<String, Vec<String>>,
    holder_locks: KeyedLocks,
    codec: IntegrityCodec,
    clock: Arc<dyn Clock>,
}

impl GuardianRegistry {
    pub fn new(codec: IntegrityCodec, clock: Arc<dyn Clock>) -> Self {
        Self {
            guardians: DashMap::new(),
            by_holder: DashMap::new(),
            thresholds: DashMap::new(),
            votes: DashMap::new(),
            voters: DashMap::new(),
            holder_locks: KeyedLocks::new(),
            codec,
            clock,
        }
    }

    pub fn add_guardian(
        &self,
        holder_did: &str,
        enrollment: GuardianEnrollment,
    ) -> Result<SocialRecoveryGuardian, GuardianError> {
        validate_did(holder_did).map_err(|e| GuardianError::InvalidGuardian(e.to_string()))?;
        if enrollment.guardian_did.trim().is_empty() {
            return Err(GuardianError::InvalidGuardian("guardian DID is empty".into()));
        }
        validate_did(&enrollment.guardian_did)
            .map_err(|e| GuardianError::InvalidGuardian(e.to_string()))?;
        if enrollment.address.trim().is_empty() {
            return Err(GuardianError::InvalidGuardian("address is empty".into()));
        }
        if enrollment.weight == 0 {
            return Err(GuardianError::InvalidGuardian("weight must be positive".into()));
        }
        if enrollment.public_key.is_empty() {
            return Err(GuardianError::InvalidGuardian("public key is empty".into()));
        }
        if hex::decode(&enrollment.public_key).is_err() {
            return Err(GuardianError::InvalidGuardian(
                "public key is not valid hex".into(),
            ));
        }

        let lock = self.holder_locks.handle(holder_did);
        let _guard = lock.lock();

        if self.find_by_address(holder_did, &enrollment.address).is_some() {
            return Err(GuardianError::DuplicateGuardian {
                holder: holder_did.to_string(),
                address: enrollment.address,
            });
        }

        let guardian = SocialRecoveryGuardian {
            guardian_id: format!("guardian_{}", Uuid::new_v4().simple()),
            holder_did: holder_did.to_string(),
            guardian_did: enrollment.guardian_did,
            address: enrollment.address,
            name: enrollment.name,
            weight: enrollment.weight,
            public_key: enrollment.public_key,
            status: GuardianStatus::Active,
            added_at: self.clock.now(),
        };
        self.guardians
            .insert(guardian.guardian_id.clone(), guardian.clone());
        self.by_holder
            .entry(holder_did.to_string())
            .or_default()
            .push(guardian.guardian_id.clone());

        info!(
            guardian_id = %guardian.guardian_id,
            holder = %holder_did,
            weight = guardian.weight,
            "guardian added"
        );
        Ok(guardian)
    }

    pub fn set_quorum_threshold(&self, holder_did: &str, weight: u32) -> Result<(), GuardianError> {
        if weight == 0 {
            return Err(GuardianError::InvalidThreshold);
        }
        let active = self.active_weight(holder_did);
        if u64::from(weight) > active {
            warn!(
                holder = %holder_did,
                threshold = weight,
                active_weight = active,
                "quorum threshold exceeds active guardian weight"
            );
        }
        self.thresholds.insert(holder_did.to_string(), weight);
        info!(holder = %holder_did, threshold = weight, "quorum threshold set");
        Ok(())
    }

    /// The holder's configured threshold, or a strict majority of active
    /// weight. Zero when the holder has no active guardians.
    pub fn quorum_threshold(&self, holder_did: &str) -> u32 {
        if let Some(t) = self.thresholds.get(holder_did) {
            return *t;
        }
        let active = self.active_weight(holder_did);
        if active == 0 {
            0
        } else {
            u32::try_from(active / 2 + 1).unwrap_or(u32::MAX)
        }
    }

    pub fn set_guardian_status(
        &self,
        guardian_id: &str,
        status: GuardianStatus,
    ) -> Result<SocialRecoveryGuardian, GuardianError> {
        let mut entry = self
            .guardians
            .get_mut(guardian_id)
            .ok_or_else(|| GuardianError::GuardianNotFound(guardian_id.to_string()))?;
        let previous = entry.status;
        entry.status = status;
        info!(guardian_id, from = %previous, to = %status, "guardian status changed");
        Ok(entry.clone())
    }

    pub fn get_guardian(&self, guardian_id: &str) -> Option<SocialRecoveryGuardian> {
        self.guardians.get(guardian_id).map(|g| g.clone())
    }

    pub fn guardians_for(&self, holder_did: &str) -> Vec<SocialRecoveryGuardian> {
        let Some(ids) = self.by_holder.get(holder_did).map(|ids| ids.clone()) else {
            return Vec::new();
        };
        ids.iter().filter_map(|id| self.get_guardian(id)).collect()
    }

    /// The holder's guardian at `address`. Revoked guardians are ignored, so
    /// an address can be re-enrolled after revocation.
    pub fn find_by_address(&self, holder_did: &str, address: &str) -> Option<SocialRecoveryGuardian> {
        self.guardians_for(holder_did)
            .into_iter()
            .find(|g| g.address == address && g.status != GuardianStatus::Revoked)
    }

    /// Verify and record a vote. The first vote per guardian per request is
    /// binding.
    pub fn cast_vote(
        &self,
        holder_did: &str,
        request_id: &str,
        guardian_id: &str,
        vote: VoteChoice,
        signature: &str,
    ) -> Result<GuardianVote, GuardianError> {
        let guardian = self
            .get_guardian(guardian_id)
            .ok_or_else(|| GuardianError::GuardianNotFound(guardian_id.to_string()))?;
        if guardian.holder_did != holder_did {
            return Err(GuardianError::NotHoldersGuardian {
                guardian_id: guardian_id.to_string(),
                holder: holder_did.to_string(),
            });
        }
        if guardian.status != GuardianStatus::Active {
            return Err(GuardianError::GuardianInactive {
                guardian_id: guardian_id.to_string(),
                status: guardian.status,
            });
        }

        let public_key = hex::decode(&guardian.public_key)
            .map_err(|_| GuardianError::InvalidSignature(guardian_id.to_string()))?;
        match self.codec.verify_detached(
            &public_key,
            DOMAIN_GUARDIAN_VOTE,
            &vote_payload(request_id, guardian_id, vote),
            signature,
        ) {
            Ok(()) => {}
            Err(CodecError::BadSignature | CodecError::MalformedHex { .. }) => {
                warn!(request_id, guardian_id, "rejected vote with bad signature");
                return Err(GuardianError::InvalidSignature(guardian_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        let record = GuardianVote {
            vote_id: format!("vote_{}", Uuid::new_v4().simple()),
            request_id: request_id.to_string(),
            guardian_id: guardian_id.to_string(),
            vote,
            signature: signature.to_string(),
            weight: guardian.weight,
            cast_at: self.clock.now(),
        };

        match self
            .votes
            .entry((request_id.to_string(), guardian_id.to_string()))
        {
            Entry::Occupied(_) => {
                return Err(GuardianError::DuplicateVote {
                    request_id: request_id.to_string(),
                    guardian_id: guardian_id.to_string(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
            }
        }
        self.voters
            .entry(request_id.to_string())
            .or_default()
            .push(guardian_id.to_string());

        debug!(request_id, guardian_id, vote = %vote, weight = record.weight, "guardian vote recorded");
        Ok(record)
    }

    /// Votes on `request_id` in the order they were cast.
    pub fn votes_for(&self, request_id: &str) -> Vec<GuardianVote> {
        let Some(ids) = self.voters.get(request_id).map(|ids| ids.clone()) else {
            return Vec::new();
        };
        ids.into_iter()
            .filter_map(|gid| {
                self.votes
                    .get(&(request_id.to_string(), gid))
                    .map(|v| v.clone())
            })
            .collect()
    }

    pub fn tally_request(&self, request_id: &str, threshold: u32) -> VoteTally {
        tally(&self.votes_for(request_id), threshold)
    }

    fn active_weight(&self, holder_did: &str) -> u64 {
        self.guardians_for(holder_did)
            .iter()
            .filter(|g| g.status == GuardianStatus::Active)
            .map(|g| u64::from(g.weight))
            .sum()
    }
}
