//! # Recovery Coordinator
//!
//! Drives a recovery request through its lifecycle:
//!
//! ```text
//!            submit_proof / guardian vote
//!   Pending ──────────────────────────────▶ Approved ──execute──▶ Completed
//!     │  │                                     │   └──integrity──▶ Failed
//!     │  └── reject weight / exhaustion / cancel ──▶ Rejected
//!     └── clock ──▶ Expired                    └── cancel ──▶ Rejected
//! ```
//!
//! A request holds its backup's `Recovering` flag from `initiate` until it
//! reaches a terminal state. Every mutation for one backup runs under that
//! backup's lock, so `initiate`, proof submission, votes, `execute`, and
//! `cancel` never interleave on the same backup.
//!
//! Expiry is lazy. A `Pending` request past `expires_at` rejects further
//! submissions with `RequestExpired` but keeps its stored status until
//! [`reap_expired`](RecoveryCoordinator::reap_expired) runs or a new
//! `initiate` on the same backup reaps it.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{
    combined_confidence, AttemptStatus, RecoveryAttempt, RecoveryRequest, RecoveryStatus,
};
use super::verifiers::{ProofContext, ProofVerifiers};
use crate::backup::types::{BackupStatus, IdentityBackup, RecoveryMethod};
use crate::backup::vault::{BackupVault, VaultError};
use crate::clock::Clock;
use crate::config::RecoveryConfig;
use crate::error::ErrorKind;
use crate::guardian::registry::{GuardianError, GuardianRegistry};
use crate::guardian::types::{GuardianVote, VoteChoice, VoteTally};
use crate::identity::did::validate_did;
use crate::identity::store::{ControllerRegistry, StoreError};
use crate::sync::KeyedLocks;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("invalid recovery request: {0}")]
    InvalidRequest(String),

    #[error("recovery request not found: {0}")]
    RequestNotFound(String),

    #[error("recovery request {0} has expired")]
    RequestExpired(String),

    #[error("backup {backup_id} already has a recovery in progress")]
    RecoveryInProgress { backup_id: String },

    #[error("recovery request {request_id} is {status}")]
    NotPending {
        request_id: String,
        status: RecoveryStatus,
    },

    #[error("recovery request {request_id} used all {max_attempts} attempts")]
    AttemptsExhausted {
        request_id: String,
        max_attempts: u32,
    },

    #[error("method {method_id} is not usable for recovery request {request_id}")]
    InvalidMethod {
        request_id: String,
        method_id: String,
    },

    #[error("recovery request {0} has no guardian-based method")]
    NoGuardianPath(String),

    #[error("recovery request {request_id} is {status}, not approved")]
    NotApproved {
        request_id: String,
        status: RecoveryStatus,
    },

    #[error("{actor} may not act on recovery request {request_id}")]
    Unauthorized { request_id: String, actor: String },

    #[error("backup {backup_id} failed integrity checks during recovery: {reason}")]
    IntegrityFailure { backup_id: String, reason: String },

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Guardian(#[from] GuardianError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RecoveryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecoveryError::InvalidRequest(_)
            | RecoveryError::InvalidMethod { .. }
            | RecoveryError::NoGuardianPath(_) => ErrorKind::Validation,
            RecoveryError::RequestNotFound(_) => ErrorKind::NotFound,
            RecoveryError::RequestExpired(_) => ErrorKind::Expired,
            RecoveryError::RecoveryInProgress { .. }
            | RecoveryError::NotPending { .. }
            | RecoveryError::NotApproved { .. } => ErrorKind::Conflict,
            RecoveryError::AttemptsExhausted { .. } => ErrorKind::Exhausted,
            RecoveryError::Unauthorized { .. } => ErrorKind::Unauthorized,
            RecoveryError::IntegrityFailure { .. } => ErrorKind::Integrity,
            RecoveryError::Vault(e) => e.kind(),
            RecoveryError::Guardian(e) => e.kind(),
            RecoveryError::Store(e) => e.kind(),
        }
    }
}

/// Result of a guardian vote as seen by the request.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub vote: GuardianVote,
    pub tally: VoteTally,
    pub request: RecoveryRequest,
}

// ---------------------------------------------------------------------------
// RecoveryCoordinator
// ---------------------------------------------------------------------------

pub struct RecoveryCoordinator {
    vault: Arc<BackupVault>,
    guardians: Arc<GuardianRegistry>,
    controllers: Arc<dyn ControllerRegistry>,
    verifiers: ProofVerifiers,
    requests: DashMap<String, RecoveryRequest>,
    /// Open request per backup.
    active_by_backup: DashMap<String, String>,
    /// Every request ID per holder, oldest first.
    by_holder: DashMap<String, Vec<String>>,
    backup_locks: KeyedLocks,
    clock: Arc<dyn Clock>,
    config: RecoveryConfig,
}

impl RecoveryCoordinator {
    pub fn new(
        vault: Arc<BackupVault>,
        guardians: Arc<GuardianRegistry>,
        controllers: Arc<dyn ControllerRegistry>,
        verifiers: ProofVerifiers,
        clock: Arc<dyn Clock>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            vault,
            guardians,
            controllers,
            verifiers,
            requests: DashMap::new(),
            active_by_backup: DashMap::new(),
            by_holder: DashMap::new(),
            backup_locks: KeyedLocks::new(),
            clock,
            config,
        }
    }

    pub fn vault(&self) -> &Arc<BackupVault> {
        &self.vault
    }

    pub fn guardians(&self) -> &Arc<GuardianRegistry> {
        &self.guardians
    }

    /// Open a recovery request against `backup_id` and mark the backup
    /// `Recovering`.
    pub fn initiate(
        &self,
        holder_did: &str,
        backup_id: &str,
        reason: &str,
        requested_by: &str,
    ) -> Result<RecoveryRequest, RecoveryError> {
        validate_did(holder_did).map_err(|e| RecoveryError::InvalidRequest(e.to_string()))?;
        if reason.trim().is_empty() {
            return Err(RecoveryError::InvalidRequest("reason must not be empty".into()));
        }
        if requested_by.trim().is_empty() {
            return Err(RecoveryError::InvalidRequest(
                "requester must not be empty".into(),
            ));
        }

        let lock = self.backup_locks.handle(backup_id);
        let _guard = lock.lock();
        let now = self.clock.now();

        let backup = self.vault.get_backup(backup_id)?;
        if backup.holder_did != holder_did {
            return Err(VaultError::NotOwner {
                backup_id: backup_id.to_string(),
                holder: holder_did.to_string(),
            }
            .into());
        }
        if backup.status == BackupStatus::Recovering {
            self.reap_stale_locked(backup_id);
        }

        let backup = self
            .vault
            .begin_recovery(backup_id, now)
            .map_err(|e| match e {
                VaultError::BackupNotActive {
                    status: BackupStatus::Recovering,
                    ..
                } => RecoveryError::RecoveryInProgress {
                    backup_id: backup_id.to_string(),
                },
                other => other.into(),
            })?;

        let quorum_threshold = if backup.has_guardian_method() {
            self.guardians.quorum_threshold(holder_did)
        } else {
            0
        };
        let request = RecoveryRequest {
            request_id: format!("recovery_{}", Uuid::new_v4().simple()),
            holder_did: holder_did.to_string(),
            backup_id: backup_id.to_string(),
            requested_by: requested_by.to_string(),
            reason: reason.to_string(),
            attempts: Vec::new(),
            required_score: backup.required_score(),
            confidence_score: 0,
            attempt_count: 0,
            max_attempts: self.config.max_attempts,
            combination: backup.recovery_policy.combination,
            quorum_threshold,
            method_ids: backup
                .enabled_methods()
                .map(|m| m.method_id.clone())
                .collect(),
            created_at: now,
            expires_at: now + self.config.request_ttl(),
            status: RecoveryStatus::Pending,
            completed_at: None,
            new_controller: None,
        };

        self.requests
            .insert(request.request_id.clone(), request.clone());
        self.active_by_backup
            .insert(backup_id.to_string(), request.request_id.clone());
        self.by_holder
            .entry(holder_did.to_string())
            .or_default()
            .push(request.request_id.clone());

        info!(
            request_id = %request.request_id,
            backup_id,
            holder = %holder_did,
            required_score = request.required_score,
            combination = %request.combination,
            "recovery initiated"
        );
        Ok(request)
    }

    /// Score a proof for one of the request's methods.
    pub fn submit_proof(
        &self,
        request_id: &str,
        method_id: &str,
        proof_data: &[u8],
    ) -> Result<RecoveryAttempt, RecoveryError> {
        let backup_id = self.backup_of(request_id)?;
        let lock = self.backup_locks.handle(&backup_id);
        let _guard = lock.lock();

        let mut request = self.get_request(request_id)?;
        let now = self.clock.now();
        self.ensure_accepting(&request, now)?;
        if request.attempt_count >= request.max_attempts {
            return Err(RecoveryError::AttemptsExhausted {
                request_id: request_id.to_string(),
                max_attempts: request.max_attempts,
            });
        }

        let backup = self.vault.get_backup(&backup_id)?;
        let method = backup
            .method(method_id)
            .filter(|m| m.enabled && request.includes_method(method_id))
            .filter(|m| !m.method_type.is_guardian_based())
            .ok_or_else(|| RecoveryError::InvalidMethod {
                request_id: request_id.to_string(),
                method_id: method_id.to_string(),
            })?;

        let confidence = self.verifiers.verify(
            method,
            &ProofContext {
                request_id,
                holder_did: &request.holder_did,
            },
            proof_data,
        );
        let status = if confidence >= method.required_confidence {
            AttemptStatus::Verified
        } else {
            AttemptStatus::Failed
        };
        let attempt = RecoveryAttempt {
            attempt_id: format!("attempt_{}", Uuid::new_v4().simple()),
            method_id: method_id.to_string(),
            proof_data: proof_data.to_vec(),
            attempted_at: now,
            status,
            confidence,
        };
        request.attempts.push(attempt.clone());
        request.attempt_count += 1;

        let tally = self.tally(&request);
        self.rescore(&mut request, &backup, tally.quorum_reached);

        if request.status == RecoveryStatus::Pending
            && request.attempt_count >= request.max_attempts
            && !backup_has_guardian_path(&backup, &request)
        {
            request.status = RecoveryStatus::Rejected;
            request.completed_at = Some(now);
            self.vault.release(&backup_id);
            self.active_by_backup.remove(&backup_id);
            warn!(request_id, backup_id = %backup_id, "recovery attempts exhausted");
        }

        info!(
            request_id,
            method_id,
            confidence,
            verified = status == AttemptStatus::Verified,
            score = request.confidence_score,
            status = %request.status,
            "recovery proof scored"
        );
        self.requests.insert(request_id.to_string(), request);
        Ok(attempt)
    }

    /// Record a guardian's vote and re-evaluate the request.
    pub fn submit_guardian_vote(
        &self,
        request_id: &str,
        guardian_id: &str,
        vote: VoteChoice,
        signature: &str,
    ) -> Result<VoteOutcome, RecoveryError> {
        let backup_id = self.backup_of(request_id)?;
        let lock = self.backup_locks.handle(&backup_id);
        let _guard = lock.lock();

        let mut request = self.get_request(request_id)?;
        let now = self.clock.now();
        self.ensure_accepting(&request, now)?;

        let backup = self.vault.get_backup(&backup_id)?;
        if !backup_has_guardian_path(&backup, &request) {
            return Err(RecoveryError::NoGuardianPath(request_id.to_string()));
        }

        let recorded =
            self.guardians
                .cast_vote(&request.holder_did, request_id, guardian_id, vote, signature)?;
        let tally = self.tally(&request);

        if tally.quorum_reached {
            self.rescore(&mut request, &backup, true);
        } else if tally.rejected() {
            request.status = RecoveryStatus::Rejected;
            request.completed_at = Some(now);
            self.vault.release(&backup_id);
            self.active_by_backup.remove(&backup_id);
            warn!(
                request_id,
                reject_weight = tally.reject_weight,
                threshold = tally.threshold,
                "recovery rejected by guardians"
            );
        }

        info!(
            request_id,
            guardian_id,
            vote = %vote,
            approve_weight = tally.approve_weight,
            quorum = tally.quorum_reached,
            status = %request.status,
            "guardian vote applied"
        );
        self.requests
            .insert(request_id.to_string(), request.clone());
        Ok(VoteOutcome {
            vote: recorded,
            tally,
            request,
        })
    }

    /// Restore the backup and hand the identity to `new_controller`.
    ///
    /// A backup that fails to decrypt or verify here is marked `Corrupted`
    /// and the request `Failed`; neither is retried.
    pub fn execute(
        &self,
        request_id: &str,
        new_controller: &str,
        decryption_key: &[u8],
    ) -> Result<RecoveryRequest, RecoveryError> {
        if new_controller.trim().is_empty() {
            return Err(RecoveryError::InvalidRequest(
                "new controller must not be empty".into(),
            ));
        }
        if decryption_key.is_empty() {
            return Err(RecoveryError::InvalidRequest(
                "decryption key must not be empty".into(),
            ));
        }

        let backup_id = self.backup_of(request_id)?;
        let lock = self.backup_locks.handle(&backup_id);
        let _guard = lock.lock();

        let mut request = self.get_request(request_id)?;
        if request.status != RecoveryStatus::Approved {
            return Err(RecoveryError::NotApproved {
                request_id: request_id.to_string(),
                status: request.status,
            });
        }
        let now = self.clock.now();

        let restored = match self.vault.decrypt_sections(&backup_id, decryption_key) {
            Ok(restored) => restored,
            Err(e) if e.kind() == ErrorKind::Integrity => {
                request.status = RecoveryStatus::Failed;
                request.completed_at = Some(now);
                self.requests
                    .insert(request_id.to_string(), request);
                self.active_by_backup.remove(&backup_id);
                self.vault.mark_corrupted(&backup_id);
                error!(request_id, backup_id = %backup_id, error = %e, "recovery execution failed");
                return Err(RecoveryError::IntegrityFailure {
                    backup_id,
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.controllers
            .install_controller(&request.holder_did, new_controller)?;
        self.controllers
            .restore_state(&request.holder_did, restored)?;
        let epoch = self.vault.complete_recovery(&backup_id)?;

        request.status = RecoveryStatus::Completed;
        request.completed_at = Some(now);
        request.new_controller = Some(new_controller.to_string());
        self.requests
            .insert(request_id.to_string(), request.clone());
        self.active_by_backup.remove(&backup_id);

        info!(
            request_id,
            backup_id = %backup_id,
            holder = %request.holder_did,
            new_controller,
            epoch,
            "recovery completed"
        );
        Ok(request)
    }

    /// Withdraw an open request. Only the requester or the holder may.
    pub fn cancel(&self, request_id: &str, by: &str) -> Result<RecoveryRequest, RecoveryError> {
        let backup_id = self.backup_of(request_id)?;
        let lock = self.backup_locks.handle(&backup_id);
        let _guard = lock.lock();

        let mut request = self.get_request(request_id)?;
        if by != request.requested_by && by != request.holder_did {
            return Err(RecoveryError::Unauthorized {
                request_id: request_id.to_string(),
                actor: by.to_string(),
            });
        }
        if !request.status.is_open() {
            return Err(RecoveryError::NotPending {
                request_id: request_id.to_string(),
                status: request.status,
            });
        }

        request.status = RecoveryStatus::Rejected;
        request.completed_at = Some(self.clock.now());
        self.requests
            .insert(request_id.to_string(), request.clone());
        self.vault.release(&backup_id);
        self.active_by_backup.remove(&backup_id);
        info!(request_id, by, "recovery cancelled");
        Ok(request)
    }

    /// Expire every `Pending` request past its deadline and release its
    /// backup. Returns how many were expired.
    pub fn reap_expired(&self) -> usize {
        let now = self.clock.now();
        let stale: Vec<String> = self
            .active_by_backup
            .iter()
            .filter(|e| {
                self.requests
                    .get(e.value())
                    .is_some_and(|r| r.is_expired(now))
            })
            .map(|e| e.key().clone())
            .collect();

        let mut reaped = 0;
        for backup_id in stale {
            let lock = self.backup_locks.handle(&backup_id);
            let _guard = lock.lock();
            if self.reap_stale_locked(&backup_id) {
                reaped += 1;
            }
        }
        if reaped > 0 {
            info!(reaped, "expired recovery requests reaped");
        }
        reaped
    }

    pub fn get_request(&self, request_id: &str) -> Result<RecoveryRequest, RecoveryError> {
        self.requests
            .get(request_id)
            .map(|r| r.clone())
            .ok_or_else(|| RecoveryError::RequestNotFound(request_id.to_string()))
    }

    /// Every request ever opened for `holder_did`, oldest first, with lazy
    /// expiry applied to the returned status.
    pub fn requests_for(&self, holder_did: &str) -> Vec<RecoveryRequest> {
        let Some(ids) = self.by_holder.get(holder_did).map(|ids| ids.clone()) else {
            return Vec::new();
        };
        let now = self.clock.now();
        ids.iter()
            .filter_map(|id| self.requests.get(id).map(|r| r.clone()))
            .map(|mut r| {
                r.status = r.effective_status(now);
                r
            })
            .collect()
    }

    /// Requests still waiting on proofs or votes across all holders, oldest
    /// first. Requests past their deadline are left out.
    pub fn pending_requests(&self) -> Vec<RecoveryRequest> {
        let now = self.clock.now();
        let mut pending: Vec<RecoveryRequest> = self
            .active_by_backup
            .iter()
            .filter_map(|e| self.requests.get(e.value()).map(|r| r.clone()))
            .filter(|r| r.effective_status(now) == RecoveryStatus::Pending)
            .collect();
        pending.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        pending
    }

    /// The open request holding `backup_id`, if any.
    pub fn active_request_for(&self, backup_id: &str) -> Option<RecoveryRequest> {
        let request_id = self.active_by_backup.get(backup_id)?.clone();
        self.requests
            .get(&request_id)
            .map(|r| r.clone())
            .filter(|r| r.status.is_open())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn backup_of(&self, request_id: &str) -> Result<String, RecoveryError> {
        self.requests
            .get(request_id)
            .map(|r| r.backup_id.clone())
            .ok_or_else(|| RecoveryError::RequestNotFound(request_id.to_string()))
    }

    fn ensure_accepting(
        &self,
        request: &RecoveryRequest,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), RecoveryError> {
        if request.status != RecoveryStatus::Pending {
            return Err(RecoveryError::NotPending {
                request_id: request.request_id.clone(),
                status: request.status,
            });
        }
        if request.is_expired(now) {
            return Err(RecoveryError::RequestExpired(request.request_id.clone()));
        }
        Ok(())
    }

    fn tally(&self, request: &RecoveryRequest) -> VoteTally {
        self.guardians
            .tally_request(&request.request_id, request.quorum_threshold)
    }

    /// Recompute the score under the request's policy. The score only ever
    /// goes up.
    fn rescore(&self, request: &mut RecoveryRequest, backup: &IdentityBackup, quorum: bool) {
        let methods: Vec<&RecoveryMethod> = request
            .method_ids
            .iter()
            .filter_map(|id| backup.method(id))
            .collect();
        let computed =
            combined_confidence(request.combination, &methods, &request.attempts, quorum);
        request.confidence_score = request.confidence_score.max(computed);
        if request.status == RecoveryStatus::Pending
            && request.confidence_score >= request.required_score
        {
            request.status = RecoveryStatus::Approved;
            info!(
                request_id = %request.request_id,
                score = request.confidence_score,
                required = request.required_score,
                "recovery approved"
            );
        }
    }

    /// Expire the open request on `backup_id` if it is past its deadline.
    /// Caller holds the backup lock.
    fn reap_stale_locked(&self, backup_id: &str) -> bool {
        let Some(request_id) = self.active_by_backup.get(backup_id).map(|r| r.clone()) else {
            return false;
        };
        let now = self.clock.now();
        let Some(mut request) = self.requests.get_mut(&request_id) else {
            return false;
        };
        if !request.is_expired(now) {
            return false;
        }
        request.status = RecoveryStatus::Expired;
        request.completed_at = Some(now);
        drop(request);
        self.active_by_backup.remove(backup_id);
        self.vault.release(backup_id);
        debug!(request_id = %request_id, backup_id, "stale recovery request expired");
        true
    }
}

fn backup_has_guardian_path(backup: &IdentityBackup, request: &RecoveryRequest) -> bool {
    request
        .method_ids
        .iter()
        .filter_map(|id| backup.method(id))
        .any(|m| m.method_type.is_guardian_based())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::types::{
        CombinationPolicy, MethodConfigKey, RecoveryMethodType, RecoveryPolicy,
    };
    use crate::clock::ManualClock;
    use crate::crypto::codec::IntegrityCodec;
    use crate::crypto::keys::IdentityKeypair;
    use crate::guardian::registry::sign_vote;
    use crate::guardian::types::GuardianEnrollment;
    use crate::identity::store::fixtures::{credential, identity};
    use crate::identity::store::{IdentityStore, MemoryIdentityStore};
    use crate::recovery::verifiers::{CommitmentVerifier, ProofVerifier};

    const HOLDER: &str = "did:example:alice";
    const KEY: &[u8] = b"backup key";
    const SEED: &[u8] = b"seed words";
    const CODE: &[u8] = b"backup code";

    struct Harness {
        store: Arc<MemoryIdentityStore>,
        clock: Arc<ManualClock>,
        coordinator: RecoveryCoordinator,
        guardian_keys: Vec<IdentityKeypair>,
        guardian_ids: Vec<String>,
    }

    impl Harness {
        fn new(verifier_confidence: u8) -> Self {
            let store = Arc::new(MemoryIdentityStore::new());
            store.upsert_identity(identity(HOLDER, "aa"));
            store.add_credential(HOLDER, credential("cred-1", "KYCCredential", 5));
            let clock = Arc::new(ManualClock::starting_now());
            let codec = IntegrityCodec::standard();
            let vault = Arc::new(BackupVault::new(
                store.clone(),
                codec.clone(),
                clock.clone(),
                RecoveryConfig::default(),
            ));
            let guardians = Arc::new(GuardianRegistry::new(codec.clone(), clock.clone()));
            let commitment: Arc<dyn ProofVerifier> =
                Arc::new(CommitmentVerifier::new(verifier_confidence));
            let mut verifiers = ProofVerifiers::standard(codec);
            verifiers
                .register(RecoveryMethodType::MnemonicPhrase, commitment.clone())
                .register(RecoveryMethodType::BackupCodes, commitment);
            let coordinator = RecoveryCoordinator::new(
                vault,
                guardians,
                store.clone(),
                verifiers,
                clock.clone(),
                RecoveryConfig::default(),
            );
            Self {
                store,
                clock,
                coordinator,
                guardian_keys: Vec::new(),
                guardian_ids: Vec::new(),
            }
        }

        fn with_guardians(mut self, weights: &[u32], threshold: u32) -> Self {
            let registry = self.coordinator.guardians().clone();
            for (i, w) in weights.iter().enumerate() {
                let kp = IdentityKeypair::generate();
                let g = registry
                    .add_guardian(
                        HOLDER,
                        GuardianEnrollment {
                            guardian_did: format!("did:example:g{i}"),
                            address: format!("cust1g{i}"),
                            name: format!("g{i}"),
                            weight: *w,
                            public_key: kp.public_key().to_hex(),
                        },
                    )
                    .unwrap();
                self.guardian_keys.push(kp);
                self.guardian_ids.push(g.guardian_id);
            }
            registry.set_quorum_threshold(HOLDER, threshold).unwrap();
            self
        }

        fn backup(&self, methods: Vec<RecoveryMethod>, policy: RecoveryPolicy) -> IdentityBackup {
            self.coordinator
                .vault()
                .create_backup(HOLDER, methods, KEY, 30, policy)
                .unwrap()
        }

        fn vote(
            &self,
            request_id: &str,
            i: usize,
            choice: VoteChoice,
        ) -> Result<VoteOutcome, RecoveryError> {
            let sig = sign_vote(
                &IntegrityCodec::standard(),
                &self.guardian_keys[i],
                request_id,
                &self.guardian_ids[i],
                choice,
            )
            .unwrap();
            self.coordinator
                .submit_guardian_vote(request_id, &self.guardian_ids[i], choice, &sig)
        }
    }

    fn seed_method(conf: u8) -> RecoveryMethod {
        RecoveryMethod::new("seed", RecoveryMethodType::MnemonicPhrase, "Seed", conf)
            .with_config(MethodConfigKey::Commitment, CommitmentVerifier::commitment(SEED))
    }

    fn code_method(conf: u8) -> RecoveryMethod {
        RecoveryMethod::new("codes", RecoveryMethodType::BackupCodes, "Codes", conf)
            .with_config(MethodConfigKey::Commitment, CommitmentVerifier::commitment(CODE))
    }

    fn social_method() -> RecoveryMethod {
        RecoveryMethod::new("friends", RecoveryMethodType::SocialRecovery, "Friends", 60)
    }

    #[test]
    fn additive_scenario_needs_both_methods() {
        let h = Harness::new(40);
        let b = h.backup(
            vec![seed_method(40), code_method(40)],
            RecoveryPolicy::additive(70),
        );
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost device", "cust1me").unwrap();
        assert_eq!(req.required_score, 70);
        assert_eq!(
            h.coordinator.vault().get_backup(&b.backup_id).unwrap().status,
            BackupStatus::Recovering
        );

        let a = h.coordinator.submit_proof(&req.request_id, "seed", SEED).unwrap();
        assert_eq!(a.status, AttemptStatus::Verified);
        let r = h.coordinator.get_request(&req.request_id).unwrap();
        assert_eq!(r.confidence_score, 40);
        assert_eq!(r.status, RecoveryStatus::Pending);

        // Repeating the same method does not inflate the sum.
        h.coordinator.submit_proof(&req.request_id, "seed", SEED).unwrap();
        assert_eq!(
            h.coordinator.get_request(&req.request_id).unwrap().confidence_score,
            40
        );

        h.coordinator.submit_proof(&req.request_id, "codes", CODE).unwrap();
        let r = h.coordinator.get_request(&req.request_id).unwrap();
        assert_eq!(r.confidence_score, 80);
        assert_eq!(r.status, RecoveryStatus::Approved);
        assert_eq!(r.attempt_count, 3);
    }

    #[test]
    fn maximum_policy_uses_strictest_method_by_default() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80), code_method(60)], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        assert_eq!(req.required_score, 80);
        h.coordinator.submit_proof(&req.request_id, "codes", CODE).unwrap();
        assert_eq!(
            h.coordinator.get_request(&req.request_id).unwrap().status,
            RecoveryStatus::Approved
        );
    }

    #[test]
    fn require_all_waits_for_every_method() {
        let h = Harness::new(90);
        let policy = RecoveryPolicy {
            combination: CombinationPolicy::RequireAll,
            required_score: Some(80),
        };
        let b = h.backup(vec![seed_method(80), code_method(80)], policy);
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        h.coordinator.submit_proof(&req.request_id, "seed", SEED).unwrap();
        let r = h.coordinator.get_request(&req.request_id).unwrap();
        assert_eq!(r.status, RecoveryStatus::Pending);
        assert_eq!(r.confidence_score, 0);
        h.coordinator.submit_proof(&req.request_id, "codes", CODE).unwrap();
        let r = h.coordinator.get_request(&req.request_id).unwrap();
        assert_eq!(r.status, RecoveryStatus::Approved);
        assert_eq!(r.confidence_score, 90);
    }

    #[test]
    fn failed_attempts_count_and_exhaust() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        for _ in 0..4 {
            let a = h.coordinator.submit_proof(&req.request_id, "seed", b"nope").unwrap();
            assert_eq!(a.status, AttemptStatus::Failed);
        }
        h.coordinator.submit_proof(&req.request_id, "seed", b"nope").unwrap();
        let r = h.coordinator.get_request(&req.request_id).unwrap();
        assert_eq!(r.attempt_count, 5);
        assert_eq!(r.status, RecoveryStatus::Rejected);
        assert_eq!(
            h.coordinator.vault().get_backup(&b.backup_id).unwrap().status,
            BackupStatus::Active
        );

        let err = h.coordinator.submit_proof(&req.request_id, "seed", SEED).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn exhausted_with_guardian_path_stays_pending_for_votes() {
        let h = Harness::new(100).with_guardians(&[40, 35, 25], 60);
        let b = h.backup(
            vec![seed_method(80), social_method()],
            RecoveryPolicy::default(),
        );
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        for _ in 0..5 {
            h.coordinator.submit_proof(&req.request_id, "seed", b"nope").unwrap();
        }
        let err = h.coordinator.submit_proof(&req.request_id, "seed", SEED).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exhausted);
        assert_eq!(
            h.coordinator.get_request(&req.request_id).unwrap().attempt_count,
            5
        );

        h.vote(&req.request_id, 0, VoteChoice::Approve).unwrap();
        let out = h.vote(&req.request_id, 1, VoteChoice::Approve).unwrap();
        assert!(out.tally.quorum_reached);
        assert_eq!(out.request.status, RecoveryStatus::Approved);
        assert_eq!(out.request.confidence_score, 100);
    }

    #[test]
    fn guardian_rejection_closes_request() {
        let h = Harness::new(100).with_guardians(&[40, 35, 25], 60);
        let b = h.backup(vec![social_method()], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        assert_eq!(req.quorum_threshold, 60);
        h.vote(&req.request_id, 0, VoteChoice::Reject).unwrap();
        let out = h.vote(&req.request_id, 2, VoteChoice::Reject).unwrap();
        assert_eq!(out.tally.reject_weight, 65);
        assert_eq!(out.request.status, RecoveryStatus::Rejected);
        assert!(h.vote(&req.request_id, 1, VoteChoice::Approve).is_err());
    }

    #[test]
    fn votes_need_a_guardian_method() {
        let h = Harness::new(100).with_guardians(&[40], 40);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        let err = h.vote(&req.request_id, 0, VoteChoice::Approve).unwrap_err();
        assert!(matches!(err, RecoveryError::NoGuardianPath(_)));
    }

    #[test]
    fn guardian_methods_cannot_take_proofs() {
        let h = Harness::new(100).with_guardians(&[40], 40);
        let b = h.backup(vec![social_method()], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        let err = h
            .coordinator
            .submit_proof(&req.request_id, "friends", b"x")
            .unwrap_err();
        assert!(matches!(err, RecoveryError::InvalidMethod { .. }));
        let err = h
            .coordinator
            .submit_proof(&req.request_id, "nope", b"x")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn second_initiate_conflicts() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        let err = h
            .coordinator
            .initiate(HOLDER, &b.backup_id, "again", "cust1other")
            .unwrap_err();
        assert!(matches!(err, RecoveryError::RecoveryInProgress { .. }));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn initiate_validates_inputs() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        assert!(h.coordinator.initiate(HOLDER, &b.backup_id, " ", "cust1me").is_err());
        assert_eq!(
            h.coordinator
                .initiate(HOLDER, "backup_missing", "lost", "cust1me")
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            h.coordinator
                .initiate("did:example:bob", &b.backup_id, "lost", "cust1me")
                .unwrap_err()
                .kind(),
            ErrorKind::Unauthorized
        );
    }

    #[test]
    fn expired_backup_cannot_be_recovered() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        h.clock.advance(chrono::Duration::days(31));
        let err = h
            .coordinator
            .initiate(HOLDER, &b.backup_id, "lost", "cust1me")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
    }

    #[test]
    fn pending_requests_expire_and_get_reaped() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        h.clock.advance(chrono::Duration::hours(25));

        let err = h.coordinator.submit_proof(&req.request_id, "seed", SEED).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Expired);
        assert_eq!(h.coordinator.get_request(&req.request_id).unwrap().attempt_count, 0);

        assert_eq!(h.coordinator.reap_expired(), 1);
        assert_eq!(
            h.coordinator.get_request(&req.request_id).unwrap().status,
            RecoveryStatus::Expired
        );
        assert!(h.coordinator.active_request_for(&b.backup_id).is_none());
        assert_eq!(h.coordinator.reap_expired(), 0);
    }

    #[test]
    fn initiate_reaps_stale_request_on_same_backup() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let first = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        h.clock.advance(chrono::Duration::hours(25));
        let second = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        assert_ne!(first.request_id, second.request_id);
        assert_eq!(
            h.coordinator.get_request(&first.request_id).unwrap().status,
            RecoveryStatus::Expired
        );
    }

    #[test]
    fn approved_request_survives_ttl_and_executes() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        h.coordinator.submit_proof(&req.request_id, "seed", SEED).unwrap();
        h.clock.advance(chrono::Duration::hours(48));
        assert_eq!(h.coordinator.reap_expired(), 0);

        let done = h.coordinator.execute(&req.request_id, "cust1new", KEY).unwrap();
        assert_eq!(done.status, RecoveryStatus::Completed);
        assert_eq!(done.new_controller.as_deref(), Some("cust1new"));
        assert_eq!(
            h.store.identity(HOLDER).unwrap().unwrap().controller,
            "cust1new"
        );
        let backup = h.coordinator.vault().get_backup(&b.backup_id).unwrap();
        assert_eq!(backup.status, BackupStatus::Active);
        assert_eq!(backup.recovery_epoch, 1);
    }

    #[test]
    fn execute_requires_approval() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        let err = h.coordinator.execute(&req.request_id, "cust1new", KEY).unwrap_err();
        assert!(matches!(err, RecoveryError::NotApproved { .. }));
        assert!(h.coordinator.execute(&req.request_id, "", KEY).is_err());
    }

    #[test]
    fn wrong_key_corrupts_backup_and_fails_request() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        h.coordinator.submit_proof(&req.request_id, "seed", SEED).unwrap();

        let err = h
            .coordinator
            .execute(&req.request_id, "cust1new", b"wrong key")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert_eq!(
            h.coordinator.get_request(&req.request_id).unwrap().status,
            RecoveryStatus::Failed
        );
        assert_eq!(
            h.coordinator.vault().get_backup(&b.backup_id).unwrap().status,
            BackupStatus::Corrupted
        );
        assert_eq!(
            h.store.identity(HOLDER).unwrap().unwrap().controller,
            "cust1controller"
        );
    }

    #[test]
    fn cancel_releases_backup() {
        let h = Harness::new(100);
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let req = h.coordinator.initiate(HOLDER, &b.backup_id, "lost", "cust1me").unwrap();
        let err = h.coordinator.cancel(&req.request_id, "cust1stranger").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthorized);

        let r = h.coordinator.cancel(&req.request_id, HOLDER).unwrap();
        assert_eq!(r.status, RecoveryStatus::Rejected);
        assert_eq!(
            h.coordinator.vault().get_backup(&b.backup_id).unwrap().status,
            BackupStatus::Active
        );
        assert!(h.coordinator.cancel(&req.request_id, HOLDER).is_err());
    }

    #[test]
    fn requests_are_listed_per_holder_and_pending() {
        let h = Harness::new(100);
        let first = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let second = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        assert!(h.coordinator.requests_for(HOLDER).is_empty());

        let cancelled = h
            .coordinator
            .initiate(HOLDER, &first.backup_id, "lost", "cust1me")
            .unwrap();
        h.coordinator.cancel(&cancelled.request_id, HOLDER).unwrap();
        h.clock.advance(chrono::Duration::seconds(1));
        let open = h
            .coordinator
            .initiate(HOLDER, &second.backup_id, "lost", "cust1me")
            .unwrap();

        let history: Vec<(String, RecoveryStatus)> = h
            .coordinator
            .requests_for(HOLDER)
            .into_iter()
            .map(|r| (r.request_id, r.status))
            .collect();
        assert_eq!(
            history,
            vec![
                (cancelled.request_id.clone(), RecoveryStatus::Rejected),
                (open.request_id.clone(), RecoveryStatus::Pending),
            ]
        );
        let pending = h.coordinator.pending_requests();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].request_id, open.request_id);
        assert!(h.coordinator.requests_for("did:example:nobody").is_empty());

        h.clock.advance(chrono::Duration::hours(25));
        assert!(h.coordinator.pending_requests().is_empty());
        let last = h.coordinator.requests_for(HOLDER).pop().unwrap();
        assert_eq!(last.status, RecoveryStatus::Expired);
        assert_eq!(
            h.coordinator.get_request(&open.request_id).unwrap().status,
            RecoveryStatus::Pending
        );
    }

    #[test]
    fn concurrent_initiates_one_winner() {
        let h = Arc::new(Harness::new(100));
        let b = h.backup(vec![seed_method(80)], RecoveryPolicy::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let h = Arc::clone(&h);
                let backup_id = b.backup_id.clone();
                std::thread::spawn(move || {
                    h.coordinator
                        .initiate(HOLDER, &backup_id, "lost", &format!("cust1r{i}"))
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| e.kind() == ErrorKind::Conflict));
    }
}
