//! Message dispatch.
//!
//! [`MsgServer::deliver`] is the single entry point for signed input: it
//! checks the signature, runs `validate_basic`, checks the authority may
//! act, and hands off to the component. The typed handlers skip the
//! signature check and trust `authority` as given.
//!
//! | Message                  | Authority must be                       |
//! |--------------------------|-----------------------------------------|
//! | CreateBackup             | holder's controller                     |
//! | VerifyBackupIntegrity    | controller of the backup's holder       |
//! | AddGuardian              | holder's controller                     |
//! | SetGuardianThreshold     | holder's controller                     |
//! | InitiateRecovery         | anyone (recorded as the requester)      |
//! | SubmitProof              | the requester                           |
//! | SubmitGuardianVote       | the guardian's registered address       |
//! | ExecuteRecovery          | the requester                           |
//! | CancelRecovery           | the requester or the holder's controller |
//! | PrepareOfflineBundle     | holder's controller                     |

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::errors::{TxCode, TxError};
use super::messages::*;
use super::signing::SignedMsg;
use crate::clock::Clock;
use crate::crypto::codec::IntegrityCodec;
use crate::error::ErrorKind;
use crate::guardian::types::GuardianStatus;
use crate::identity::store::IdentityStore;
use crate::offline::builder::OfflinePackageBuilder;
use crate::recovery::coordinator::RecoveryCoordinator;
use crate::recovery::types::RecoveryStatus;

pub struct MsgServer {
    store: Arc<dyn IdentityStore>,
    coordinator: Arc<RecoveryCoordinator>,
    builder: Arc<OfflinePackageBuilder>,
    codec: IntegrityCodec,
    clock: Arc<dyn Clock>,
}

impl MsgServer {
    pub fn new(
        store: Arc<dyn IdentityStore>,
        coordinator: Arc<RecoveryCoordinator>,
        builder: Arc<OfflinePackageBuilder>,
        codec: IntegrityCodec,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            coordinator,
            builder,
            codec,
            clock,
        }
    }

    pub fn coordinator(&self) -> &Arc<RecoveryCoordinator> {
        &self.coordinator
    }

    /// Verify, validate, authorize, and execute a signed message.
    pub fn deliver(&self, tx: &SignedMsg<TxMsg>) -> Result<TxResponse, TxError> {
        let msg_type = tx.msg.type_url();
        let result = tx
            .verify(&self.codec)
            .and_then(|()| self.dispatch(&tx.msg));
        match &result {
            Ok(_) => info!(msg_type, authority = %tx.msg.authority(), "msg delivered"),
            Err(e) => warn!(
                msg_type,
                authority = %tx.msg.authority(),
                code = e.code,
                kind = %e.kind,
                error = %e.message,
                "msg rejected"
            ),
        }
        result
    }

    fn dispatch(&self, msg: &TxMsg) -> Result<TxResponse, TxError> {
        Ok(match msg {
            TxMsg::CreateBackup(m) => TxResponse::CreateBackup(self.create_backup(m)?),
            TxMsg::VerifyBackupIntegrity(m) => {
                TxResponse::VerifyBackupIntegrity(self.verify_backup_integrity(m)?)
            }
            TxMsg::AddGuardian(m) => TxResponse::AddGuardian(self.add_guardian(m)?),
            TxMsg::SetGuardianThreshold(m) => {
                TxResponse::SetGuardianThreshold(self.set_guardian_threshold(m)?)
            }
            TxMsg::InitiateRecovery(m) => TxResponse::InitiateRecovery(self.initiate_recovery(m)?),
            TxMsg::SubmitProof(m) => TxResponse::SubmitProof(self.submit_proof(m)?),
            TxMsg::SubmitGuardianVote(m) => {
                TxResponse::SubmitGuardianVote(self.submit_guardian_vote(m)?)
            }
            TxMsg::ExecuteRecovery(m) => TxResponse::ExecuteRecovery(self.execute_recovery(m)?),
            TxMsg::CancelRecovery(m) => TxResponse::CancelRecovery(self.cancel_recovery(m)?),
            TxMsg::PrepareOfflineBundle(m) => {
                TxResponse::PrepareOfflineBundle(self.prepare_offline_bundle(m)?)
            }
        })
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    pub fn create_backup(&self, msg: &MsgCreateBackup) -> Result<MsgCreateBackupResponse, TxError> {
        msg.validate_basic()?;
        self.require_controller(&msg.holder_did, &msg.authority)?;
        let key = decode_b64("encryption_key", &msg.encryption_key)?;
        let backup = self.coordinator.vault().create_backup(
            &msg.holder_did,
            msg.recovery_methods.clone(),
            &key,
            msg.retention_days,
            msg.policy,
        )?;
        Ok(MsgCreateBackupResponse {
            backup_id: backup.backup_id,
            version: backup.version,
            integrity_hash: backup.integrity_hash,
            created_at: backup.created_at,
            expires_at: backup.expires_at,
        })
    }

    pub fn verify_backup_integrity(
        &self,
        msg: &MsgVerifyBackupIntegrity,
    ) -> Result<MsgVerifyBackupIntegrityResponse, TxError> {
        msg.validate_basic()?;
        let vault = self.coordinator.vault();
        let backup = vault.get_backup(&msg.backup_id)?;
        self.require_controller(&backup.holder_did, &msg.authority)?;
        let key = msg
            .decryption_key
            .as_deref()
            .map(|k| decode_b64("decryption_key", k))
            .transpose()?;
        let result = vault.verify_integrity(&msg.backup_id, key.as_deref())?;
        Ok(MsgVerifyBackupIntegrityResponse {
            verification_id: format!("verification_{}", Uuid::new_v4().simple()),
            result,
        })
    }

    pub fn add_guardian(&self, msg: &MsgAddGuardian) -> Result<MsgAddGuardianResponse, TxError> {
        msg.validate_basic()?;
        self.require_controller(&msg.holder_did, &msg.authority)?;
        let guardian = self
            .coordinator
            .guardians()
            .add_guardian(&msg.holder_did, msg.guardian.clone())?;
        Ok(MsgAddGuardianResponse {
            guardian_id: guardian.guardian_id,
            added_at: guardian.added_at,
        })
    }

    pub fn set_guardian_threshold(
        &self,
        msg: &MsgSetGuardianThreshold,
    ) -> Result<MsgSetGuardianThresholdResponse, TxError> {
        msg.validate_basic()?;
        self.require_controller(&msg.holder_did, &msg.authority)?;
        let registry = self.coordinator.guardians();
        registry.set_quorum_threshold(&msg.holder_did, msg.threshold)?;
        let total_weight = registry
            .guardians_for(&msg.holder_did)
            .iter()
            .filter(|g| g.status == GuardianStatus::Active)
            .map(|g| u64::from(g.weight))
            .sum::<u64>();
        Ok(MsgSetGuardianThresholdResponse {
            threshold: msg.threshold,
            total_weight,
            updated_at: self.clock.now(),
        })
    }

    pub fn initiate_recovery(
        &self,
        msg: &MsgInitiateRecovery,
    ) -> Result<MsgInitiateRecoveryResponse, TxError> {
        msg.validate_basic()?;
        let request = self.coordinator.initiate(
            &msg.holder_did,
            &msg.backup_id,
            &msg.reason,
            &msg.authority,
        )?;
        Ok(MsgInitiateRecoveryResponse {
            request_id: request.request_id,
            required_score: request.required_score,
            expires_at: request.expires_at,
            max_attempts: request.max_attempts,
        })
    }

    pub fn submit_proof(&self, msg: &MsgSubmitProof) -> Result<MsgSubmitProofResponse, TxError> {
        msg.validate_basic()?;
        self.require_requester(&msg.request_id, &msg.authority)?;
        let proof = decode_b64("proof_data", &msg.proof_data)?;
        let attempt = self
            .coordinator
            .submit_proof(&msg.request_id, &msg.method_id, &proof)?;
        let request = self.coordinator.get_request(&msg.request_id)?;
        Ok(MsgSubmitProofResponse {
            attempt_id: attempt.attempt_id,
            status: attempt.status,
            confidence: attempt.confidence,
            current_score: request.confidence_score,
            required_score: request.required_score,
            request_status: request.status,
            can_attempt_more: request.status == RecoveryStatus::Pending
                && request.attempts_remaining() > 0,
        })
    }

    pub fn submit_guardian_vote(
        &self,
        msg: &MsgSubmitGuardianVote,
    ) -> Result<MsgSubmitGuardianVoteResponse, TxError> {
        msg.validate_basic()?;
        let guardian = self
            .coordinator
            .guardians()
            .get_guardian(&msg.guardian_id)
            .ok_or_else(|| {
                TxError::new(
                    TxCode::GuardianNotFound,
                    ErrorKind::NotFound,
                    format!("guardian not found: {}", msg.guardian_id),
                )
            })?;
        if guardian.address != msg.authority {
            return Err(TxError::unauthorized(format!(
                "{} does not vote for guardian {}",
                msg.authority, msg.guardian_id
            )));
        }
        let outcome = self.coordinator.submit_guardian_vote(
            &msg.request_id,
            &msg.guardian_id,
            msg.vote,
            &msg.signature,
        )?;
        Ok(MsgSubmitGuardianVoteResponse {
            vote_id: outcome.vote.vote_id,
            voted_at: outcome.vote.cast_at,
            weight: outcome.vote.weight,
            approve_weight: outcome.tally.approve_weight,
            required_weight: outcome.tally.threshold,
            quorum_reached: outcome.tally.quorum_reached,
            request_status: outcome.request.status,
        })
    }

    pub fn execute_recovery(
        &self,
        msg: &MsgExecuteRecovery,
    ) -> Result<MsgExecuteRecoveryResponse, TxError> {
        msg.validate_basic()?;
        self.require_requester(&msg.request_id, &msg.authority)?;
        let key = decode_b64("decryption_key", &msg.decryption_key)?;
        let request = self
            .coordinator
            .execute(&msg.request_id, &msg.new_controller, &key)?;
        Ok(MsgExecuteRecoveryResponse {
            recovered_at: request.completed_at.unwrap_or_else(|| self.clock.now()),
            new_controller: msg.new_controller.clone(),
            data_restored: request.status == RecoveryStatus::Completed,
        })
    }

    pub fn cancel_recovery(
        &self,
        msg: &MsgCancelRecovery,
    ) -> Result<MsgCancelRecoveryResponse, TxError> {
        msg.validate_basic()?;
        let request = self.coordinator.get_request(&msg.request_id)?;
        // The coordinator knows holders by DID, accounts by address.
        let by = if self.controller_of(&request.holder_did)? == msg.authority {
            request.holder_did.as_str()
        } else {
            msg.authority.as_str()
        };
        let cancelled = self.coordinator.cancel(&msg.request_id, by)?;
        Ok(MsgCancelRecoveryResponse {
            request_id: cancelled.request_id,
            cancelled_at: cancelled.completed_at.unwrap_or_else(|| self.clock.now()),
        })
    }

    pub fn prepare_offline_bundle(
        &self,
        msg: &MsgPrepareOfflineBundle,
    ) -> Result<MsgPrepareOfflineBundleResponse, TxError> {
        msg.validate_basic()?;
        self.require_controller(&msg.request.did, &msg.authority)?;
        let (bundle, bytes) = self.builder.build_encoded(&msg.request)?;
        Ok(MsgPrepareOfflineBundleResponse {
            did: bundle.did,
            format: bundle.format,
            data_hash: bundle.data_hash,
            issued_at: bundle.issued_at,
            expires_at: bundle.expires_at,
            credential_count: bundle.credentials.len(),
            bundle: encode_b64(&bytes),
        })
    }

    // -----------------------------------------------------------------------
    // Authority
    // -----------------------------------------------------------------------

    fn controller_of(&self, holder_did: &str) -> Result<String, TxError> {
        self.store
            .identity(holder_did)?
            .map(|record| record.controller)
            .ok_or_else(|| {
                TxError::new(
                    TxCode::IdentityNotFound,
                    ErrorKind::NotFound,
                    format!("no identity on record for {holder_did}"),
                )
            })
    }

    fn require_controller(&self, holder_did: &str, authority: &str) -> Result<(), TxError> {
        if self.controller_of(holder_did)? != authority {
            return Err(TxError::unauthorized(format!(
                "{authority} does not control {holder_did}"
            )));
        }
        Ok(())
    }

    fn require_requester(&self, request_id: &str, authority: &str) -> Result<(), TxError> {
        let request = self.coordinator.get_request(request_id)?;
        if request.requested_by != authority {
            return Err(TxError::unauthorized(format!(
                "{authority} did not open recovery request {request_id}"
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MsgServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MsgServer")
            .field("issuer", &self.builder.issuer_did())
            .finish_non_exhaustive()
    }
}
