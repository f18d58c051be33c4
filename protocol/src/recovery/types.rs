//! Recovery request state and the scoring rules that drive it.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::backup::types::{CombinationPolicy, RecoveryMethod};
use crate::config::MAX_CONFIDENCE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecoveryStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Completed,
    Failed,
}

impl RecoveryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RecoveryStatus::Rejected
                | RecoveryStatus::Expired
                | RecoveryStatus::Completed
                | RecoveryStatus::Failed
        )
    }

    /// Still holding the backup's `Recovering` flag.
    pub fn is_open(&self) -> bool {
        matches!(self, RecoveryStatus::Pending | RecoveryStatus::Approved)
    }
}

impl fmt::Display for RecoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RecoveryStatus::Pending => "pending",
            RecoveryStatus::Approved => "approved",
            RecoveryStatus::Rejected => "rejected",
            RecoveryStatus::Expired => "expired",
            RecoveryStatus::Completed => "completed",
            RecoveryStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttemptStatus {
    Pending,
    Verified,
    Failed,
    Expired,
}

/// One proof submission. Scored on arrival and never touched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub attempt_id: String,
    pub method_id: String,
    #[serde(with = "hex::serde")]
    pub proof_data: Vec<u8>,
    pub attempted_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub confidence: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub request_id: String,
    pub holder_did: String,
    pub backup_id: String,
    pub requested_by: String,
    pub reason: String,
    pub attempts: Vec<RecoveryAttempt>,
    pub required_score: u8,
    pub confidence_score: u8,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub combination: CombinationPolicy,
    /// Guardian quorum weight as of initiation. Zero when the backup has no
    /// guardian-based method.
    pub quorum_threshold: u32,
    /// Enabled methods of the backup as of initiation.
    pub method_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: RecoveryStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub new_controller: Option<String>,
}

impl RecoveryRequest {
    /// Only `Pending` requests expire; an approval is not taken back by the
    /// clock.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == RecoveryStatus::Pending && now > self.expires_at
    }

    /// Stored status with lazy expiry applied.
    pub fn effective_status(&self, now: DateTime<Utc>) -> RecoveryStatus {
        if self.is_expired(now) {
            RecoveryStatus::Expired
        } else {
            self.status
        }
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }

    pub fn includes_method(&self, method_id: &str) -> bool {
        self.method_ids.iter().any(|m| m == method_id)
    }
}

/// Score the evidence gathered so far under `policy`.
///
/// `methods` is the request's method snapshot. Each method contributes its
/// best verified attempt; guardian-based methods contribute 100 once quorum
/// is reached and nothing before.
pub fn combined_confidence(
    policy: CombinationPolicy,
    methods: &[&RecoveryMethod],
    attempts: &[RecoveryAttempt],
    quorum_reached: bool,
) -> u8 {
    let mut best: BTreeMap<&str, u8> = BTreeMap::new();
    for attempt in attempts
        .iter()
        .filter(|a| a.status == AttemptStatus::Verified)
    {
        let slot = best.entry(attempt.method_id.as_str()).or_insert(0);
        *slot = (*slot).max(attempt.confidence);
    }
    if quorum_reached {
        for method in methods.iter().filter(|m| m.method_type.is_guardian_based()) {
            best.insert(method.method_id.as_str(), MAX_CONFIDENCE);
        }
    }

    let per_method = methods
        .iter()
        .map(|m| best.get(m.method_id.as_str()).copied().unwrap_or(0));

    match policy {
        CombinationPolicy::Maximum => per_method.max().unwrap_or(0),
        CombinationPolicy::Additive => {
            let sum: u32 = per_method.map(u32::from).sum();
            sum.min(u32::from(MAX_CONFIDENCE)) as u8
        }
        CombinationPolicy::RequireAll => per_method.min().unwrap_or(0),
    }
}
