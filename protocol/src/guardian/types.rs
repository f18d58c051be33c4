//! Guardian records, votes, and the pure tally.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GuardianStatus {
    Active,
    Inactive,
    Suspended,
    Revoked,
}

impl fmt::Display for GuardianStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GuardianStatus::Active => "active",
            GuardianStatus::Inactive => "inactive",
            GuardianStatus::Suspended => "suspended",
            GuardianStatus::Revoked => "revoked",
        })
    }
}

/// A third party trusted to vouch for a holder during social recovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialRecoveryGuardian {
    pub guardian_id: String,
    pub holder_did: String,
    pub guardian_did: String,
    /// Account address the guardian votes from.
    pub address: String,
    pub name: String,
    pub weight: u32,
    /// Hex Ed25519 key that signs this guardian's votes.
    pub public_key: String,
    pub status: GuardianStatus,
    pub added_at: DateTime<Utc>,
}

/// What a holder supplies to enroll a guardian.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianEnrollment {
    pub guardian_did: String,
    pub address: String,
    pub name: String,
    pub weight: u32,
    pub public_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            VoteChoice::Approve => "approve",
            VoteChoice::Reject => "reject",
            VoteChoice::Abstain => "abstain",
        })
    }
}

/// The exact tuple a guardian signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VotePayload<'a> {
    pub request_id: &'a str,
    pub guardian_id: &'a str,
    pub vote: VoteChoice,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianVote {
    pub vote_id: String,
    pub request_id: String,
    pub guardian_id: String,
    pub vote: VoteChoice,
    /// Hex signature over [`VotePayload`].
    pub signature: String,
    /// Guardian weight at the moment the vote was cast.
    pub weight: u32,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub approve_weight: u64,
    pub reject_weight: u64,
    pub abstain_weight: u64,
    pub threshold: u32,
    pub quorum_reached: bool,
}

impl VoteTally {
    /// Enough weight has said no that approval is off the table.
    pub fn rejected(&self) -> bool {
        self.threshold > 0 && self.reject_weight >= u64::from(self.threshold)
    }
}

/// Sum vote weights by outcome. Only the first vote per guardian counts,
/// and a zero threshold never reaches quorum.
pub fn tally(votes: &[GuardianVote], threshold: u32) -> VoteTally {
    let mut seen = HashSet::new();
    let mut out = VoteTally {
        threshold,
        ..VoteTally::default()
    };
    for vote in votes {
        if !seen.insert(vote.guardian_id.as_str()) {
            continue;
        }
        let w = u64::from(vote.weight);
        match vote.vote {
            VoteChoice::Approve => out.approve_weight += w,
            VoteChoice::Reject => out.reject_weight += w,
            VoteChoice::Abstain => out.abstain_weight += w,
        }
    }
    out.quorum_reached = threshold > 0 && out.approve_weight >= u64::from(threshold);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vote(guardian: &str, choice: VoteChoice, weight: u32) -> GuardianVote {
        GuardianVote {
            vote_id: format!("vote-{guardian}"),
            request_id: "req".into(),
            guardian_id: guardian.into(),
            vote: choice,
            signature: String::new(),
            weight,
            cast_at: Utc::now(),
        }
    }

    #[test]
    fn approve_approve_abstain_reaches_quorum() {
        let votes = [
            vote("g1", VoteChoice::Approve, 40),
            vote("g2", VoteChoice::Approve, 35),
            vote("g3", VoteChoice::Abstain, 25),
        ];
        let t = tally(&votes, 60);
        assert_eq!(t.approve_weight, 75);
        assert_eq!(t.abstain_weight, 25);
        assert!(t.quorum_reached);
    }

    #[test]
    fn approve_reject_abstain_falls_short() {
        let votes = [
            vote("g1", VoteChoice::Approve, 40),
            vote("g2", VoteChoice::Reject, 35),
            vote("g3", VoteChoice::Abstain, 25),
        ];
        let t = tally(&votes, 60);
        assert_eq!(t.approve_weight, 40);
        assert_eq!(t.reject_weight, 35);
        assert!(!t.quorum_reached);
        assert!(!t.rejected());
    }

    #[test]
    fn only_first_vote_per_guardian_counts() {
        let votes = [
            vote("g1", VoteChoice::Reject, 40),
            vote("g1", VoteChoice::Approve, 40),
            vote("g1", VoteChoice::Approve, 40),
        ];
        let t = tally(&votes, 40);
        assert_eq!(t.approve_weight, 0);
        assert_eq!(t.reject_weight, 40);
        assert!(t.rejected());
    }

    #[test]
    fn zero_threshold_never_passes() {
        let t = tally(&[vote("g1", VoteChoice::Approve, 10)], 0);
        assert!(!t.quorum_reached);
        assert!(!t.rejected());
    }
}
