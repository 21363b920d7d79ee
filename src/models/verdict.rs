//! Eligibility verdict model.

use serde::{Deserialize, Serialize};

/// Why a change was not auto-approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IneligibleReason {
    NotVerified,
    MergeConflict,
    NotRequestedReviewer,
    AlreadyApproved,
    HasNegativeReview,
    NotAllReviewed,
}

impl std::fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotVerified => write!(f, "not verified"),
            Self::MergeConflict => write!(f, "merge conflict"),
            Self::NotRequestedReviewer => write!(f, "not a requested reviewer"),
            Self::AlreadyApproved => write!(f, "already approved"),
            Self::HasNegativeReview => write!(f, "has negative review"),
            Self::NotAllReviewed => write!(f, "not all reviewed"),
        }
    }
}

/// The review the bot proposes to post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedApproval {
    /// Code-Review score to post.
    pub mark: i32,

    /// Review message.
    pub message: String,
}

/// Outcome of evaluating one change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityVerdict {
    /// Change identifier.
    pub id: String,

    /// Whether the change should be approved now.
    pub eligible: bool,

    /// Reasons the change was rejected; empty when eligible.
    pub reasons: Vec<IneligibleReason>,

    /// Review to post; present only when eligible.
    pub approval: Option<ProposedApproval>,

    /// Verified vote of the CI account, if one is configured and voted.
    pub verified: Option<i32>,
}

impl EligibilityVerdict {
    /// First (and deciding) rejection reason.
    pub fn reason(&self) -> Option<IneligibleReason> {
        self.reasons.first().copied()
    }
}
