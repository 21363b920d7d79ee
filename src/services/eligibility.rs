//! Auto-approval eligibility rules.
//!
//! A change is evaluated against [`RULES`] in order; the first failing rule
//! decides the verdict and nothing after it runs. Each rule is a plain
//! function so it can be tested on its own.

use crate::config::DEFAULT_APPROVAL_MESSAGE;
use crate::models::{ChangeDetail, EligibilityVerdict, IneligibleReason, ProposedApproval};
use std::cell::OnceCell;

/// Code-Review score the bot posts.
pub const APPROVAL_MARK: i32 = 2;

/// Verified score the CI account must have given.
const CI_VERIFIED_MARK: i32 = 1;

/// Outcome of a single rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Pass,
    Fail(IneligibleReason),
}

/// A named eligibility rule.
pub struct Rule {
    pub name: &'static str,
    pub check: fn(&RuleInput<'_>) -> RuleOutcome,
}

/// Evaluation order. Changing it changes which reason gets reported.
pub const RULES: &[Rule] = &[
    Rule { name: "ci_verified", check: check_ci_verified },
    Rule { name: "mergeable", check: check_mergeable },
    Rule { name: "requested_reviewer", check: check_requested_reviewer },
    Rule { name: "not_already_approved", check: check_not_already_approved },
    Rule { name: "no_negative_review", check: check_no_negative_review },
    Rule { name: "all_reviewed", check: check_all_reviewed },
];

/// Aggregate of one pass over the Code-Review votes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewScan {
    /// The bot's own account is listed as a reviewer.
    pub is_reviewer: bool,
    /// The bot's own account already voted +2.
    pub already_approved: bool,
    /// Somebody voted -1 or -2.
    pub has_negative: bool,
    /// Every listed reviewer has a satisfying vote.
    pub all_reviewed: bool,
}

/// Everything a rule may look at.
pub struct RuleInput<'a> {
    pub detail: &'a ChangeDetail,
    pub self_identity: &'a str,
    pub ci_identity: &'a str,
    scan: OnceCell<ReviewScan>,
}

impl<'a> RuleInput<'a> {
    pub fn new(detail: &'a ChangeDetail, self_identity: &'a str, ci_identity: &'a str) -> Self {
        Self {
            detail,
            self_identity,
            ci_identity,
            scan: OnceCell::new(),
        }
    }

    /// Code-Review scan, computed on first use.
    pub fn scan(&self) -> &ReviewScan {
        self.scan.get_or_init(|| scan_code_review(self))
    }

    /// The CI account's Verified vote, if CI gating is configured.
    pub fn ci_vote(&self) -> Option<i32> {
        if self.ci_identity.is_empty() {
            return None;
        }
        self.detail.labels.verified.vote_of(self.ci_identity)
    }
}

fn scan_code_review(input: &RuleInput<'_>) -> ReviewScan {
    let mut scan = ReviewScan {
        all_reviewed: true,
        ..Default::default()
    };

    for vote in &input.detail.labels.code_review.all {
        let is_self = vote.reviewer == input.self_identity;
        if is_self {
            scan.is_reviewer = true;
            if vote.value == APPROVAL_MARK {
                scan.already_approved = true;
            }
        }

        match vote.value {
            -2 | -1 => {
                scan.has_negative = true;
                scan.all_reviewed = false;
            }
            0 => {
                let owner = &input.detail.owner;
                let exempt = (!owner.is_empty() && vote.reviewer == *owner)
                    || (!input.ci_identity.is_empty() && vote.reviewer == input.ci_identity);
                if !exempt {
                    scan.all_reviewed = false;
                }
            }
            // +1, +2 and anything unexpected count as positive
            _ => {}
        }
    }

    scan
}

pub fn check_ci_verified(input: &RuleInput<'_>) -> RuleOutcome {
    match input.ci_vote() {
        Some(CI_VERIFIED_MARK) => RuleOutcome::Pass,
        _ => RuleOutcome::Fail(IneligibleReason::NotVerified),
    }
}

pub fn check_mergeable(input: &RuleInput<'_>) -> RuleOutcome {
    if input.detail.mergeable {
        RuleOutcome::Pass
    } else {
        RuleOutcome::Fail(IneligibleReason::MergeConflict)
    }
}

pub fn check_requested_reviewer(input: &RuleInput<'_>) -> RuleOutcome {
    if input.scan().is_reviewer {
        RuleOutcome::Pass
    } else {
        RuleOutcome::Fail(IneligibleReason::NotRequestedReviewer)
    }
}

pub fn check_not_already_approved(input: &RuleInput<'_>) -> RuleOutcome {
    if input.scan().already_approved {
        RuleOutcome::Fail(IneligibleReason::AlreadyApproved)
    } else {
        RuleOutcome::Pass
    }
}

pub fn check_no_negative_review(input: &RuleInput<'_>) -> RuleOutcome {
    if input.scan().has_negative {
        RuleOutcome::Fail(IneligibleReason::HasNegativeReview)
    } else {
        RuleOutcome::Pass
    }
}

pub fn check_all_reviewed(input: &RuleInput<'_>) -> RuleOutcome {
    if input.scan().all_reviewed {
        RuleOutcome::Pass
    } else {
        RuleOutcome::Fail(IneligibleReason::NotAllReviewed)
    }
}

/// Evaluates changes on behalf of one bot account.
#[derive(Debug, Clone)]
pub struct EligibilityEvaluator {
    self_identity: String,
    ci_identity: String,
    approval_message: String,
}

impl EligibilityEvaluator {
    pub fn new(
        self_identity: impl Into<String>,
        ci_identity: impl Into<String>,
        approval_message: impl Into<String>,
    ) -> Self {
        Self {
            self_identity: self_identity.into(),
            ci_identity: ci_identity.into(),
            approval_message: approval_message.into(),
        }
    }

    /// Decide whether `detail` should be approved now.
    pub fn evaluate(&self, detail: &ChangeDetail) -> EligibilityVerdict {
        let input = RuleInput::new(detail, &self.self_identity, &self.ci_identity);
        let verified = input.ci_vote();

        for rule in RULES {
            if let RuleOutcome::Fail(reason) = (rule.check)(&input) {
                log::debug!("[poll] {}: rule {} failed: {}", detail.id, rule.name, reason);
                return EligibilityVerdict {
                    id: detail.id.clone(),
                    eligible: false,
                    reasons: vec![reason],
                    approval: None,
                    verified,
                };
            }
        }

        EligibilityVerdict {
            id: detail.id.clone(),
            eligible: true,
            reasons: Vec::new(),
            approval: Some(ProposedApproval {
                mark: APPROVAL_MARK,
                message: self.approval_message.clone(),
            }),
            verified,
        }
    }
}

/// Evaluate with the default approval message.
pub fn evaluate(detail: &ChangeDetail, self_identity: &str, ci_identity: &str) -> EligibilityVerdict {
    EligibilityEvaluator::new(self_identity, ci_identity, DEFAULT_APPROVAL_MESSAGE).evaluate(detail)
}
