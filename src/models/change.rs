//! Change models.
//!
//! These are the domain shapes the decision engine works on. They are
//! decoupled from the Gerrit wire schema; the client converts into them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Timestamp format Gerrit uses for `created`/`updated` (UTC, nanoseconds).
const GERRIT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// A change as returned by the list query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    /// Change identifier (`project~branch~Change-Id`), unique per server.
    pub id: String,

    /// Project the change belongs to.
    pub project: String,

    /// Destination branch.
    pub branch: String,

    /// First line of the commit message.
    pub subject: String,

    /// Last-updated timestamp, compared verbatim between cycles.
    pub updated: String,

    /// Whether the change merges cleanly.
    pub mergeable: bool,

    /// Owner's username.
    pub owner: String,
}

/// One reviewer's vote on a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVote {
    /// Reviewer's username.
    pub reviewer: String,

    /// Signed score, normally in -2..=2.
    pub value: i32,
}

impl ReviewVote {
    pub fn new(reviewer: impl Into<String>, value: i32) -> Self {
        Self {
            reviewer: reviewer.into(),
            value,
        }
    }
}

/// Votes cast on a single label, in server order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelState {
    pub all: Vec<ReviewVote>,

    /// Value the server assumes for a reviewer who has not voted.
    pub default_value: i32,
}

impl LabelState {
    /// First vote cast by `reviewer`, if any.
    pub fn vote_of(&self, reviewer: &str) -> Option<i32> {
        self.all
            .iter()
            .find(|v| v.reviewer == reviewer)
            .map(|v| v.value)
    }
}

/// The labels the bot cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewLabelSet {
    pub verified: LabelState,
    pub code_review: LabelState,
}

/// A change with its full review detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDetail {
    pub id: String,
    pub project: String,
    pub branch: String,
    pub subject: String,
    pub updated: String,
    pub owner: String,
    pub mergeable: bool,
    pub labels: ReviewLabelSet,
}

impl ChangeDetail {
    /// Parse the `updated` field, if it is in Gerrit's timestamp format.
    pub fn updated_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.updated, GERRIT_TIMESTAMP_FORMAT).ok()
    }

    /// `updated` trimmed to minute precision for display.
    pub fn updated_short(&self) -> &str {
        self.updated.get(..16).unwrap_or(&self.updated)
    }
}

/// Sort details so the most recently updated change comes first.
///
/// Unparseable timestamps sort after parseable ones and fall back to
/// comparing the raw strings.
pub fn sort_recent_first(details: &mut [ChangeDetail]) {
    details.sort_by_key(|d| Reverse((d.updated_at(), d.updated.clone())));
}
