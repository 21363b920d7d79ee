//! Data models for the bot.
//!
//! These models are the domain view of Gerrit changes and of the decisions
//! the bot takes about them. Wire-format structs live next to the client in
//! `services::gerrit_client`.

pub mod change;
pub mod verdict;

// Re-exports for convenient access
pub use change::{
    sort_recent_first, ChangeDetail, ChangeSummary, LabelState, ReviewLabelSet, ReviewVote,
};
pub use verdict::{EligibilityVerdict, IneligibleReason, ProposedApproval};
