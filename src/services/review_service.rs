//! Review service boundary.
//!
//! The poll loop only talks to Gerrit through this trait, so the decision
//! engine can be driven by an in-memory fake in tests.

use crate::error::AppError;
use crate::models::{ChangeDetail, ChangeSummary};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Reply to a posted review.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReply {
    /// Code-Review score the server recorded, if it echoed one back.
    pub code_review: Option<i32>,
}

/// Operations the bot needs from the review server.
///
/// Each call is atomic from the caller's point of view: it either succeeds
/// or returns an error. Retries, authentication and response envelopes are
/// the implementor's concern.
#[async_trait]
pub trait ReviewService: Send + Sync {
    /// Run a change query, optionally restricted to one project.
    async fn query_changes(
        &self,
        query: &str,
        project: Option<&str>,
    ) -> Result<Vec<ChangeSummary>, AppError>;

    /// Fetch the full detail of one change.
    async fn fetch_detail(&self, id: &str) -> Result<ChangeDetail, AppError>;

    /// Post a Code-Review vote with a message on the current revision.
    async fn post_review(&self, id: &str, message: &str, mark: i32)
        -> Result<ReviewReply, AppError>;
}
