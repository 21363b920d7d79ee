//! Gerrit REST API client.
//!
//! Provides an authenticated HTTP client for the `/a/` endpoints of the
//! Gerrit REST API and converts its wire schema into domain models.

use crate::error::AppError;
use crate::models::{ChangeDetail, ChangeSummary, LabelState, ReviewLabelSet, ReviewVote};
use crate::services::review_service::{ReviewReply, ReviewService};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Anti-XSSI prefix Gerrit prepends to every JSON response.
const XSSI_PREFIX: &str = ")]}'";

/// Label carrying the CI verification vote.
pub const LABEL_VERIFIED: &str = "Verified";

/// Label carrying the code review vote.
pub const LABEL_CODE_REVIEW: &str = "Code-Review";

/// Gerrit client configuration.
#[derive(Debug, Clone)]
pub struct GerritClientConfig {
    /// Base URL of the Gerrit server (e.g., `https://review.example.com`).
    pub base_url: String,

    /// Account username.
    pub user: String,

    /// HTTP password (Settings > HTTP Credentials in the Gerrit UI).
    pub password: String,

    /// Request timeout.
    pub timeout: Duration,
}

impl Default for GerritClientConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            user: String::new(),
            password: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Gerrit REST client.
#[derive(Debug, Clone)]
pub struct GerritClient {
    client: Client,
    config: GerritClientConfig,
}

/// Account as embedded in change and label info.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GerritAccount {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(rename = "_account_id", default)]
    pub account_id: Option<u64>,
    /// Vote, present only inside a label's `all` list.
    #[serde(default)]
    pub value: Option<i32>,
}

impl GerritAccount {
    /// Username, or `#<account id>` for accounts without one.
    ///
    /// `#` cannot occur in a Gerrit username, so the fallback never collides.
    fn identity(&self) -> String {
        match (&self.username, self.account_id) {
            (Some(username), _) if !username.is_empty() => username.clone(),
            (_, Some(id)) => format!("#{}", id),
            _ => String::new(),
        }
    }
}

/// Detailed label info (`DETAILED_LABELS`).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GerritLabelInfo {
    #[serde(default)]
    pub approved: Option<GerritAccount>,
    #[serde(default)]
    pub all: Vec<GerritAccount>,
    #[serde(default)]
    pub values: HashMap<String, String>,
    #[serde(default)]
    pub default_value: i32,
}

impl From<&GerritLabelInfo> for LabelState {
    fn from(info: &GerritLabelInfo) -> Self {
        LabelState {
            all: info
                .all
                .iter()
                .map(|a| ReviewVote::new(a.identity(), a.value.unwrap_or(0)))
                .collect(),
            default_value: info.default_value,
        }
    }
}

/// ChangeInfo entity, as returned by both the list and the detail endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GerritChangeInfo {
    pub id: String,
    pub project: String,
    pub branch: String,
    #[serde(default)]
    pub change_id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created: String,
    pub updated: String,
    /// Omitted by the server when mergeability is unknown.
    #[serde(default)]
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub owner: GerritAccount,
    #[serde(default)]
    pub labels: HashMap<String, GerritLabelInfo>,
}

impl GerritChangeInfo {
    fn label(&self, name: &str) -> Option<&GerritLabelInfo> {
        self.labels.get(name).or_else(|| {
            self.labels
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
    }
}

impl From<GerritChangeInfo> for ChangeSummary {
    fn from(info: GerritChangeInfo) -> Self {
        ChangeSummary {
            owner: info.owner.identity(),
            mergeable: info.mergeable.unwrap_or(false),
            id: info.id,
            project: info.project,
            branch: info.branch,
            subject: info.subject,
            updated: info.updated,
        }
    }
}

impl From<GerritChangeInfo> for ChangeDetail {
    fn from(info: GerritChangeInfo) -> Self {
        let labels = ReviewLabelSet {
            verified: info.label(LABEL_VERIFIED).map(LabelState::from).unwrap_or_default(),
            code_review: info
                .label(LABEL_CODE_REVIEW)
                .map(LabelState::from)
                .unwrap_or_default(),
        };
        ChangeDetail {
            owner: info.owner.identity(),
            mergeable: info.mergeable.unwrap_or(false),
            id: info.id,
            project: info.project,
            branch: info.branch,
            subject: info.subject,
            updated: info.updated,
            labels,
        }
    }
}

/// ReviewInput body for `POST .../review`.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewInput {
    pub message: String,
    pub labels: HashMap<String, i32>,
}

/// ReviewResult returned by `POST .../review`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReviewResult {
    #[serde(default)]
    pub labels: HashMap<String, i32>,
}

/// Remove Gerrit's `)]}'` guard line, if present.
pub fn strip_xssi_prefix(body: &str) -> &str {
    match body.strip_prefix(XSSI_PREFIX) {
        Some(rest) => rest.trim_start_matches(['\r', '\n']),
        None => body,
    }
}

/// Build the `q=` value for a change query.
///
/// Terms are separated by `+`; a project restriction is appended as `p:`.
pub fn build_query(query: &str, project: Option<&str>) -> String {
    let mut terms: Vec<String> = query
        .split_whitespace()
        .map(|t| urlencoding::encode(t).into_owned())
        .collect();
    if let Some(project) = project {
        terms.push(format!("p:{}", urlencoding::encode(project)));
    }
    terms.join("+")
}

impl GerritClient {
    /// Create a new Gerrit client.
    pub fn new(config: GerritClientConfig) -> Result<Self, AppError> {
        if config.user.is_empty() {
            return Err(AppError::authentication("Missing Gerrit username"));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Full URL for an authenticated endpoint.
    fn api_url(&self, path: &str) -> String {
        format!("{}/a{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.basic_auth(&self.config.user, Some(&self.config.password))
    }

    /// Handle API response errors and decode the JSON body.
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
        endpoint: &str,
    ) -> Result<T, AppError> {
        let status = response.status();

        if status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| AppError::network(format!("Failed to read response: {}", e)))?;
            serde_json::from_str(strip_xssi_prefix(&body)).map_err(|e| {
                AppError::decode(format!("Failed to parse response from {}: {}", endpoint, e))
            })
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(AppError::authentication(format!(
                "Gerrit rejected credentials ({}) for {}",
                status.as_u16(),
                endpoint
            )))
        } else if status == StatusCode::NOT_FOUND {
            Err(AppError::not_found_with_id("Gerrit resource", endpoint))
        } else {
            // Gerrit returns plain-text error bodies
            let body = response.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                format!("Request failed ({})", status)
            } else {
                body.trim().to_string()
            };
            Err(AppError::gerrit_api_full(message, status.as_u16(), endpoint))
        }
    }

    /// List changes matching a query.
    pub async fn list_changes(
        &self,
        query: &str,
        project: Option<&str>,
    ) -> Result<Vec<GerritChangeInfo>, AppError> {
        let endpoint = format!("/changes/?q={}", build_query(query, project));
        let url = self.api_url(&endpoint);
        let response = self.authed(self.client.get(&url)).send().await?;
        self.handle_response(response, &endpoint).await
    }

    /// Get a change with detailed labels.
    pub async fn get_change_detail(&self, id: &str) -> Result<GerritChangeInfo, AppError> {
        let endpoint = format!("/changes/{}/detail", urlencoding::encode(id));
        let url = self.api_url(&endpoint);
        let response = self.authed(self.client.get(&url)).send().await?;
        self.handle_response(response, &endpoint).await
    }

    /// Post a Code-Review vote on the current revision.
    pub async fn set_review(
        &self,
        id: &str,
        message: &str,
        mark: i32,
    ) -> Result<ReviewResult, AppError> {
        let endpoint = format!(
            "/changes/{}/revisions/current/review",
            urlencoding::encode(id)
        );
        let url = self.api_url(&endpoint);
        let body = ReviewInput {
            message: message.to_string(),
            labels: HashMap::from([(LABEL_CODE_REVIEW.to_string(), mark)]),
        };
        let response = self
            .authed(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        self.handle_response(response, &endpoint).await
    }
}

#[async_trait]
impl ReviewService for GerritClient {
    async fn query_changes(
        &self,
        query: &str,
        project: Option<&str>,
    ) -> Result<Vec<ChangeSummary>, AppError> {
        let changes = self.list_changes(query, project).await?;
        Ok(changes.into_iter().map(ChangeSummary::from).collect())
    }

    async fn fetch_detail(&self, id: &str) -> Result<ChangeDetail, AppError> {
        self.get_change_detail(id).await.map(ChangeDetail::from)
    }

    async fn post_review(
        &self,
        id: &str,
        message: &str,
        mark: i32,
    ) -> Result<ReviewReply, AppError> {
        let result = self.set_review(id, message, mark).await?;
        Ok(ReviewReply {
            code_review: result.labels.get(LABEL_CODE_REVIEW).copied(),
        })
    }
}
