use chrono::{DateTime, NaiveDateTime, Utc};
use db::models::{
    indexed_file_change::{FileChangeStatus, UpsertFileChange},
    indexed_pull_request::{PullRequestState, UpsertPullRequest},
};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Forge API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    #[error("Insufficient permissions: {0}")]
    Forbidden(String),
    #[error("Not found: {0}")]
    NotFound(String),
}

impl ForgeError {
    /// Transport errors, 5xx and 429 are worth another attempt.
    pub fn should_retry(&self) -> bool {
        match self {
            ForgeError::Http(err) => !err.is_builder() && !err.is_decode(),
            ForgeError::Api { status, .. } => *status >= 500 || *status == 429,
            ForgeError::AuthFailed(_) | ForgeError::Forbidden(_) | ForgeError::NotFound(_) => {
                false
            }
        }
    }

    /// Retry filter for requests that create something. Only failures where
    /// the server cannot have acted on the request are retried: no connection
    /// was made, or the request was rate limited.
    pub fn should_retry_write(&self) -> bool {
        match self {
            ForgeError::Http(err) => err.is_connect(),
            ForgeError::Api { status, .. } => *status == 429,
            _ => false,
        }
    }
}

/// `state` filter accepted by the pull request listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PullRequestStateFilter {
    Open,
    Closed,
    #[default]
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeUser {
    pub login: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryDetails {
    pub full_name: String,
    pub default_branch: String,
}

/// A git ref (branch/commit) in a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub sha: String,
}

/// Entry of the pull request listing; details are fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSummary {
    pub number: u64,
    pub title: String,
    pub state: PullRequestState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestDetails {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: PullRequestState,
    #[serde(default)]
    pub merged: bool,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub changed_files: i64,
    #[serde(default)]
    pub commits: i64,
    #[serde(default)]
    pub comments: i64,
    pub base: PullRequestRef,
    pub head: PullRequestRef,
    pub user: Option<ForgeUser>,
    pub html_url: String,
    pub patch_url: String,
    pub merge_commit_sha: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

impl PullRequestDetails {
    pub fn author(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.login.as_str())
    }

    /// Merge time when merged, creation time otherwise.
    pub fn reference_time(&self) -> NaiveDateTime {
        match (self.merged, self.merged_at) {
            (true, Some(merged_at)) => merged_at.naive_utc(),
            _ => self.created_at.naive_utc(),
        }
    }

    pub fn state_label(&self) -> &'static str {
        match (self.merged, self.state) {
            (true, _) => "Merged",
            (false, PullRequestState::Open) => "Open",
            (false, PullRequestState::Closed) => "Closed",
        }
    }

    pub fn to_upsert(&self) -> UpsertPullRequest {
        UpsertPullRequest {
            number: self.number as i64,
            title: self.title.clone(),
            body: self.body.clone(),
            state: self.state,
            merged: self.merged,
            additions: self.additions,
            deletions: self.deletions,
            changed_files: self.changed_files,
            commits: self.commits,
            comments: self.comments,
            base_ref: self.base.ref_name.clone(),
            head_ref: self.head.ref_name.clone(),
            author: self.author().map(str::to_string),
            html_url: self.html_url.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
            merged_at: self.merged_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestFile {
    pub filename: String,
    pub status: FileChangeStatus,
    #[serde(default)]
    pub additions: i64,
    #[serde(default)]
    pub deletions: i64,
    #[serde(default)]
    pub changes: i64,
    pub previous_filename: Option<String>,
    pub patch: Option<String>,
    pub sha: Option<String>,
}

impl PullRequestFile {
    pub fn to_upsert(&self) -> UpsertFileChange {
        UpsertFileChange {
            status: self.status,
            additions: self.additions,
            changes: self.changes,
            deletions: self.deletions,
            previous_path: self.previous_filename.clone(),
            patch: self.patch.clone(),
            blob_sha: self.sha.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreatePrRequest {
    pub title: String,
    pub body: String,
    /// `owner:branch` for cross-fork pull requests.
    pub head: String,
    pub base: String,
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub html_url: String,
}
