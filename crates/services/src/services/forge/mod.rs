mod github;
mod types;

use async_trait::async_trait;
use git::{ChangeIdentifier, RepositoryIdentifier};
pub use github::{GITHUB_API_BASE, GitHubClient};
pub use types::{
    CreatePrRequest, CreatedPullRequest, ForgeError, ForgeUser, PullRequestDetails,
    PullRequestFile, PullRequestRef, PullRequestStateFilter, PullRequestSummary,
    RepositoryDetails,
};

/// The slice of the hosting service's API a port or an indexing pass needs.
#[async_trait]
pub trait ForgeClient: Send + Sync {
    async fn get_pull_request(
        &self,
        change: &ChangeIdentifier,
    ) -> Result<PullRequestDetails, ForgeError>;

    /// Raw mailbox patch behind `PullRequestDetails::patch_url`.
    async fn download_patch(&self, patch_url: &str) -> Result<String, ForgeError>;

    async fn commit_parent_count(
        &self,
        repo: &RepositoryIdentifier,
        sha: &str,
    ) -> Result<usize, ForgeError>;

    async fn list_pull_request_files(
        &self,
        change: &ChangeIdentifier,
    ) -> Result<Vec<PullRequestFile>, ForgeError>;

    async fn create_pull_request(
        &self,
        repo: &RepositoryIdentifier,
        request: &CreatePrRequest,
    ) -> Result<CreatedPullRequest, ForgeError>;

    /// Comment on an issue or pull request of `repo`.
    async fn create_comment(
        &self,
        repo: &RepositoryIdentifier,
        number: u64,
        body: &str,
    ) -> Result<(), ForgeError>;

    async fn list_pull_requests(
        &self,
        repo: &RepositoryIdentifier,
        state: PullRequestStateFilter,
    ) -> Result<Vec<PullRequestSummary>, ForgeError>;

    async fn get_repository(
        &self,
        repo: &RepositoryIdentifier,
    ) -> Result<RepositoryDetails, ForgeError>;

    async fn authenticated_user(&self) -> Result<ForgeUser, ForgeError>;
}
