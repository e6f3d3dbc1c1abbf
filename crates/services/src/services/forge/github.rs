//! GitHub REST implementation of [`ForgeClient`].

use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use git::{ChangeIdentifier, RepositoryIdentifier};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{
    Deserialize, Serialize,
    de::{DeserializeOwned, IgnoredAny},
};
use tracing::{debug, info};

use super::{
    ForgeClient,
    types::{
        CreatePrRequest, CreatedPullRequest, ForgeError, ForgeUser, PullRequestDetails,
        PullRequestFile, PullRequestStateFilter, PullRequestSummary, RepositoryDetails,
    },
};

const USER_AGENT: &str = "autoport/0.1";
pub const GITHUB_API_BASE: &str = "https://api.github.com";
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct CommitResponse {
    parents: Vec<IgnoredAny>,
}

#[derive(Debug, Serialize)]
struct CommentRequest<'a> {
    body: &'a str,
}

#[derive(Clone)]
pub struct GitHubClient {
    client: Client,
    api_base: String,
    token: SecretString,
}

impl GitHubClient {
    pub fn new(token: SecretString) -> Result<Self, ForgeError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            api_base: GITHUB_API_BASE.to_string(),
            token,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn repo_url(&self, repo: &RepositoryIdentifier, tail: &str) -> String {
        format!(
            "{}/repos/{}/{}{}",
            self.api_base,
            repo.org(),
            repo.name(),
            tail
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .header(
                "Authorization",
                format!("Bearer {}", self.token.expose_secret()),
            )
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT)
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ForgeError> {
        (|| async {
            debug!(url, "GitHub GET");
            let response = self.request(Method::GET, url).query(query).send().await?;
            let response = error_for_status(response).await?;
            Ok::<T, ForgeError>(response.json::<T>().await?)
        })
        .retry(retry_policy())
        .when(|e: &ForgeError| e.should_retry())
        .notify(notify_retry)
        .await
    }

    /// Walk `per_page=100` pages until a short page comes back.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>, ForgeError> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let mut page_query = query.to_vec();
            page_query.push(("per_page", PAGE_SIZE.to_string()));
            page_query.push(("page", page.to_string()));

            let items: Vec<T> = self.get_json(url, &page_query).await?;
            let count = items.len();
            all.extend(items);

            if count < PAGE_SIZE {
                break;
            }
            page += 1;
        }

        Ok(all)
    }

    /// POST that creates a resource. Retried only while the server cannot
    /// have acted on it, so a retry never creates a duplicate.
    async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, ForgeError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        (|| async {
            debug!(url, "GitHub POST");
            let response = self.request(Method::POST, url).json(body).send().await?;
            let response = error_for_status(response).await?;
            Ok::<T, ForgeError>(response.json::<T>().await?)
        })
        .retry(retry_policy())
        .when(|e: &ForgeError| e.should_retry_write())
        .notify(notify_retry)
        .await
    }
}

fn retry_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(30))
        .with_max_times(3)
        .with_jitter()
}

fn notify_retry(err: &ForgeError, dur: Duration) {
    tracing::warn!(
        "GitHub API call failed, retrying after {:.2}s: {}",
        dur.as_secs_f64(),
        err
    );
}

async fn error_for_status(response: Response) -> Result<Response, ForgeError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED => ForgeError::AuthFailed(message),
        StatusCode::FORBIDDEN => ForgeError::Forbidden(message),
        StatusCode::NOT_FOUND => ForgeError::NotFound(message),
        _ => ForgeError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl ForgeClient for GitHubClient {
    async fn get_pull_request(
        &self,
        change: &ChangeIdentifier,
    ) -> Result<PullRequestDetails, ForgeError> {
        let url = self.repo_url(change.repository(), &format!("/pulls/{}", change.number()));
        self.get_json(&url, &[]).await
    }

    async fn download_patch(&self, patch_url: &str) -> Result<String, ForgeError> {
        (|| async {
            debug!(patch_url, "Downloading patch");
            let response = self
                .client
                .get(patch_url)
                .header(
                    "Authorization",
                    format!("Bearer {}", self.token.expose_secret()),
                )
                .header("User-Agent", USER_AGENT)
                .send()
                .await?;
            let response = error_for_status(response).await?;
            Ok::<String, ForgeError>(response.text().await?)
        })
        .retry(retry_policy())
        .when(|e: &ForgeError| e.should_retry())
        .notify(notify_retry)
        .await
    }

    async fn commit_parent_count(
        &self,
        repo: &RepositoryIdentifier,
        sha: &str,
    ) -> Result<usize, ForgeError> {
        let url = self.repo_url(repo, &format!("/commits/{sha}"));
        let commit: CommitResponse = self.get_json(&url, &[]).await?;
        Ok(commit.parents.len())
    }

    async fn list_pull_request_files(
        &self,
        change: &ChangeIdentifier,
    ) -> Result<Vec<PullRequestFile>, ForgeError> {
        let url = self.repo_url(
            change.repository(),
            &format!("/pulls/{}/files", change.number()),
        );
        self.get_paginated(&url, &[]).await
    }

    async fn create_pull_request(
        &self,
        repo: &RepositoryIdentifier,
        request: &CreatePrRequest,
    ) -> Result<CreatedPullRequest, ForgeError> {
        let url = self.repo_url(repo, "/pulls");
        let created: CreatedPullRequest = self.post_json(&url, request).await?;

        info!(
            repo = %repo,
            number = created.number,
            head = %request.head,
            draft = request.draft,
            "Opened pull request"
        );
        Ok(created)
    }

    async fn create_comment(
        &self,
        repo: &RepositoryIdentifier,
        number: u64,
        body: &str,
    ) -> Result<(), ForgeError> {
        let url = self.repo_url(repo, &format!("/issues/{number}/comments"));
        let _: IgnoredAny = self.post_json(&url, &CommentRequest { body }).await?;
        info!(repo = %repo, number, "Commented on pull request");
        Ok(())
    }

    async fn list_pull_requests(
        &self,
        repo: &RepositoryIdentifier,
        state: PullRequestStateFilter,
    ) -> Result<Vec<PullRequestSummary>, ForgeError> {
        let url = self.repo_url(repo, "/pulls");
        self.get_paginated(
            &url,
            &[
                ("state", state.to_string()),
                ("sort", "created".to_string()),
                ("direction", "asc".to_string()),
            ],
        )
        .await
    }

    async fn get_repository(
        &self,
        repo: &RepositoryIdentifier,
    ) -> Result<RepositoryDetails, ForgeError> {
        let url = self.repo_url(repo, "");
        self.get_json(&url, &[]).await
    }

    async fn authenticated_user(&self) -> Result<ForgeUser, ForgeError> {
        let url = format!("{}/user", self.api_base);
        self.get_json(&url, &[]).await
    }
}
