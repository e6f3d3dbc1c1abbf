//! Change-history index: records every pull request and the files it changed,
//! then answers which indexed changes came before or after a given one on the
//! same files.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::NaiveDateTime;
use db::{
    DBService,
    models::{
        indexed_file::IndexedFile,
        indexed_file_change::{FileChangeStatus, IndexedFileChange},
        indexed_pull_request::IndexedPullRequest,
        indexed_repository::IndexedRepository,
    },
};
use git::{ChangeIdentifier, IdentifierError, RepositoryIdentifier};
use serde::Serialize;
use thiserror::Error;
use utils::{
    status_msg::{StatusChannel, StatusMsg},
    text::{strip_html_comments, truncate_to_char_boundary},
};

use super::{
    config::HistoryConfig,
    forge::{ForgeClient, ForgeError, PullRequestDetails, PullRequestFile, PullRequestStateFilter},
};

const SHOW_BODY_LIMIT: usize = 300;

/// Statuses of a file that an earlier change must have produced.
const ANCESTOR_SEED_STATUSES: &[FileChangeStatus] = &[
    FileChangeStatus::Modified,
    FileChangeStatus::Changed,
    FileChangeStatus::Renamed,
    FileChangeStatus::Removed,
];

const DESCENDANT_SEED_STATUSES: &[FileChangeStatus] = &[FileChangeStatus::Added];

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Forge(#[from] ForgeError),
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
    #[error("repository {0} has not been indexed yet")]
    NotIndexed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub pull_requests: usize,
    pub file_changes: usize,
    pub skipped: usize,
}

/// What the index holds for one repository, across every pass so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexCoverage {
    pub pull_requests: i64,
    pub files: i64,
    pub file_changes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Ancestors,
    Descendants,
}

impl Direction {
    fn seed_statuses(self) -> &'static [FileChangeStatus] {
        match self {
            Direction::Ancestors => ANCESTOR_SEED_STATUSES,
            Direction::Descendants => DESCENDANT_SEED_STATUSES,
        }
    }

    fn accepts(self, merged_at: NaiveDateTime, reference: NaiveDateTime) -> bool {
        match self {
            Direction::Ancestors => merged_at < reference,
            Direction::Descendants => merged_at > reference,
        }
    }
}

pub struct HistoryIndex {
    db: DBService,
    forge: Arc<dyn ForgeClient>,
    config: HistoryConfig,
    status: Option<StatusChannel>,
}

impl HistoryIndex {
    pub fn new(db: DBService, forge: Arc<dyn ForgeClient>, config: HistoryConfig) -> Self {
        Self {
            db,
            forge,
            config,
            status: None,
        }
    }

    pub fn with_status(mut self, status: StatusChannel) -> Self {
        self.status = Some(status);
        self
    }

    fn publish(&self, msg: StatusMsg) {
        if let Some(status) = &self.status {
            status.publish(msg);
        }
    }

    /// Number of pull requests an indexing pass would visit.
    pub async fn pending_count(
        &self,
        repo: &RepositoryIdentifier,
        state: PullRequestStateFilter,
    ) -> Result<usize, HistoryError> {
        Ok(self.forge.list_pull_requests(repo, state).await?.len())
    }

    /// Record every pull request of `repo` matching `state`, with its files.
    /// Safe to repeat: rows are keyed by their natural keys.
    pub async fn index_repository(
        &self,
        repo: &RepositoryIdentifier,
        state: PullRequestStateFilter,
    ) -> Result<IndexReport, HistoryError> {
        let pool = &self.db.pool;
        let repo_row = IndexedRepository::get_or_create(pool, repo.org(), repo.name()).await?;
        let repo_key = repo_row.natural_key();
        let summaries = self.forge.list_pull_requests(repo, state).await?;
        let total = summaries.len();

        tracing::info!(repo = %repo, %state, total, "Indexing pull requests");
        self.publish(StatusMsg::standard(format!(
            "Indexing {total} pull request(s) of {repo}"
        )));

        // natural key -> row id, to skip repeated get-or-create round-trips
        let mut known_files: HashMap<String, i64> = HashMap::new();
        let mut report = IndexReport::default();

        for (position, summary) in summaries.iter().enumerate() {
            let change = ChangeIdentifier::new(repo.clone(), summary.number);
            let details = match self.forge.get_pull_request(&change).await {
                Ok(details) => details,
                Err(ForgeError::NotFound(_)) => {
                    self.skip(&change, &mut report);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            let pr_row = IndexedPullRequest::upsert(pool, repo_row.id, &details.to_upsert()).await?;
            report.pull_requests += 1;
            self.publish(StatusMsg::standard(format!(
                "[{}/{total}] {} - {}",
                position + 1,
                IndexedPullRequest::key_for(&repo_key, pr_row.number),
                details.title
            )));

            if details.changed_files == 0 {
                continue;
            }

            let files = match self.forge.list_pull_request_files(&change).await {
                Ok(files) => files,
                Err(ForgeError::NotFound(_)) => {
                    self.skip(&change, &mut report);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };

            for file in &files {
                let key = IndexedFile::key_for(&repo_key, &file.filename);
                let file_id = match known_files.get(&key) {
                    Some(id) => *id,
                    None => {
                        let row = IndexedFile::get_or_create(pool, repo_row.id, &file.filename)
                            .await?;
                        known_files.insert(key, row.id);
                        row.id
                    }
                };
                IndexedFileChange::upsert(pool, pr_row.id, file_id, &file.to_upsert()).await?;
                report.file_changes += 1;
            }
        }

        tracing::info!(
            repo = %repo,
            pull_requests = report.pull_requests,
            file_changes = report.file_changes,
            skipped = report.skipped,
            "Indexing finished"
        );
        self.publish(StatusMsg::comment(format!(
            "Indexed {} pull request(s) and {} file change(s), skipped {}",
            report.pull_requests, report.file_changes, report.skipped
        )));
        Ok(report)
    }

    /// Totals recorded for `repo`.
    pub async fn coverage(&self, repo: &RepositoryIdentifier) -> Result<IndexCoverage, HistoryError> {
        let pool = &self.db.pool;
        let repo_row = IndexedRepository::find(pool, repo.org(), repo.name())
            .await?
            .ok_or_else(|| HistoryError::NotIndexed(repo.to_string()))?;
        Ok(IndexCoverage {
            pull_requests: IndexedPullRequest::count_for_repository(pool, repo_row.id).await?,
            files: IndexedFile::count_for_repository(pool, repo_row.id).await?,
            file_changes: IndexedFileChange::count_for_repository(pool, repo_row.id).await?,
        })
    }

    fn skip(&self, change: &ChangeIdentifier, report: &mut IndexReport) {
        report.skipped += 1;
        tracing::debug!(%change, "Pull request vanished, skipping");
        self.publish(StatusMsg::comment(format!("{change} not found, skipping")));
    }

    /// Merged changes that shaped the files `change` modifies, oldest first.
    pub async fn ancestors(
        &self,
        change: &ChangeIdentifier,
    ) -> Result<Vec<IndexedPullRequest>, HistoryError> {
        self.related(change, Direction::Ancestors).await
    }

    /// Merged changes that built on the files `change` added, oldest first.
    pub async fn descendants(
        &self,
        change: &ChangeIdentifier,
    ) -> Result<Vec<IndexedPullRequest>, HistoryError> {
        self.related(change, Direction::Descendants).await
    }

    async fn related(
        &self,
        change: &ChangeIdentifier,
        direction: Direction,
    ) -> Result<Vec<IndexedPullRequest>, HistoryError> {
        let repo = change.repository();
        let pool = &self.db.pool;
        let repo_row = IndexedRepository::find(pool, repo.org(), repo.name())
            .await?
            .ok_or_else(|| HistoryError::NotIndexed(repo.to_string()))?;

        let details = self.forge.get_pull_request(change).await?;
        let files = self.forge.list_pull_request_files(change).await?;
        let seeds = self.seed_paths(&files, direction);
        if seeds.is_empty() {
            return Ok(Vec::new());
        }

        let upstream_merges: HashSet<i64> = IndexedPullRequest::numbers_touching_path(
            pool,
            repo_row.id,
            &self.config.upstream_merge_marker_path,
        )
        .await?
        .into_iter()
        .collect();

        let candidates = IndexedPullRequest::find_touching_paths(pool, repo_row.id, &seeds).await?;
        let related = select_related(candidates, &details, &upstream_merges, direction);

        tracing::debug!(
            %change,
            ?direction,
            seeds = seeds.len(),
            found = related.len(),
            "History query"
        );
        Ok(related)
    }

    fn seed_paths(&self, files: &[PullRequestFile], direction: Direction) -> Vec<String> {
        let statuses = direction.seed_statuses();
        files
            .iter()
            .filter(|f| statuses.contains(&f.status))
            .filter(|f| !self.config.high_churn_paths.contains(&f.filename))
            .map(|f| f.filename.clone())
            .collect()
    }

    /// Indexed changes touching `path`, across every repository or just `repo`.
    pub async fn search(
        &self,
        path: &str,
        repo: Option<&RepositoryIdentifier>,
    ) -> Result<Vec<String>, HistoryError> {
        search(&self.db, path, repo).await
    }

    /// Short human summary of a change, straight from the forge.
    pub async fn show(&self, change: &ChangeIdentifier) -> Result<String, HistoryError> {
        let details = self.forge.get_pull_request(change).await?;
        Ok(render_summary(&details))
    }
}

/// Path search over the local index only; needs no forge access.
pub async fn search(
    db: &DBService,
    path: &str,
    repo: Option<&RepositoryIdentifier>,
) -> Result<Vec<String>, HistoryError> {
    let pool = &db.pool;
    let repository_id = match repo {
        Some(repo) => Some(
            IndexedRepository::find(pool, repo.org(), repo.name())
                .await?
                .ok_or_else(|| HistoryError::NotIndexed(repo.to_string()))?
                .id,
        ),
        None => None,
    };

    let hits = IndexedPullRequest::search(pool, path, repository_id).await?;
    Ok(hits
        .into_iter()
        .map(|hit| {
            format!(
                "{}#{} - {}",
                IndexedRepository::key_for(&hit.org, &hit.name),
                hit.number,
                hit.title
            )
        })
        .collect())
}

fn select_related(
    candidates: Vec<IndexedPullRequest>,
    subject: &PullRequestDetails,
    upstream_merges: &HashSet<i64>,
    direction: Direction,
) -> Vec<IndexedPullRequest> {
    let reference = subject.reference_time();
    let subject_number = subject.number as i64;
    candidates
        .into_iter()
        .filter(|pr| pr.number != subject_number)
        .filter(|pr| pr.merged && !upstream_merges.contains(&pr.number))
        .filter(|pr| {
            pr.merged_at
                .is_some_and(|merged_at| direction.accepts(merged_at.naive_utc(), reference))
        })
        .collect()
}

/// `#N - title` per change.
pub fn render_changes(changes: &[IndexedPullRequest]) -> Vec<String> {
    changes
        .iter()
        .map(|pr| format!("#{} - {}", pr.number, pr.title))
        .collect()
}

pub fn render_summary(details: &PullRequestDetails) -> String {
    let body = strip_html_comments(details.body.as_deref().unwrap_or_default());
    let body = body.trim();
    let body = if body.len() > SHOW_BODY_LIMIT {
        format!("{} ...", truncate_to_char_boundary(body, SHOW_BODY_LIMIT))
    } else {
        body.to_string()
    };

    format!(
        "{}\nState: {}\n+{} -{}\nAuthor: {}\n\n{}",
        details.title,
        details.state_label(),
        details.additions,
        details.deletions,
        details.author().unwrap_or("unknown"),
        body
    )
}
