use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqlitePool, Type};
use strum_macros::{Display, EnumString};

const COLUMNS: &str = "id, repository_id, number, title, body, state, merged, additions, \
    deletions, changed_files, commits, comments, base_ref, head_ref, author, html_url, \
    created_at, updated_at, closed_at, merged_at, indexed_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type, Display, EnumString)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PullRequestState {
    Open,
    Closed,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedPullRequest {
    pub id: i64,
    pub repository_id: i64,
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: PullRequestState,
    pub merged: bool,
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,
    pub commits: i64,
    pub comments: i64,
    pub base_ref: String,
    pub head_ref: String,
    pub author: Option<String>,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
}

/// Forge-side fields written on every upsert.
#[derive(Debug, Clone, Deserialize)]
pub struct UpsertPullRequest {
    pub number: i64,
    pub title: String,
    pub body: Option<String>,
    pub state: PullRequestState,
    pub merged: bool,
    pub additions: i64,
    pub deletions: i64,
    pub changed_files: i64,
    pub commits: i64,
    pub comments: i64,
    pub base_ref: String,
    pub head_ref: String,
    pub author: Option<String>,
    pub html_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
}

/// Row returned by [`IndexedPullRequest::search`].
#[derive(Debug, Clone, FromRow, Serialize, PartialEq, Eq)]
pub struct PullRequestSearchHit {
    pub org: String,
    pub name: String,
    pub number: i64,
    pub title: String,
    pub merged_at: Option<DateTime<Utc>>,
}

impl IndexedPullRequest {
    /// `repo#number`
    pub fn key_for(repo_key: &str, number: i64) -> String {
        format!("{repo_key}#{number}")
    }

    /// Point in history this change is anchored at: merge time when merged,
    /// creation time otherwise.
    pub fn reference_time(&self) -> NaiveDateTime {
        match (self.merged, self.merged_at) {
            (true, Some(merged_at)) => merged_at.naive_utc(),
            _ => self.created_at.naive_utc(),
        }
    }

    pub fn state_label(&self) -> &'static str {
        if self.merged {
            "Merged"
        } else {
            match self.state {
                PullRequestState::Open => "Open",
                PullRequestState::Closed => "Closed",
            }
        }
    }

    pub async fn upsert(
        pool: &SqlitePool,
        repository_id: i64,
        data: &UpsertPullRequest,
    ) -> Result<Self, sqlx::Error> {
        let sql = format!(
            r#"INSERT INTO pull_requests (
                   repository_id, number, title, body, state, merged, additions, deletions,
                   changed_files, commits, comments, base_ref, head_ref, author, html_url,
                   created_at, updated_at, closed_at, merged_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
               ON CONFLICT (repository_id, number) DO UPDATE SET
                   title = excluded.title,
                   body = excluded.body,
                   state = excluded.state,
                   merged = excluded.merged,
                   additions = excluded.additions,
                   deletions = excluded.deletions,
                   changed_files = excluded.changed_files,
                   commits = excluded.commits,
                   comments = excluded.comments,
                   base_ref = excluded.base_ref,
                   head_ref = excluded.head_ref,
                   author = excluded.author,
                   html_url = excluded.html_url,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at,
                   closed_at = COALESCE(excluded.closed_at, pull_requests.closed_at),
                   merged_at = COALESCE(excluded.merged_at, pull_requests.merged_at),
                   indexed_at = datetime('now', 'subsec')
               RETURNING {COLUMNS}"#
        );
        sqlx::query_as::<_, IndexedPullRequest>(&sql)
            .bind(repository_id)
            .bind(data.number)
            .bind(&data.title)
            .bind(&data.body)
            .bind(data.state)
            .bind(data.merged)
            .bind(data.additions)
            .bind(data.deletions)
            .bind(data.changed_files)
            .bind(data.commits)
            .bind(data.comments)
            .bind(&data.base_ref)
            .bind(&data.head_ref)
            .bind(&data.author)
            .bind(&data.html_url)
            .bind(data.created_at)
            .bind(data.updated_at)
            .bind(data.closed_at)
            .bind(data.merged_at)
            .fetch_one(pool)
            .await
    }

    pub async fn count_for_repository(
        pool: &SqlitePool,
        repository_id: i64,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pull_requests WHERE repository_id = $1")
                .bind(repository_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    /// Pull requests in the repository with a file change whose current or
    /// previous path is one of `paths`.
    pub async fn find_touching_paths(
        pool: &SqlitePool,
        repository_id: i64,
        paths: &[String],
    ) -> Result<Vec<Self>, sqlx::Error> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {COLUMNS} FROM pull_requests WHERE repository_id = "
        ));
        query.push_bind(repository_id);
        query.push(
            " AND id IN (SELECT fc.pull_request_id FROM file_changes fc \
             JOIN files f ON f.id = fc.file_id WHERE f.path IN (",
        );
        let mut separated = query.separated(", ");
        for path in paths {
            separated.push_bind(path);
        }
        query.push(") OR fc.previous_path IN (");
        let mut separated = query.separated(", ");
        for path in paths {
            separated.push_bind(path);
        }
        query.push(")) ORDER BY merged_at, number");

        query
            .build_query_as::<IndexedPullRequest>()
            .fetch_all(pool)
            .await
    }

    /// Numbers of pull requests in the repository that touched `path`.
    pub async fn numbers_touching_path(
        pool: &SqlitePool,
        repository_id: i64,
        path: &str,
    ) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            r#"SELECT DISTINCT pr.number
               FROM pull_requests pr
               JOIN file_changes fc ON fc.pull_request_id = pr.id
               JOIN files f ON f.id = fc.file_id
               WHERE pr.repository_id = $1 AND (f.path = $2 OR fc.previous_path = $3)"#,
        )
        .bind(repository_id)
        .bind(path)
        .bind(path)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(n,)| n).collect())
    }

    /// Every indexed change touching `path`, optionally limited to one
    /// repository. Unmerged changes sort first, then by merge time.
    pub async fn search(
        pool: &SqlitePool,
        path: &str,
        repository_id: Option<i64>,
    ) -> Result<Vec<PullRequestSearchHit>, sqlx::Error> {
        sqlx::query_as::<_, PullRequestSearchHit>(
            r#"SELECT r.org, r.name, pr.number, pr.title, pr.merged_at
               FROM pull_requests pr
               JOIN repositories r ON r.id = pr.repository_id
               WHERE ($1 IS NULL OR pr.repository_id = $2)
                 AND pr.id IN (
                     SELECT fc.pull_request_id
                     FROM file_changes fc
                     JOIN files f ON f.id = fc.file_id
                     WHERE f.path = $3 OR fc.previous_path = $4)
               ORDER BY pr.merged_at IS NOT NULL, pr.merged_at, r.org, r.name, pr.number"#,
        )
        .bind(repository_id)
        .bind(repository_id)
        .bind(path)
        .bind(path)
        .fetch_all(pool)
        .await
    }
}
