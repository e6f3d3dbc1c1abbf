use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};

const SELECT_WITH_PATH: &str = r#"SELECT fc.id, fc.pull_request_id, fc.file_id, f.path, fc.status,
           fc.additions, fc.changes, fc.deletions, fc.previous_path, fc.patch, fc.blob_sha
    FROM file_changes fc
    JOIN files f ON f.id = fc.file_id"#;

/// Per-file status as reported by the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type, Display, EnumString)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FileChangeStatus {
    Added,
    #[serde(alias = "deleted")]
    #[strum(to_string = "removed", serialize = "deleted")]
    Removed,
    Modified,
    Renamed,
    Copied,
    Changed,
    Unchanged,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedFileChange {
    pub id: i64,
    pub pull_request_id: i64,
    pub file_id: i64,
    pub path: String,
    pub status: FileChangeStatus,
    pub additions: i64,
    pub changes: i64,
    pub deletions: i64,
    pub previous_path: Option<String>,
    pub patch: Option<String>,
    pub blob_sha: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertFileChange {
    pub status: FileChangeStatus,
    pub additions: i64,
    pub changes: i64,
    pub deletions: i64,
    pub previous_path: Option<String>,
    pub patch: Option<String>,
    pub blob_sha: Option<String>,
}

impl IndexedFileChange {
    /// `repo#number:path`
    pub fn key_for(repo_key: &str, number: i64, path: &str) -> String {
        format!("{repo_key}#{number}:{path}")
    }

    pub async fn find(
        pool: &SqlitePool,
        pull_request_id: i64,
        file_id: i64,
    ) -> Result<Option<Self>, sqlx::Error> {
        let sql = format!("{SELECT_WITH_PATH} WHERE fc.pull_request_id = $1 AND fc.file_id = $2");
        sqlx::query_as::<_, IndexedFileChange>(&sql)
            .bind(pull_request_id)
            .bind(file_id)
            .fetch_optional(pool)
            .await
    }

    /// Both referenced rows must already exist.
    pub async fn upsert(
        pool: &SqlitePool,
        pull_request_id: i64,
        file_id: i64,
        data: &UpsertFileChange,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO file_changes (
                   pull_request_id, file_id, status, additions, changes, deletions,
                   previous_path, patch, blob_sha)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
               ON CONFLICT (pull_request_id, file_id) DO UPDATE SET
                   status = excluded.status,
                   additions = excluded.additions,
                   changes = excluded.changes,
                   deletions = excluded.deletions,
                   previous_path = excluded.previous_path,
                   patch = excluded.patch,
                   blob_sha = excluded.blob_sha"#,
        )
        .bind(pull_request_id)
        .bind(file_id)
        .bind(data.status)
        .bind(data.additions)
        .bind(data.changes)
        .bind(data.deletions)
        .bind(&data.previous_path)
        .bind(&data.patch)
        .bind(&data.blob_sha)
        .execute(pool)
        .await?;

        Self::find(pool, pull_request_id, file_id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn count_for_repository(
        pool: &SqlitePool,
        repository_id: i64,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as(
            r#"SELECT COUNT(*)
               FROM file_changes fc
               JOIN files f ON f.id = fc.file_id
               WHERE f.repository_id = $1"#,
        )
        .bind(repository_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}
