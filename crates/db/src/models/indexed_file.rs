use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A path ever seen in a repository's pull requests.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedFile {
    pub id: i64,
    pub repository_id: i64,
    pub path: String,
}

impl IndexedFile {
    /// `repo@path`
    pub fn key_for(repo_key: &str, path: &str) -> String {
        format!("{repo_key}@{path}")
    }

    pub async fn find(
        pool: &SqlitePool,
        repository_id: i64,
        path: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, IndexedFile>(
            r#"SELECT id, repository_id, path
               FROM files
               WHERE repository_id = $1 AND path = $2"#,
        )
        .bind(repository_id)
        .bind(path)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_or_create(
        pool: &SqlitePool,
        repository_id: i64,
        path: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO files (repository_id, path)
               VALUES ($1, $2)
               ON CONFLICT (repository_id, path) DO NOTHING"#,
        )
        .bind(repository_id)
        .bind(path)
        .execute(pool)
        .await?;

        Self::find(pool, repository_id, path)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn count_for_repository(
        pool: &SqlitePool,
        repository_id: i64,
    ) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM files WHERE repository_id = $1")
                .bind(repository_id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }
}
