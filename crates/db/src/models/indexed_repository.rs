use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexedRepository {
    pub id: i64,
    pub org: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl IndexedRepository {
    pub fn natural_key(&self) -> String {
        Self::key_for(&self.org, &self.name)
    }

    pub fn key_for(org: &str, name: &str) -> String {
        format!("{org}/{name}")
    }

    pub async fn find(
        pool: &SqlitePool,
        org: &str,
        name: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, IndexedRepository>(
            r#"SELECT id, org, name, created_at
               FROM repositories
               WHERE org = $1 AND name = $2"#,
        )
        .bind(org)
        .bind(name)
        .fetch_optional(pool)
        .await
    }

    pub async fn get_or_create(
        pool: &SqlitePool,
        org: &str,
        name: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query(
            r#"INSERT INTO repositories (org, name)
               VALUES ($1, $2)
               ON CONFLICT (org, name) DO NOTHING"#,
        )
        .bind(org)
        .bind(name)
        .execute(pool)
        .await?;

        Self::find(pool, org, name)
            .await?
            .ok_or(sqlx::Error::RowNotFound)
    }
}
