use std::{collections::HashSet, path::Path, str::FromStr};

use sqlx::{
    Error, Pool, Sqlite, SqlitePool,
    migrate::MigrateError,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};

pub mod models;

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<(), Error> {
    let migrator = sqlx::migrate!("./migrations");
    let mut processed_versions: HashSet<i64> = HashSet::new();

    loop {
        match migrator.run(pool).await {
            Ok(()) => return Ok(()),
            Err(MigrateError::VersionMismatch(version)) => {
                // Only line-ending differences on Windows are repaired in place.
                if cfg!(debug_assertions)
                    || !cfg!(windows)
                    || !processed_versions.insert(version)
                {
                    return Err(Error::Migrate(Box::new(MigrateError::VersionMismatch(
                        version,
                    ))));
                }

                tracing::warn!(
                    version,
                    "Migration checksum mismatch, updating stored checksum"
                );

                let Some(migration) = migrator.iter().find(|m| m.version == version) else {
                    return Err(Error::Migrate(Box::new(MigrateError::VersionMismatch(
                        version,
                    ))));
                };
                sqlx::query("UPDATE _sqlx_migrations SET checksum = ? WHERE version = ?")
                    .bind(&*migration.checksum)
                    .bind(version)
                    .execute(pool)
                    .await?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Handle to the history index and port bookkeeping database.
#[derive(Clone)]
pub struct DBService {
    pub pool: Pool<Sqlite>,
}

impl DBService {
    /// Open (creating if missing) the database file at `path` and migrate it.
    pub async fn new(path: &Path) -> Result<DBService, Error> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(Error::Io)?;
        }
        let database_url = format!("sqlite://{}", path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let pool = SqlitePool::connect_with(options).await?;
        run_migrations(&pool).await?;
        tracing::debug!(path = %path.display(), "Database ready");
        Ok(DBService { pool })
    }

    /// Private in-memory database; lives as long as the pool.
    pub async fn new_in_memory() -> Result<DBService, Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        run_migrations(&pool).await?;
        Ok(DBService { pool })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_database_is_created_and_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.sqlite");

        let first = DBService::new(&path).await.unwrap();
        sqlx::query("INSERT INTO repositories (org, name) VALUES ('org', 'repo')")
            .execute(&first.pool)
            .await
            .unwrap();
        first.pool.close().await;

        let second = DBService::new(&path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM repositories")
            .fetch_one(&second.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
