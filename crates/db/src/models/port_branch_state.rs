use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// Which change a port branch last received, so a later session can append
/// to the same branch.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortBranchState {
    pub branch: String,
    /// `org/name#N`
    pub last_ported_change: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PortBranchState {
    pub async fn find(pool: &SqlitePool, branch: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, PortBranchState>(
            r#"SELECT branch, last_ported_change, created_at, updated_at
               FROM project_branch_state
               WHERE branch = $1"#,
        )
        .bind(branch)
        .fetch_optional(pool)
        .await
    }

    pub async fn upsert(
        pool: &SqlitePool,
        branch: &str,
        last_ported_change: &str,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, PortBranchState>(
            r#"INSERT INTO project_branch_state (branch, last_ported_change)
               VALUES ($1, $2)
               ON CONFLICT (branch) DO UPDATE SET
                   last_ported_change = excluded.last_ported_change,
                   updated_at = datetime('now', 'subsec')
               RETURNING branch, last_ported_change, created_at, updated_at"#,
        )
        .bind(branch)
        .bind(last_ported_change)
        .fetch_one(pool)
        .await
    }

    pub async fn list(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, PortBranchState>(
            r#"SELECT branch, last_ported_change, created_at, updated_at
               FROM project_branch_state
               ORDER BY updated_at DESC, branch"#,
        )
        .fetch_all(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DBService;

    #[tokio::test]
    async fn upsert_tracks_latest_change() {
        let db = DBService::new_in_memory().await.unwrap();
        assert!(PortBranchState::find(&db.pool, "port-org-repo-1")
            .await
            .unwrap()
            .is_none());

        PortBranchState::upsert(&db.pool, "port-org-repo-1", "org/repo#1")
            .await
            .unwrap();
        let updated = PortBranchState::upsert(&db.pool, "port-org-repo-1", "org/repo#4")
            .await
            .unwrap();
        assert_eq!(updated.last_ported_change, "org/repo#4");

        PortBranchState::upsert(&db.pool, "port-org-other-2", "org/other#2")
            .await
            .unwrap();
        let branches: Vec<String> = PortBranchState::list(&db.pool)
            .await
            .unwrap()
            .into_iter()
            .map(|state| state.branch)
            .collect();
        assert_eq!(branches, vec!["port-org-other-2", "port-org-repo-1"]);
    }
}
