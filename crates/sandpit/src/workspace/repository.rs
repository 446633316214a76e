//! Project archive bookkeeping.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: String,
    /// User who first snapshotted the project. Unset on rows that predate
    /// ownership; the next snapshot claims those.
    pub owner_id: Option<String>,
    pub archive_path: String,
    pub archive_bytes: i64,
    /// Time of the last successful snapshot.
    pub last_modified_at: String,
}

impl Project {
    /// Whether `user_id` may read or replace this project's archive.
    pub fn is_accessible_by(&self, user_id: &str) -> bool {
        self.owner_id.as_deref().is_none_or(|owner| owner == user_id)
    }
}

#[derive(Debug, Clone)]
pub struct ProjectRepository {
    pool: SqlitePool,
}

impl ProjectRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Claim `id` for `owner` unless someone already holds it.
    ///
    /// Returns the project as stored afterwards; its `owner_id` tells the
    /// caller whether the claim won.
    pub async fn claim(
        &self,
        id: &str,
        owner: &str,
        archive_path: &str,
        now: &str,
    ) -> Result<Project> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, owner_id, archive_path, archive_bytes, last_modified_at)
            VALUES (?, ?, ?, 0, ?)
            ON CONFLICT(id) DO UPDATE SET owner_id = excluded.owner_id
            WHERE projects.owner_id IS NULL
            "#,
        )
        .bind(id)
        .bind(owner)
        .bind(archive_path)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("claiming project")?;

        self.get(id)
            .await?
            .with_context(|| format!("project {id} vanished after claim"))
    }

    /// Record a finished snapshot. Ownership is left as claimed.
    pub async fn record_snapshot(
        &self,
        id: &str,
        archive_path: &str,
        archive_bytes: i64,
        last_modified_at: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE projects
            SET archive_path = ?, archive_bytes = ?, last_modified_at = ?
            WHERE id = ?
            "#,
        )
        .bind(archive_path)
        .bind(archive_bytes)
        .bind(last_modified_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("recording snapshot")?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Project>> {
        let project = sqlx::query_as::<_, Project>(
            r#"
            SELECT id, owner_id, archive_path, archive_bytes, last_modified_at
            FROM projects WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching project")?;
        Ok(project)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn first_claim_wins() {
        let db = Database::in_memory().await.unwrap();
        let repo = ProjectRepository::new(db.pool().clone());

        let project = repo.claim("blog", "alice", "/a/blog.zip", "t0").await.unwrap();
        assert_eq!(project.owner_id.as_deref(), Some("alice"));

        let project = repo.claim("blog", "bob", "/a/blog.zip", "t1").await.unwrap();
        assert_eq!(project.owner_id.as_deref(), Some("alice"));
        assert!(project.is_accessible_by("alice"));
        assert!(!project.is_accessible_by("bob"));
    }

    #[tokio::test]
    async fn unowned_rows_are_claimed() {
        let db = Database::in_memory().await.unwrap();
        let repo = ProjectRepository::new(db.pool().clone());
        sqlx::query(
            "INSERT INTO projects (id, archive_path, archive_bytes, last_modified_at) VALUES ('old', '/a/old.zip', 10, 't0')",
        )
        .execute(db.pool())
        .await
        .unwrap();

        assert!(repo.get("old").await.unwrap().unwrap().is_accessible_by("bob"));
        let project = repo.claim("old", "bob", "/a/old.zip", "t1").await.unwrap();
        assert_eq!(project.owner_id.as_deref(), Some("bob"));
        assert_eq!(project.archive_bytes, 10);
    }
}
