//! Session database repository.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{Session, SessionStatus};

const SESSION_COLUMNS: &str = "id, user_id, project_id, status, container_id, container_name, \
     workspace_path, image, created_at, expires_at, terminated_at, termination_reason, error_message";

/// Repository for session persistence.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new session.
    pub async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, user_id, project_id, status, container_id, container_name,
                workspace_path, image, created_at, expires_at,
                terminated_at, termination_reason, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.project_id)
        .bind(session.status.to_string())
        .bind(&session.container_id)
        .bind(&session.container_name)
        .bind(&session.workspace_path)
        .bind(&session.image)
        .bind(&session.created_at)
        .bind(&session.expires_at)
        .bind(&session.terminated_at)
        .bind(&session.termination_reason)
        .bind(&session.error_message)
        .execute(&self.pool)
        .await
        .context("creating session")?;

        Ok(())
    }

    /// Get a session by ID.
    pub async fn get(&self, id: &str) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?");
        let session = sqlx::query_as::<_, Session>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session")?;

        Ok(session)
    }

    /// List all sessions, newest first.
    pub async fn list(&self) -> Result<Vec<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC");
        let sessions = sqlx::query_as::<_, Session>(&query)
            .fetch_all(&self.pool)
            .await
            .context("listing sessions")?;

        Ok(sessions)
    }

    /// List sessions owned by a user, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<Session>> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE user_id = ? ORDER BY created_at DESC"
        );
        let sessions = sqlx::query_as::<_, Session>(&query)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .context("listing sessions for user")?;

        Ok(sessions)
    }

    /// Update session status. Terminated sessions keep their status.
    pub async fn update_status(&self, id: &str, status: SessionStatus) -> Result<()> {
        sqlx::query("UPDATE sessions SET status = ? WHERE id = ? AND terminated_at IS NULL")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("updating session status")?;

        Ok(())
    }

    /// Record the engine id and mark the session running.
    pub async fn mark_running(&self, id: &str, container_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions SET status = 'running', container_id = ?
            WHERE id = ? AND terminated_at IS NULL
            "#,
        )
        .bind(container_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("marking session running")?;

        Ok(())
    }

    /// Persist termination. Returns false if the session was already
    /// terminated, in which case the stored reason is left untouched.
    pub async fn mark_terminated(&self, id: &str, reason: &str, at: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET status = 'terminated', terminated_at = ?, termination_reason = ?
            WHERE id = ? AND terminated_at IS NULL
            "#,
        )
        .bind(at)
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("persisting session termination")?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a session.
    pub async fn delete(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting session")?;

        Ok(())
    }
}
