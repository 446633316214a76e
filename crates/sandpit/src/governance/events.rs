//! Persisted audit trail of governance decisions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::db::now_timestamp;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GovernanceEvent {
    pub id: i64,
    pub session_id: String,
    /// Owner of the session; kept after the session row is deleted.
    pub user_id: Option<String>,
    /// Event kind, e.g. `terminated`.
    pub event: String,
    pub reason: Option<String>,
    /// Free-form JSON details.
    pub details: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct GovernanceEventRepository {
    pool: SqlitePool,
}

impl GovernanceEventRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(
        &self,
        session_id: &str,
        user_id: &str,
        event: &str,
        reason: Option<&str>,
        details: Option<&serde_json::Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO governance_events (session_id, user_id, event, reason, details, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(event)
        .bind(reason)
        .bind(details.map(|d| d.to_string()))
        .bind(now_timestamp())
        .execute(&self.pool)
        .await
        .context("recording governance event")?;
        Ok(())
    }

    /// Events for a session, oldest first.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<GovernanceEvent>> {
        let events = sqlx::query_as::<_, GovernanceEvent>(
            r#"
            SELECT id, session_id, user_id, event, reason, details, created_at
            FROM governance_events
            WHERE session_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .context("listing governance events")?;
        Ok(events)
    }
}
