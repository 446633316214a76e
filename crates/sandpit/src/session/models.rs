//! Session data models.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Container is being created.
    Starting,
    /// Container is running.
    Running,
    /// Container was stopped on request.
    Stopped,
    /// Session failed to start.
    Failed,
    /// Governance ended the session; permanent.
    Terminated,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Stopped => write!(f, "stopped"),
            SessionStatus::Failed => write!(f, "failed"),
            SessionStatus::Terminated => write!(f, "terminated"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "starting" => Ok(SessionStatus::Starting),
            "running" => Ok(SessionStatus::Running),
            "stopped" => Ok(SessionStatus::Stopped),
            "failed" => Ok(SessionStatus::Failed),
            "terminated" => Ok(SessionStatus::Terminated),
            _ => Err(format!("unknown session status: {}", s)),
        }
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// A sandbox session backed by exactly one container.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Project whose workspace archive this session uses.
    pub project_id: String,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    /// Engine id, set once the container exists.
    pub container_id: Option<String>,
    pub container_name: String,
    /// Host directory mounted into the container.
    pub workspace_path: String,
    pub image: String,
    pub created_at: String,
    /// Absolute end of the session's lifetime.
    pub expires_at: String,
    /// Set once, by governance; never cleared.
    pub terminated_at: Option<String>,
    pub termination_reason: Option<String>,
    pub error_message: Option<String>,
}

impl Session {
    pub fn is_terminated(&self) -> bool {
        self.terminated_at.is_some()
    }

    /// Check if the session is active (running or starting).
    pub fn is_active(&self) -> bool {
        !self.is_terminated()
            && matches!(
                self.status,
                SessionStatus::Starting | SessionStatus::Running
            )
    }
}

/// Request to create a new session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    /// Project id; a fresh id is generated when absent.
    #[serde(default)]
    pub project_id: Option<String>,
    /// Restore the project's archived workspace before starting.
    #[serde(default)]
    pub restore: bool,
    /// Container image override.
    #[serde(default)]
    pub image: Option<String>,
    /// Environment variables for the container.
    #[serde(default)]
    pub env: HashMap<String, String>,
}
