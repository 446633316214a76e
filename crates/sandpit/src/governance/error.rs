//! Governance error types.

use thiserror::Error;

use crate::quota::QuotaEvaluation;

pub type GovernanceResult<T> = Result<T, GovernanceError>;

/// Reasons the governor refuses an operation.
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("session not found: {0}")]
    NotFound(String),

    /// The session is permanently terminated.
    #[error("session {session_id} is terminated: {reason}")]
    Gone { session_id: String, reason: String },

    #[error("monthly quota exceeded ({}% of {} plan)", .0.max_pct, .0.plan)]
    QuotaExceeded(Box<QuotaEvaluation>),

    #[error("too many concurrent executions ({in_flight}/{limit}), retry later")]
    ConcurrencyLimit { in_flight: usize, limit: usize },

    #[error("governance storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl GovernanceError {
    /// Whether retrying later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GovernanceError::QuotaExceeded(_) | GovernanceError::ConcurrencyLimit { .. }
        )
    }
}
