//! Session error types.

use thiserror::Error;

use crate::container::ContainerError;
use crate::governance::GovernanceError;
use crate::workspace::ArchiveError;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("session not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("session storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}
