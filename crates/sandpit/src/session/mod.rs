//! Session lifecycle: one workspace directory and one container per session.

mod error;
mod models;
mod repository;
mod service;

pub use error::{SessionError, SessionResult};
pub use models::{CreateSessionRequest, Session, SessionStatus};
pub use repository::SessionRepository;
pub use service::{ExecParams, SessionService, SessionServiceConfig};
