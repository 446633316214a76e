//! API request handlers.
//!
//! - `sessions`: session lifecycle, exec, snapshots and preview registration
//! - `files`: workspace file primitives
//! - `quota`: per-user quota status
//! - `misc`: health check

mod files;
mod misc;
mod quota;
mod sessions;

pub use files::{
    FileContentResponse, PathQuery, WriteFileRequest, list_dir, read_file, stat_file, write_file,
};
pub use misc::{HealthResponse, health};
pub use quota::get_user_quota;
pub use sessions::{
    RegisterPreviewRequest, PreviewResponse, UsableResponse, assert_usable, create_session,
    delete_session, exec, get_preview, get_session, list_session_events, list_sessions,
    register_preview, snapshot_session, stop_session,
};

use crate::auth::CurrentUser;
use crate::session::Session;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Load a session and check the caller owns it.
///
/// Existence is checked before ownership so unknown ids stay 404.
pub(crate) async fn owned_session(
    state: &AppState,
    user: &CurrentUser,
    session_id: &str,
) -> ApiResult<Session> {
    let session = state.sessions.require_session(session_id).await?;
    if !user.can_access(&session.user_id) {
        return Err(ApiError::forbidden(format!(
            "session {session_id} belongs to another user"
        )));
    }
    Ok(session)
}
