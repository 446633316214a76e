//! Quota status handler.

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::instrument;

use crate::auth::CurrentUser;
use crate::quota::QuotaEvaluation;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// Current month's quota evaluation for a user.
#[instrument(skip(state, user))]
pub async fn get_user_quota(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(user_id): Path<String>,
) -> ApiResult<Json<QuotaEvaluation>> {
    if !user.can_access(&user_id) {
        return Err(ApiError::forbidden("cannot read another user's quota"));
    }
    let evaluation = state.quota.evaluate(&user_id).await?;
    Ok(Json(evaluation))
}
