use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::Deserialize;

use super::ApiState;
use super::auth::AdminAccess;
use super::error::ApiError;

#[derive(Deserialize)]
pub struct BanRequest {
    reason: String,
}

pub async fn ban_user(
    _admin: AdminAccess,
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
    Json(body): Json<BanRequest>,
) -> Result<StatusCode, ApiError> {
    if !state.users.ban(user_id, &body.reason)? {
        return Err(ApiError::NotFound(format!("user {user_id} not found")));
    }
    Ok(StatusCode::ACCEPTED)
}

pub async fn unban_user(
    _admin: AdminAccess,
    State(state): State<ApiState>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if !state.users.unban(user_id)? {
        return Err(ApiError::NotFound(format!("user {user_id} not found")));
    }
    Ok(StatusCode::NO_CONTENT)
}
