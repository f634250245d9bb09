//! Admin access check: the `BOT-API-KEY` header must equal the stored
//! superuser token.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::warn;

use super::ApiState;
use super::error::ApiError;

pub const API_KEY_HEADER: &str = "bot-api-key";

/// Extractor proving the request carries the superuser's API key.
pub struct AdminAccess;

impl FromRequestParts<ApiState> for AdminAccess {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        let Some(provided) = parts.headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) else {
            return Err(ApiError::PermissionMissing);
        };
        // No superuser configured means nobody is admin
        let Some(superuser) = state.config.superuser.as_ref() else {
            return Err(ApiError::PermissionMissing);
        };
        let expected = state.users.access_token_for(&superuser.username)?;
        if expected.as_deref() != Some(provided) {
            warn!(path = %parts.uri.path(), "rejected admin request with wrong api key");
            return Err(ApiError::PermissionMissing);
        }
        Ok(AdminAccess)
    }
}
