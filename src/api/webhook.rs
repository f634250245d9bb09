use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use tracing::{debug, warn};

use super::ApiState;
use super::error::ApiError;
use crate::bot::Update;

/// Accept one update from Telegram. Never waits on the dispatcher.
pub async fn process_update(State(state): State<ApiState>, body: Bytes) -> Result<StatusCode, ApiError> {
    let Some(update) = Update::from_json(&body) else {
        debug!(bytes = body.len(), "dropping malformed or unsupported update");
        return Ok(StatusCode::ACCEPTED);
    };
    let update_id = update.id;
    state.queue.enqueue(update).map_err(|e| {
        warn!(update_id, "rejecting update: {e}");
        ApiError::from(e)
    })?;
    Ok(StatusCode::ACCEPTED)
}
