use axum::extract::State;
use axum::http::StatusCode;
use tracing::warn;

use super::ApiState;

const HEALTHCHECK_PROMPT: &str = "Hello!";

pub async fn healthcheck() -> StatusCode {
    StatusCode::OK
}

/// Ask the current model a fixed question; anything but a real answer is a 500.
pub async fn bot_healthcheck(State(state): State<ApiState>) -> StatusCode {
    let model = match state.registry.current() {
        Ok(model) => model,
        Err(e) => {
            warn!("bot healthcheck failed: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };
    let outcome = state.backend.ask(HEALTHCHECK_PROMPT, &model).await;
    if outcome.is_answer() {
        StatusCode::OK
    } else {
        warn!(model = %model, "bot healthcheck failed: {}", outcome.diagnostic());
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
