//! Chat model administration.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use super::ApiState;
use super::auth::AdminAccess;
use super::error::ApiError;
use crate::backend::ChatModel;

#[derive(Serialize)]
pub struct ModelList {
    data: Vec<ChatModel>,
}

#[derive(Deserialize)]
pub struct NewModel {
    model: String,
    #[serde(default)]
    priority: u32,
}

#[derive(Deserialize)]
pub struct PriorityChange {
    #[serde(default)]
    priority: u32,
}

pub async fn list_models(State(state): State<ApiState>) -> Result<Json<ModelList>, ApiError> {
    Ok(Json(ModelList { data: state.registry.list()? }))
}

pub async fn add_model(
    _admin: AdminAccess,
    State(state): State<ApiState>,
    Json(body): Json<NewModel>,
) -> Result<(StatusCode, Json<ChatModel>), ApiError> {
    let model = body.model.trim();
    if model.is_empty() {
        return Err(ApiError::BadRequest("model must not be empty".into()));
    }
    let stored = state.registry.add(model, body.priority)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn change_priority(
    _admin: AdminAccess,
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<PriorityChange>,
) -> Result<StatusCode, ApiError> {
    state.registry.set_priority(id, body.priority)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn reset_priority(_admin: AdminAccess, State(state): State<ApiState>) -> Result<StatusCode, ApiError> {
    state.registry.reset_all()?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn delete_model(
    _admin: AdminAccess,
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(id)?;
    Ok(StatusCode::NO_CONTENT)
}
