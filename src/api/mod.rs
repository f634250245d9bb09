//! HTTP surface: Telegram webhook, healthchecks and the admin API.
//!
//! Every route lives under [`Config::api_prefix`]. Admin routes take an
//! [`auth::AdminAccess`] extractor and answer 403 without a valid key.

pub mod auth;
pub mod error;
pub mod models;
pub mod system;
pub mod users;
pub mod webhook;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::backend::{ChatBackend, ModelRegistry};
use crate::bot::UpdateQueue;
use crate::config::Config;
use crate::storage::UserRepository;

pub use error::ApiError;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<Config>,
    /// Producer side of the update queue.
    pub queue: UpdateQueue,
    pub registry: ModelRegistry,
    pub users: UserRepository,
    pub backend: Arc<dyn ChatBackend>,
}

pub fn router(state: ApiState) -> Router {
    let webhook_path = format!("/{}", state.config.token_part());
    let prefix = state.config.api_prefix();

    let api = Router::new()
        .route(&webhook_path, post(webhook::process_update))
        .route("/healthcheck", get(system::healthcheck))
        .route("/bot-healthcheck", get(system::bot_healthcheck))
        .route("/chatgpt/models", get(models::list_models).post(models::add_model))
        .route("/chatgpt/models/priority/reset", put(models::reset_priority))
        .route("/chatgpt/models/{id}/priority", put(models::change_priority))
        .route("/chatgpt/models/{id}", delete(models::delete_model))
        .route("/users/{id}/ban", put(users::ban_user).delete(users::unban_user))
        .with_state(state);

    Router::new()
        .nest(&prefix, api)
        .layer(CatchPanicLayer::custom(error::handle_panic))
        .layer(TraceLayer::new_for_http())
}
