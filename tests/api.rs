//! HTTP surface tests driving the router in-process.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tower::ServiceExt;

use gptbot::api::{self, ApiState};
use gptbot::backend::{ChatBackend, ModelRegistry, ProxyOutcome};
use gptbot::bot::queue::{self, UpdateConsumer};
use gptbot::config::Config;
use gptbot::storage::{Database, NewUser, UserRepository};

const TOKEN: &str = "123456789:AABBCCDDEEFFaabbccddeeff-1234567890";
const WEBHOOK: &str = "/api/CDDEEFFaabbccdd";
const API_KEY: &str = "super-secret-token";

/// Answers unless the model name says otherwise.
struct StubBackend;

#[async_trait]
impl ChatBackend for StubBackend {
    async fn ask(&self, _question: &str, model: &str) -> ProxyOutcome {
        match model {
            "broken" => ProxyOutcome::InvalidModel { marker: "Invalid request model".into(), model: model.into() },
            "down" => ProxyOutcome::Transport("connection refused".into()),
            _ => ProxyOutcome::Answer("Hello there".into()),
        }
    }
}

struct TestApp {
    router: Router,
    registry: ModelRegistry,
    users: UserRepository,
    consumer: UpdateConsumer,
}

fn test_app(queue_capacity: usize) -> TestApp {
    let config = Arc::new(
        Config::parse(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "superuser": {{ "username": "admin", "api_token": "{API_KEY}" }} }}"#
        ))
        .unwrap(),
    );
    let db = Database::in_memory().unwrap();
    let registry = ModelRegistry::new(db.clone());
    let users = UserRepository::new(db);
    users.ensure_superuser("admin", API_KEY).unwrap();
    let (queue, consumer) = queue::channel(queue_capacity);

    let router = api::router(ApiState {
        config,
        queue,
        registry: registry.clone(),
        users: users.clone(),
        backend: Arc::new(StubBackend),
    });
    TestApp { router, registry, users, consumer }
}

fn request(method: &str, uri: &str, api_key: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = api_key {
        builder = builder.header("BOT-API-KEY", key);
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn telegram_update(update_id: i64, text: &str) -> Value {
    json!({
        "update_id": update_id,
        "message": {
            "message_id": 1,
            "date": 1700000000,
            "chat": { "id": 42, "type": "private", "first_name": "Bob" },
            "from": { "id": 42, "is_bot": false, "first_name": "Bob" },
            "text": text
        }
    })
}

// =============================================================================
// WEBHOOK
// =============================================================================

#[tokio::test]
async fn test_webhook_enqueues_update() {
    let mut app = test_app(8);
    let response = app
        .router
        .oneshot(request("POST", WEBHOOK, None, Some(telegram_update(7, "hi"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(app.consumer.dequeue().await.unwrap().id, 7);
}

#[tokio::test]
async fn test_webhook_drops_malformed_body() {
    let app = test_app(8);
    let response = app
        .router
        .oneshot(request("POST", WEBHOOK, None, Some(json!({ "hello": "world" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_webhook_full_queue_is_unavailable() {
    let app = test_app(1);
    let first = app
        .router
        .clone()
        .oneshot(request("POST", WEBHOOK, None, Some(telegram_update(1, "a"))))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app
        .router
        .oneshot(request("POST", WEBHOOK, None, Some(telegram_update(2, "b"))))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(second).await["status"], 503);
}

#[tokio::test]
async fn test_wrong_token_path_is_not_found() {
    let app = test_app(8);
    let response = app
        .router
        .oneshot(request("POST", "/api/not-the-token", None, Some(telegram_update(1, "a"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// HEALTHCHECKS
// =============================================================================

#[tokio::test]
async fn test_healthcheck() {
    let app = test_app(8);
    let response = app.router.oneshot(request("GET", "/api/healthcheck", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bot_healthcheck_follows_current_model() {
    let app = test_app(8);

    let empty = app.router.clone().oneshot(request("GET", "/api/bot-healthcheck", None, None)).await.unwrap();
    assert_eq!(empty.status(), StatusCode::INTERNAL_SERVER_ERROR);

    app.registry.add("llama2", 1).unwrap();
    let ok = app.router.clone().oneshot(request("GET", "/api/bot-healthcheck", None, None)).await.unwrap();
    assert_eq!(ok.status(), StatusCode::OK);

    let broken = app.registry.add("broken", 5).unwrap();
    let invalid = app.router.clone().oneshot(request("GET", "/api/bot-healthcheck", None, None)).await.unwrap();
    assert_eq!(invalid.status(), StatusCode::INTERNAL_SERVER_ERROR);

    app.registry.delete(broken.id).unwrap();
    app.registry.add("down", 9).unwrap();
    let down = app.router.oneshot(request("GET", "/api/bot-healthcheck", None, None)).await.unwrap();
    assert_eq!(down.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// =============================================================================
// MODELS
// =============================================================================

#[tokio::test]
async fn test_list_models_in_priority_order() {
    let app = test_app(8);
    app.registry.add("zero", 0).unwrap();
    app.registry.add("answer", 42).unwrap();
    app.registry.add("one", 1).unwrap();

    let response = app.router.oneshot(request("GET", "/api/chatgpt/models", None, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let priorities: Vec<u64> = body["data"].as_array().unwrap().iter().map(|m| m["priority"].as_u64().unwrap()).collect();
    assert_eq!(priorities, vec![42, 1, 0]);
}

#[tokio::test]
async fn test_admin_routes_require_api_key() {
    let app = test_app(8);
    let model = app.registry.add("llama2", 1).unwrap();

    let cases = [
        request("POST", "/api/chatgpt/models", None, Some(json!({ "model": "x" }))),
        request("POST", "/api/chatgpt/models", Some("wrong"), Some(json!({ "model": "x" }))),
        request("PUT", &format!("/api/chatgpt/models/{}/priority", model.id), None, Some(json!({ "priority": 3 }))),
        request("PUT", "/api/chatgpt/models/priority/reset", Some("wrong"), None),
        request("DELETE", &format!("/api/chatgpt/models/{}", model.id), None, None),
        request("PUT", "/api/users/1/ban", None, Some(json!({ "reason": "spam" }))),
    ];
    for req in cases {
        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "PermissionMissing");
    }
    assert_eq!(app.registry.list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_add_model_is_insert_or_ignore() {
    let app = test_app(8);
    let first = app
        .router
        .clone()
        .oneshot(request("POST", "/api/chatgpt/models", Some(API_KEY), Some(json!({ "model": "modelX", "priority": 5 }))))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let created = json_body(first).await;
    assert_eq!(created["model"], "modelX");
    assert_eq!(created["priority"], 5);

    let second = app
        .router
        .oneshot(request("POST", "/api/chatgpt/models", Some(API_KEY), Some(json!({ "model": "modelX", "priority": 9 }))))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    assert_eq!(json_body(second).await["priority"], 5);
    assert_eq!(app.registry.list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_change_priority_and_reset() {
    let app = test_app(8);
    app.registry.add("a", 1).unwrap();
    let b = app.registry.add("b", 0).unwrap();

    let response = app
        .router
        .clone()
        .oneshot(request("PUT", &format!("/api/chatgpt/models/{}/priority", b.id), Some(API_KEY), Some(json!({ "priority": 10 }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(app.registry.current().unwrap(), "b");

    let response = app
        .router
        .oneshot(request("PUT", "/api/chatgpt/models/priority/reset", Some(API_KEY), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert!(app.registry.list().unwrap().iter().all(|m| m.priority == 0));
}

#[tokio::test]
async fn test_unknown_model_is_not_found() {
    let app = test_app(8);
    let response = app
        .router
        .clone()
        .oneshot(request("PUT", "/api/chatgpt/models/999/priority", Some(API_KEY), Some(json!({ "priority": 1 }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.router.oneshot(request("DELETE", "/api/chatgpt/models/999", Some(API_KEY), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_model() {
    let app = test_app(8);
    let model = app.registry.add("gone", 1).unwrap();
    let response = app
        .router
        .oneshot(request("DELETE", &format!("/api/chatgpt/models/{}", model.id), Some(API_KEY), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.registry.list().unwrap().is_empty());
}

// =============================================================================
// USERS
// =============================================================================

#[tokio::test]
async fn test_ban_and_unban_user() {
    let app = test_app(8);
    app.users
        .get_or_create(&NewUser { id: 42, username: Some("bob".into()), first_name: Some("Bob".into()), last_name: None })
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(request("PUT", "/api/users/42/ban", Some(API_KEY), Some(json!({ "reason": "spam" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let status = app.users.ban_status(42).unwrap();
    assert!(status.is_banned);
    assert_eq!(status.ban_reason.as_deref(), Some("spam"));

    let response = app.router.clone().oneshot(request("DELETE", "/api/users/42/ban", Some(API_KEY), None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(!app.users.ban_status(42).unwrap().is_banned);

    let response = app
        .router
        .oneshot(request("PUT", "/api/users/7/ban", Some(API_KEY), Some(json!({ "reason": "x" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
