//! HTTP client for the chat backend service.
//!
//! `ask` never fails: every outcome, including transport errors, is folded
//! into a [`ProxyOutcome`] that can be shown to the user.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{CHATGPT_BASE_URI, Config};

pub const TRY_AGAIN_REPLY: &str =
    "Something went wrong, please try again or contact the administrator";
pub const EVERYTHING_BROKE_REPLY: &str = "Everything broke :(";

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Classified result of one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyOutcome {
    Answer(String),
    /// The body contained one of the configured invalid-model markers.
    InvalidModel { marker: String, model: String },
    BadStatus(u16),
    Transport(String),
}

impl ProxyOutcome {
    /// Text sent back to the chat.
    pub fn user_text(&self) -> &str {
        match self {
            ProxyOutcome::Answer(text) => text,
            ProxyOutcome::InvalidModel { .. } | ProxyOutcome::BadStatus(_) => TRY_AGAIN_REPLY,
            ProxyOutcome::Transport(_) => EVERYTHING_BROKE_REPLY,
        }
    }

    /// Operator-facing description, e.g. `Invalid request model: llama2`.
    pub fn diagnostic(&self) -> String {
        match self {
            ProxyOutcome::Answer(_) => "ok".to_string(),
            ProxyOutcome::InvalidModel { marker, model } => format!("{marker}: {model}"),
            ProxyOutcome::BadStatus(status) => format!("unexpected status {status}"),
            ProxyOutcome::Transport(e) => format!("transport error: {e}"),
        }
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, ProxyOutcome::Answer(_))
    }
}

/// Anything that can answer a question with a given model.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn ask(&self, question: &str, model: &str) -> ProxyOutcome;
}

#[derive(Serialize)]
struct ConversationRequest<'a> {
    conversation_id: String,
    action: &'static str,
    model: &'a str,
    jailbreak: &'static str,
    meta: RequestMeta<'a>,
}

#[derive(Serialize)]
struct RequestMeta<'a> {
    id: u64,
    content: RequestContent<'a>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    conversation: Vec<RequestPart<'a>>,
    internet_access: bool,
    content_type: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    content: &'a str,
    role: &'static str,
}

impl<'a> ConversationRequest<'a> {
    fn new(question: &'a str, model: &'a str) -> Self {
        Self {
            conversation_id: Uuid::new_v4().to_string(),
            action: "_ask",
            model,
            jailbreak: "default",
            meta: RequestMeta {
                id: rand::thread_rng().gen_range(10u64.pow(18)..10u64.pow(19)),
                content: RequestContent {
                    conversation: Vec::new(),
                    internet_access: false,
                    content_type: "text",
                    parts: vec![RequestPart { content: question, role: "user" }],
                },
            },
        }
    }
}

/// Upper bound for a single retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Exponential backoff for requests that never reached the backend.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    retries: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt`, starting at 1.
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff
            .checked_mul(factor)
            .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// retries are used up.
    async fn run<T, E, F, Fut>(&self, mut op: F, retryable: impl Fn(&E) -> bool) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if retryable(&e) && attempt < self.retries => {
                    attempt += 1;
                    let delay = self.delay(attempt);
                    warn!(attempt, retries = self.retries, "chat backend unreachable: {e}, retrying in {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
                result => return result,
            }
        }
    }
}

pub struct ProxyClient {
    http: reqwest::Client,
    endpoint: String,
    retry: RetryPolicy,
    invalid_model_markers: Vec<String>,
}

impl ProxyClient {
    pub fn new(config: &Config) -> Result<Self, ProxyError> {
        let http = reqwest::Client::builder()
            .timeout(config.gpt_request_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}{}", config.gpt_base_host.trim_end_matches('/'), CHATGPT_BASE_URI),
            retry: RetryPolicy { retries: config.gpt_retries, backoff: config.gpt_retry_backoff },
            invalid_model_markers: config.invalid_model_markers.clone(),
        })
    }

    /// POST the payload, retrying only when the connection could not be established.
    async fn post(&self, payload: &ConversationRequest<'_>) -> Result<(StatusCode, String), reqwest::Error> {
        let (http, endpoint) = (&self.http, self.endpoint.as_str());
        self.retry
            .run(
                || async move {
                    let response = http.post(endpoint).json(payload).send().await?;
                    let status = response.status();
                    Ok::<_, reqwest::Error>((status, response.text().await?))
                },
                reqwest::Error::is_connect,
            )
            .await
    }

    fn classify(&self, status: StatusCode, body: String, model: &str) -> ProxyOutcome {
        if let Some(marker) = self.invalid_model_markers.iter().find(|m| body.contains(m.as_str())) {
            return ProxyOutcome::InvalidModel { marker: marker.clone(), model: model.to_string() };
        }
        if status != StatusCode::OK {
            return ProxyOutcome::BadStatus(status.as_u16());
        }
        ProxyOutcome::Answer(body)
    }
}

#[async_trait]
impl ChatBackend for ProxyClient {
    async fn ask(&self, question: &str, model: &str) -> ProxyOutcome {
        let payload = ConversationRequest::new(question, model);
        let outcome = match self.post(&payload).await {
            Ok((status, body)) => self.classify(status, body, model),
            Err(e) => {
                error!(model, "error getting data from chat api: {e}");
                return ProxyOutcome::Transport(e.to_string());
            }
        };
        match &outcome {
            ProxyOutcome::Answer(_) => {}
            ProxyOutcome::InvalidModel { .. } => info!(model, "{}", outcome.diagnostic()),
            ProxyOutcome::BadStatus(status) => info!(model, status, "got bad response status from chat api"),
            ProxyOutcome::Transport(_) => {}
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123456789:AABBCCDDEEFFaabbccddeeff-1234567890";

    fn config_for(base: &str) -> Config {
        Config::parse(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "gpt_base_host": "{base}", "gpt_request_timeout_secs": 5, "gpt_retry_backoff_ms": 10 }}"#
        ))
        .unwrap()
    }

    async fn backend_replying(template: ResponseTemplate) -> (MockServer, ProxyClient) {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHATGPT_BASE_URI))
            .respond_with(template)
            .mount(&server)
            .await;
        let client = ProxyClient::new(&config_for(&server.uri())).unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_answer_is_returned_verbatim() {
        let (_server, client) = backend_replying(ResponseTemplate::new(200).set_body_string("Hello there")).await;
        let outcome = client.ask("hi", "llama2").await;
        assert_eq!(outcome, ProxyOutcome::Answer("Hello there".into()));
        assert_eq!(outcome.user_text(), "Hello there");
    }

    #[tokio::test]
    async fn test_invalid_model_marker() {
        let (_server, client) =
            backend_replying(ResponseTemplate::new(200).set_body_string("Invalid request model")).await;
        let outcome = client.ask("hi", "gpt-4-ChatgptAi").await;
        assert!(matches!(outcome, ProxyOutcome::InvalidModel { .. }));
        assert_eq!(outcome.user_text(), TRY_AGAIN_REPLY);
        assert_eq!(outcome.diagnostic(), "Invalid request model: gpt-4-ChatgptAi");
    }

    #[tokio::test]
    async fn test_unexpected_status_marker_wins_over_status() {
        let (_server, client) = backend_replying(
            ResponseTemplate::new(502).set_body_string("upstream return unexpected http status code 429"),
        )
        .await;
        let outcome = client.ask("hi", "llama2").await;
        assert_eq!(outcome.diagnostic(), "return unexpected http status code: llama2");
    }

    #[tokio::test]
    async fn test_bad_status() {
        let (_server, client) = backend_replying(ResponseTemplate::new(500).set_body_string("oops")).await;
        let outcome = client.ask("hi", "llama2").await;
        assert_eq!(outcome, ProxyOutcome::BadStatus(500));
        assert_eq!(outcome.user_text(), TRY_AGAIN_REPLY);
    }

    #[tokio::test]
    async fn test_bad_status_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;
        let client = ProxyClient::new(&config_for(&server.uri())).unwrap();
        client.ask("hi", "llama2").await;
    }

    #[tokio::test]
    async fn test_payload_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(CHATGPT_BASE_URI))
            .and(body_partial_json(serde_json::json!({
                "action": "_ask",
                "model": "llama2",
                "jailbreak": "default",
                "meta": {
                    "content": {
                        "conversation": [],
                        "internet_access": false,
                        "content_type": "text",
                        "parts": [{ "content": "what is rust?", "role": "user" }]
                    }
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string("a language"))
            .expect(1)
            .mount(&server)
            .await;
        let client = ProxyClient::new(&config_for(&server.uri())).unwrap();
        assert!(client.ask("what is rust?", "llama2").await.is_answer());
    }

    #[test]
    fn test_conversation_ids_are_fresh() {
        let a = ConversationRequest::new("q", "m");
        let b = ConversationRequest::new("q", "m");
        assert_ne!(a.conversation_id, b.conversation_id);
        assert!((10u64.pow(18)..10u64.pow(19)).contains(&a.meta.id));
    }

    #[tokio::test]
    async fn test_retries_stop_after_limit() {
        let policy = RetryPolicy { retries: 3, backoff: Duration::from_millis(1) };
        let calls = &AtomicU32::new(0);
        let result: Result<(), &str> = policy
            .run(
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("connection refused")
                },
                |_: &&str| true,
            )
            .await;
        assert_eq!(result, Err("connection refused"));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let policy = RetryPolicy { retries: 3, backoff: Duration::from_millis(1) };
        let calls = &AtomicU32::new(0);
        let result: Result<u32, &str> = policy
            .run(
                || async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 { Err("connection refused") } else { Ok(n) }
                },
                |_: &&str| true,
            )
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_at_once() {
        let policy = RetryPolicy { retries: 3, backoff: Duration::from_millis(1) };
        let calls = &AtomicU32::new(0);
        let result: Result<(), &str> = policy
            .run(
                || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("bad request")
                },
                |_: &&str| false,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_retry_delay_doubles_and_is_capped() {
        let policy = RetryPolicy { retries: 3, backoff: Duration::from_millis(500) };
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
        assert_eq!(policy.delay(3), Duration::from_millis(2000));
        assert_eq!(policy.delay(40), MAX_RETRY_DELAY);

        let huge = RetryPolicy { retries: 3, backoff: Duration::from_millis(u64::MAX) };
        assert_eq!(huge.delay(1), MAX_RETRY_DELAY);
        assert_eq!(huge.delay(3), MAX_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_retried() {
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let config = Config::parse(&format!(
            r#"{{ "telegram_bot_token": "{TOKEN}", "gpt_base_host": "http://127.0.0.1:{port}", "gpt_retries": 3, "gpt_retry_backoff_ms": 50 }}"#
        ))
        .unwrap();
        let client = ProxyClient::new(&config).unwrap();

        let started = std::time::Instant::now();
        let outcome = client.ask("hi", "llama2").await;
        assert!(matches!(outcome, ProxyOutcome::Transport(_)));
        // 50 + 100 + 200 ms of backoff between the four attempts
        assert!(started.elapsed() >= Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // Bind then drop to get a port nothing listens on
        let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let client = ProxyClient::new(&config_for(&format!("http://127.0.0.1:{port}"))).unwrap();
        let outcome = client.ask("hi", "llama2").await;
        assert!(matches!(outcome, ProxyOutcome::Transport(_)));
        assert_eq!(outcome.user_text(), EVERYTHING_BROKE_REPLY);
    }
}
