use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Path segment appended to the API prefix for every route.
pub const API_PREFIX: &str = "/api";

/// Conversation endpoint exposed by the chat backend service.
pub const CHATGPT_BASE_URI: &str = "/backend-api/v2/conversation";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("failed to read config file '{}': {source}", path.display())]
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    #[error("failed to parse config file '{}': {source}", path.display())]
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Validation error.
    #[error("config validation error: {0}")]
    Validation(String),
}

/// A chat model inserted by the seeding operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelSeed {
    pub model: String,
    #[serde(default)]
    pub priority: u32,
}

/// Credentials of the admin API superuser.
#[derive(Debug, Clone, Deserialize)]
pub struct SuperuserConfig {
    pub username: String,
    pub api_token: String,
}

#[derive(Deserialize)]
struct ConfigFile {
    telegram_bot_token: String,
    /// Register a webhook instead of long polling.
    #[serde(default)]
    start_with_webhook: bool,
    #[serde(default = "default_domain")]
    domain: String,
    #[serde(default)]
    url_prefix: String,
    #[serde(default)]
    chat_prefix: String,
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    /// Base URL of the chat backend service.
    #[serde(default = "default_gpt_base_host")]
    gpt_base_host: String,
    #[serde(default = "default_gpt_request_timeout_secs")]
    gpt_request_timeout_secs: u64,
    /// Retries for connection failures only.
    #[serde(default = "default_gpt_retries")]
    gpt_retries: u32,
    #[serde(default = "default_gpt_retry_backoff_ms")]
    gpt_retry_backoff_ms: u64,
    /// Substrings in a backend reply meaning the model is not usable.
    #[serde(default = "default_invalid_model_markers")]
    invalid_model_markers: Vec<String>,
    #[serde(default = "default_queue_capacity")]
    queue_capacity: usize,
    #[serde(default = "default_polling_timeout_secs")]
    polling_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    shutdown_grace_secs: u64,
    /// Chat receiving bug reports.
    admin_chat_id: Option<i64>,
    /// Chat receiving WARN/ERROR logs.
    log_chat_id: Option<i64>,
    /// Directory for state files (logs, database). Defaults to current directory.
    data_dir: Option<String>,
    #[serde(default = "default_db_name")]
    db_name: String,
    superuser: Option<SuperuserConfig>,
    #[serde(default)]
    default_models: Vec<ModelSeed>,
    #[serde(default = "default_author_name")]
    author_name: String,
    #[serde(default = "default_author_nickname")]
    author_nickname: String,
    #[serde(default = "default_github_url")]
    github_url: String,
    /// Path to Whisper model file (.bin) for voice transcription.
    whisper_model_path: Option<String>,
    #[serde(default = "default_speech_workers")]
    speech_workers: usize,
}

fn default_domain() -> String {
    "https://localhost".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_gpt_base_host() -> String {
    "http://chatgpt_chat_service:8858".to_string()
}

fn default_gpt_request_timeout_secs() -> u64 {
    50
}

fn default_gpt_retries() -> u32 {
    3
}

fn default_gpt_retry_backoff_ms() -> u64 {
    500
}

fn default_invalid_model_markers() -> Vec<String> {
    vec![
        "Invalid request model".to_string(),
        "return unexpected http status code".to_string(),
    ]
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_polling_timeout_secs() -> u64 {
    10
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

fn default_db_name() -> String {
    "chatgpt.db".to_string()
}

fn default_author_name() -> String {
    "Dmitry Afanasyev".to_string()
}

fn default_author_nickname() -> String {
    "Balshtg".to_string()
}

fn default_github_url() -> String {
    "https://github.com/Balshgit/gpt_chat_bot".to_string()
}

fn default_speech_workers() -> usize {
    2
}

/// Community model ids seeded when the config does not list any.
pub fn builtin_models() -> Vec<ModelSeed> {
    [
        "gpt-3.5-turbo-stream-openai",
        "gpt-4-ChatgptAi",
        "gpt-3.5-turbo-weWordle",
        "gpt-3.5-turbo-stream-DeepAi",
        "gpt-3.5-turbo-stream-yqcloud",
        "gpt-OpenAssistant-stream-HuggingChat",
        "gpt-4-turbo-stream-you",
        "gpt-3-stream-binjie",
        "gpt-3.5-turbo-stream-CodeLinkAva",
        "gpt-4-stream-ChatBase",
        "gpt-3.5-turbo-16k-stream-Ylokh",
        "gpt-3.5-turbo-stream-Vitalentum",
        "gpt-3.5-turbo-stream-GptGo",
        "gpt-3.5-turbo-stream-Aibn",
        "gpt-3.5-turbo-stream-FreeGpt",
        "gpt-3.5-turbo-stream-Cromicle",
        "gpt-4-stream-Chatgpt4Online",
        "gpt-3.5-turbo-stream-gptalk",
        "llama2",
        "gpt-3.5-turbo-stream-ChatgptDemo",
    ]
    .into_iter()
    .map(|model| ModelSeed { model: model.to_string(), priority: 0 })
    .collect()
}

#[derive(Debug)]
pub struct Config {
    pub telegram_bot_token: String,
    pub start_with_webhook: bool,
    pub domain: String,
    pub url_prefix: String,
    pub chat_prefix: String,
    pub host: String,
    pub port: u16,
    pub gpt_base_host: String,
    pub gpt_request_timeout: Duration,
    pub gpt_retries: u32,
    pub gpt_retry_backoff: Duration,
    pub invalid_model_markers: Vec<String>,
    pub queue_capacity: usize,
    pub polling_timeout: Duration,
    pub shutdown_grace: Duration,
    pub admin_chat_id: Option<i64>,
    pub log_chat_id: Option<i64>,
    /// Directory for state files (logs, database).
    pub data_dir: PathBuf,
    pub db_name: String,
    pub superuser: Option<SuperuserConfig>,
    /// Seed list for the model registry (built-in list when the file has none).
    pub default_models: Vec<ModelSeed>,
    pub author_name: String,
    pub author_nickname: String,
    pub github_url: String,
    pub whisper_model_path: Option<PathBuf>,
    pub speech_workers: usize,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;
        Self::from_file(file)
    }

    /// Parse configuration from a JSON string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(content).map_err(|e| ConfigError::ParseJson {
            path: PathBuf::from("<inline>"),
            source: e,
        })?;
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        // The webhook path is cut out of the token
        if !file.telegram_bot_token.is_ascii() || file.telegram_bot_token.len() < 30 {
            return Err(ConfigError::Validation(
                "telegram_bot_token is too short to derive the webhook path".into(),
            ));
        }
        if file.queue_capacity == 0 {
            return Err(ConfigError::Validation("queue_capacity must be greater than zero".into()));
        }
        if file.speech_workers == 0 {
            return Err(ConfigError::Validation("speech_workers must be greater than zero".into()));
        }
        if let Some(ref su) = file.superuser
            && (su.username.is_empty() || su.api_token.is_empty())
        {
            return Err(ConfigError::Validation(
                "superuser requires both username and api_token".into(),
            ));
        }

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let default_models = if file.default_models.is_empty() {
            builtin_models()
        } else {
            file.default_models
        };

        Ok(Self {
            telegram_bot_token: file.telegram_bot_token,
            start_with_webhook: file.start_with_webhook,
            domain: file.domain,
            url_prefix: file.url_prefix,
            chat_prefix: file.chat_prefix,
            host: file.host,
            port: file.port,
            gpt_base_host: file.gpt_base_host,
            gpt_request_timeout: Duration::from_secs(file.gpt_request_timeout_secs),
            gpt_retries: file.gpt_retries,
            gpt_retry_backoff: Duration::from_millis(file.gpt_retry_backoff_ms),
            invalid_model_markers: file.invalid_model_markers,
            queue_capacity: file.queue_capacity,
            polling_timeout: Duration::from_secs(file.polling_timeout_secs),
            shutdown_grace: Duration::from_secs(file.shutdown_grace_secs),
            admin_chat_id: file.admin_chat_id,
            log_chat_id: file.log_chat_id,
            data_dir,
            db_name: file.db_name,
            superuser: file.superuser,
            default_models,
            author_name: file.author_name,
            author_nickname: file.author_nickname,
            github_url: file.github_url,
            whisper_model_path: file.whisper_model_path.map(PathBuf::from),
            speech_workers: file.speech_workers,
        })
    }

    /// `/api` or `/{url_prefix}/api`.
    pub fn api_prefix(&self) -> String {
        let url_prefix = self.url_prefix.trim_matches('/');
        if url_prefix.is_empty() {
            API_PREFIX.to_string()
        } else {
            format!("/{}/{}", url_prefix, API_PREFIX.trim_matches('/'))
        }
    }

    /// Fixed-length fragment of the bot token used as the webhook path segment.
    pub fn token_part(&self) -> &str {
        // Length and ASCII-ness are checked at load time
        &self.telegram_bot_token[15..30]
    }

    pub fn bot_webhook_path(&self) -> String {
        format!("{}/{}", self.api_prefix(), self.token_part())
    }

    pub fn webhook_url(&self) -> String {
        format!(
            "{}/{}",
            self.domain.trim_end_matches('/'),
            self.bot_webhook_path().trim_start_matches('/')
        )
    }

    /// Public address of the web chat.
    pub fn website_url(&self) -> String {
        let prefix = format!("{}{}", self.url_prefix, self.chat_prefix);
        let prefix = prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/", self.domain.trim_end_matches('/'))
        } else {
            format!("{}/{}/", self.domain.trim_end_matches('/'), prefix)
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_name)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}
