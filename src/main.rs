use std::sync::Arc;

use anyhow::Context;
use teloxide::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use gptbot::api::{self, ApiState};
use gptbot::backend::{ChatBackend, ModelRegistry, ProxyClient};
use gptbot::bot::{BotApp, ChatTransport, Handlers, SpeechToText, TelegramTransport};
use gptbot::config::Config;
use gptbot::storage::{Database, UserRepository};
use gptbot::telegram_log;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| "gptbot.json".to_string());
    let config = Arc::new(Config::load(&config_path)?);

    let bot = Bot::new(&config.telegram_bot_token);
    let transport: Arc<dyn ChatTransport> = Arc::new(TelegramTransport::new(bot));

    // Setup logging
    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir).with_context(|| format!("creating log dir {}", log_dir.display()))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("gptbot.log"))
        .context("opening log file")?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_writer(std::io::stdout).with_filter(
                tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
            ),
        )
        .with(
            tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false).with_filter(
                tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
            ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(transport.clone(), log_chat_id);
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting gptbot...");
    info!("Loaded config from {config_path}");

    let db = Database::open(&config.db_path()).context("opening database")?;
    let models = ModelRegistry::new(db.clone());
    let users = UserRepository::new(db);

    if let Some(superuser) = &config.superuser {
        users.ensure_superuser(&superuser.username, &superuser.api_token)?;
    } else {
        warn!("No superuser configured, admin API is disabled");
    }

    let backend: Arc<dyn ChatBackend> = Arc::new(ProxyClient::new(&config)?);

    let speech = match &config.whisper_model_path {
        Some(path) => match SpeechToText::new(path, config.speech_workers) {
            Ok(stt) => Some(Arc::new(stt)),
            Err(e) => {
                warn!("Voice recognition disabled: {e}");
                None
            }
        },
        None => None,
    };

    let handlers = Arc::new(Handlers::new(
        config.clone(),
        transport.clone(),
        models.clone(),
        backend.clone(),
        users.clone(),
        speech,
    ));
    let app = BotApp::new(config.clone(), transport, handlers);
    app.start().await.context("starting bot runtime")?;

    let router = api::router(ApiState {
        config: config.clone(),
        queue: app.queue(),
        registry: models,
        users,
        backend,
    });

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("HTTP server listening on {addr}, api prefix {}", config.api_prefix());

    let served = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await;

    app.shutdown().await;
    served.context("http server error")?;
    info!("👋 Bye");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
