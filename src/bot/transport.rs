//! Chat transport: the operations the bot needs from Telegram.

use std::time::Duration;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use teloxide::{DownloadError, RequestError};
use thiserror::Error;
use tracing::{debug, warn};

use super::update::Update;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("telegram request failed: {0}")]
    Request(#[from] RequestError),
    #[error("file download failed: {0}")]
    Download(#[from] DownloadError),
    #[error("invalid webhook url '{0}'")]
    InvalidUrl(String),
}

/// Presentation flags for an outgoing message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub html: bool,
    /// Inline keyboard rows of (label, callback data).
    pub keyboard: Vec<Vec<(String, String)>>,
    pub silent: bool,
}

impl SendOptions {
    pub fn html() -> Self {
        Self { html: true, ..Self::default() }
    }

    pub fn with_keyboard(mut self, rows: Vec<Vec<(&str, &str)>>) -> Self {
        self.keyboard = rows
            .into_iter()
            .map(|row| row.into_iter().map(|(l, d)| (l.to_string(), d.to_string())).collect())
            .collect();
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

/// Result of one long-poll round.
#[derive(Debug, Default)]
pub struct PollBatch {
    /// Highest update id seen, including updates that were dropped.
    pub last_id: Option<i64>,
    pub updates: Vec<Update>,
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str, options: SendOptions) -> Result<(), TransportError>;

    async fn set_webhook(&self, url: &str) -> Result<(), TransportError>;

    async fn delete_webhook(&self) -> Result<(), TransportError>;

    /// Currently registered webhook, if any.
    async fn webhook_url(&self) -> Result<Option<String>, TransportError>;

    async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<PollBatch, TransportError>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TransportError>;
}

/// Telegram Bot API transport backed by teloxide.
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ChatTransport for TelegramTransport {
    async fn send_message(&self, chat_id: i64, text: &str, options: SendOptions) -> Result<(), TransportError> {
        let mut request = self.bot.send_message(ChatId(chat_id), text);
        if options.html {
            request = request.parse_mode(ParseMode::Html);
        }
        if !options.keyboard.is_empty() {
            let rows = options.keyboard.into_iter().map(|row| {
                row.into_iter()
                    .map(|(label, data)| InlineKeyboardButton::callback(label, data))
                    .collect::<Vec<_>>()
            });
            request = request.reply_markup(InlineKeyboardMarkup::new(rows));
        }
        if options.silent {
            request = request.disable_notification(true);
        }
        request.await.map_err(|e| {
            warn!("Failed to send to chat {}: {e}", chat_id);
            TransportError::from(e)
        })?;
        Ok(())
    }

    async fn set_webhook(&self, url: &str) -> Result<(), TransportError> {
        let url = reqwest::Url::parse(url).map_err(|_| TransportError::InvalidUrl(url.to_string()))?;
        self.bot.set_webhook(url).await?;
        Ok(())
    }

    async fn delete_webhook(&self) -> Result<(), TransportError> {
        self.bot.delete_webhook().await?;
        Ok(())
    }

    async fn webhook_url(&self) -> Result<Option<String>, TransportError> {
        let info = self.bot.get_webhook_info().await?;
        Ok(info.url.map(|url| url.to_string()))
    }

    async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<PollBatch, TransportError> {
        let mut request = self.bot.get_updates().timeout(timeout.as_secs() as u32);
        if let Some(offset) = offset {
            request = request.offset(offset as i32);
        }
        let raw = request.await?;

        let mut batch = PollBatch::default();
        for update in raw {
            let id = i64::from(update.id.0);
            batch.last_id = Some(batch.last_id.map_or(id, |last| last.max(id)));
            match Update::from_telegram(update) {
                Some(update) => batch.updates.push(update),
                None => debug!(update_id = id, "dropping unsupported update"),
            }
        }
        Ok(batch)
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TransportError> {
        let file = self.bot.get_file(FileId(file_id.to_string())).await?;
        let mut data = Vec::new();
        self.bot.download_file(&file.path, &mut data).await?;
        debug!("Downloaded file {} ({} bytes)", file_id, data.len());
        Ok(data)
    }
}
