//! Bot runtime: webhook or long-polling ingestion feeding the dispatcher,
//! plus graceful shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::commands::Handlers;
use super::dispatcher::Dispatcher;
use super::queue::{self, EnqueueError, UpdateConsumer, UpdateQueue};
use super::transport::{ChatTransport, TransportError};
use crate::config::Config;

const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);
/// Pause before polling again when the queue could not take a batch.
const QUEUE_FULL_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Webhook,
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Running(Mode),
    ShuttingDown,
    Stopped,
}

pub struct BotApp {
    config: Arc<Config>,
    transport: Arc<dyn ChatTransport>,
    handlers: Arc<Handlers>,
    queue: UpdateQueue,
    consumer: Mutex<Option<UpdateConsumer>>,
    lifecycle: Mutex<Lifecycle>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl BotApp {
    pub fn new(config: Arc<Config>, transport: Arc<dyn ChatTransport>, handlers: Arc<Handlers>) -> Self {
        let (queue, consumer) = queue::channel(config.queue_capacity);
        Self {
            config,
            transport,
            handlers,
            queue,
            consumer: Mutex::new(Some(consumer)),
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            cancel: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Producer handle for the webhook route.
    pub fn queue(&self) -> UpdateQueue {
        self.queue.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        *self.lifecycle.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    /// Register the webhook unless the transport already has one.
    /// Returns whether a registration call was made.
    pub async fn set_webhook(&self) -> Result<bool, TransportError> {
        if let Some(current) = self.transport.webhook_url().await? {
            info!("Webhook already registered at {}, skipping", current);
            return Ok(false);
        }
        let url = self.config.webhook_url();
        self.transport.set_webhook(&url).await?;
        info!("Webhook registered at {}", url);
        Ok(true)
    }

    /// Start ingestion in the configured mode and spawn the dispatcher.
    pub async fn start(&self) -> Result<(), TransportError> {
        let Some(consumer) = self.consumer.lock().unwrap_or_else(|p| p.into_inner()).take() else {
            warn!("Bot runtime already started");
            return Ok(());
        };
        let mode = if self.config.start_with_webhook { Mode::Webhook } else { Mode::Polling };

        let mut tasks = self.tasks.lock().await;
        match mode {
            Mode::Webhook => {
                self.set_webhook().await?;
            }
            Mode::Polling => {
                // Telegram refuses getUpdates while a webhook is set
                self.transport.delete_webhook().await?;
                tasks.push(tokio::spawn(poll_loop(
                    self.transport.clone(),
                    self.queue.clone(),
                    self.config.polling_timeout,
                    self.cancel.clone(),
                )));
            }
        }

        let dispatcher = Dispatcher::new(self.handlers.clone(), self.config.shutdown_grace);
        tasks.push(tokio::spawn(dispatcher.run(consumer, self.cancel.clone())));
        self.set_lifecycle(Lifecycle::Running(mode));
        info!("🚀 Bot started in {:?} mode", mode);
        Ok(())
    }

    /// Deregister the webhook, stop polling, let the dispatcher drain.
    /// Safe to call more than once and in either mode.
    pub async fn shutdown(&self) {
        if self.lifecycle() == Lifecycle::Stopped {
            return;
        }
        self.set_lifecycle(Lifecycle::ShuttingDown);
        info!("Shutting down bot runtime");

        self.cancel.cancel();
        if let Err(e) = self.transport.delete_webhook().await {
            warn!("Failed to delete webhook: {e}");
        }

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Bot runtime task ended abnormally: {e}");
            }
        }
        self.set_lifecycle(Lifecycle::Stopped);
        info!("Bot runtime stopped");
    }
}

pub(super) async fn poll_loop(
    transport: Arc<dyn ChatTransport>,
    queue: UpdateQueue,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let mut offset: Option<i64> = None;
    let mut backoff = Duration::from_secs(1);
    info!("📡 Long polling started");

    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => break,
            batch = transport.get_updates(offset, timeout) => batch,
        };
        match batch {
            Ok(batch) => {
                backoff = Duration::from_secs(1);
                if let Some(last) = batch.last_id {
                    offset = Some(last + 1);
                }
                let mut rejected = None;
                for update in batch.updates {
                    let update_id = update.id;
                    match queue.enqueue(update) {
                        Ok(()) => {}
                        Err(EnqueueError::Full) => {
                            rejected = Some(update_id);
                            break;
                        }
                        Err(EnqueueError::Closed) => {
                            info!("Update queue closed, stopping long polling");
                            return;
                        }
                    }
                }
                // Telegram redelivers everything from the first rejected update on
                if let Some(update_id) = rejected {
                    offset = Some(update_id);
                    warn!(update_id, "update queue full, retrying in {:?}", QUEUE_FULL_DELAY);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(QUEUE_FULL_DELAY) => {}
                    }
                }
            }
            Err(e) => {
                warn!("getUpdates failed: {e}, retrying in {:?}", backoff);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_POLL_BACKOFF);
            }
        }
    }
    info!("Long polling stopped");
}
