//! The single consumer loop: dequeue, spawn a handler task, yield.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::commands::Handlers;
use super::queue::UpdateConsumer;
use super::update::Update;

pub struct Dispatcher {
    handlers: Arc<Handlers>,
    grace: Duration,
}

impl Dispatcher {
    pub fn new(handlers: Arc<Handlers>, grace: Duration) -> Self {
        Self { handlers, grace }
    }

    /// Consume until cancelled (or every producer is gone), then dispatch
    /// what is already buffered and wait up to the grace period for
    /// in-flight handlers.
    pub async fn run(self, mut consumer: UpdateConsumer, cancel: CancellationToken) {
        let mut tasks = JoinSet::new();
        info!("🚚 Update dispatcher started");

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = consumer.dequeue() => next,
            };
            let Some(update) = next else { break };
            self.spawn(&mut tasks, update);
            reap_finished(&mut tasks);
            tokio::task::yield_now().await;
        }

        consumer.close();
        while let Some(update) = consumer.dequeue().await {
            self.spawn(&mut tasks, update);
        }

        self.drain(tasks).await;
        info!("Update dispatcher stopped");
    }

    fn spawn(&self, tasks: &mut JoinSet<()>, update: Update) {
        let handlers = self.handlers.clone();
        let update_id = update.id;
        debug!(update_id, "dispatching update");
        tasks.spawn(async move {
            if let Err(e) = handlers.handle(update).await {
                error!(update_id, "handler failed: {e}");
            }
        });
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }
        let in_flight = tasks.len();
        let finished = tokio::time::timeout(self.grace, async {
            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        })
        .await;
        if finished.is_err() {
            warn!(in_flight, remaining = tasks.len(), "grace period elapsed, leaving handlers running");
            tasks.detach_all();
        }
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        log_join(result);
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result
        && e.is_panic()
    {
        error!("handler task panicked: {e}");
    }
}
