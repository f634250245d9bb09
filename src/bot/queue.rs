//! Bounded FIFO between update producers (webhook, long polling) and the
//! single dispatcher loop.
//!
//! Producers never wait: a full or closed queue is reported immediately so
//! the webhook can answer the chat platform without delay. There is exactly
//! one [`UpdateConsumer`]; it is not `Clone`.

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::update::Update;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("update queue is full")]
    Full,
    #[error("update queue is closed")]
    Closed,
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct UpdateQueue {
    tx: mpsc::Sender<Update>,
}

pub struct UpdateConsumer {
    rx: mpsc::Receiver<Update>,
}

pub fn channel(capacity: usize) -> (UpdateQueue, UpdateConsumer) {
    let (tx, rx) = mpsc::channel(capacity);
    (UpdateQueue { tx }, UpdateConsumer { rx })
}

impl UpdateQueue {
    pub fn enqueue(&self, update: Update) -> Result<(), EnqueueError> {
        self.tx.try_send(update).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UpdateConsumer {
    /// Next update in arrival order. Suspends while the queue is empty;
    /// `None` once closed and drained.
    pub async fn dequeue(&mut self) -> Option<Update> {
        self.rx.recv().await
    }

    /// Refuse further enqueues. Already buffered updates stay readable.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::update::{CallbackQuery, Sender, UpdateKind};
    use std::time::{Duration, Instant};

    fn update(id: i64) -> Update {
        Update {
            id,
            kind: UpdateKind::CallbackQuery(CallbackQuery {
                from: Sender { id: 1, username: None, first_name: "A".into(), last_name: None },
                chat_id: Some(1),
                data: Some("about_me".into()),
            }),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let (queue, mut consumer) = channel(64);
        for id in 0..50 {
            queue.enqueue(update(id)).unwrap();
        }
        assert_eq!(queue.len(), 50);
        for id in 0..50 {
            assert_eq!(consumer.dequeue().await.unwrap().id, id);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_does_not_block() {
        let (queue, _consumer) = channel(2);
        queue.enqueue(update(1)).unwrap();
        queue.enqueue(update(2)).unwrap();

        let started = Instant::now();
        assert_eq!(queue.enqueue(update(3)), Err(EnqueueError::Full));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_closed_queue_rejects_and_drains() {
        let (queue, mut consumer) = channel(8);
        queue.enqueue(update(1)).unwrap();
        consumer.close();

        assert_eq!(queue.enqueue(update(2)), Err(EnqueueError::Closed));
        assert_eq!(consumer.dequeue().await.unwrap().id, 1);
        assert!(consumer.dequeue().await.is_none());
    }

    #[tokio::test]
    async fn test_dropped_consumer_closes_queue() {
        let (queue, consumer) = channel(8);
        drop(consumer);
        assert_eq!(queue.enqueue(update(1)), Err(EnqueueError::Closed));
    }
}
