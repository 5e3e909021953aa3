use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{BoquitaError, Result};

/// Bounded FIFO handing items from producers to a single consumer.
///
/// Pushing blocks while the queue is full; nothing is ever dropped.
/// Pulling blocks while it is empty, until an item arrives or the caller's
/// cancellation token fires.
#[derive(Debug)]
pub struct WorkQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Mutex<mpsc::Receiver<T>>,
    capacity: usize,
}

impl<T: Send> WorkQueue<T> {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(BoquitaError::Validation(
                "queue capacity must be at least 1".to_string(),
            ));
        }
        let (tx, rx) = mpsc::channel(capacity);
        Ok(Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        })
    }

    /// Append an item, waiting for a free slot while the queue is full.
    pub async fn push(&self, item: T) -> Result<()> {
        self.tx
            .send(item)
            .await
            .map_err(|_| BoquitaError::QueueClosed)
    }

    /// Like [`push`](Self::push) but gives up when `cancel` fires first.
    pub async fn push_cancellable(&self, item: T, cancel: &CancellationToken) -> Result<()> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BoquitaError::QueueCancelled),
            result = self.push(item) => result,
        }
    }

    /// Wait for the next item. Returns `QueueCancelled` if `cancel` fires first.
    pub async fn pull(&self, cancel: &CancellationToken) -> Result<T> {
        let mut rx = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(BoquitaError::QueueCancelled),
            rx = self.rx.lock() => rx,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BoquitaError::QueueCancelled),
            item = rx.recv() => item.ok_or(BoquitaError::QueueClosed),
        }
    }

    /// Take the next item if one is ready, without waiting.
    pub async fn try_pull(&self) -> Option<T> {
        self.rx.lock().await.try_recv().ok()
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.tx.capacity() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
