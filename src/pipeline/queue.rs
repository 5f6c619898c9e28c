//! Bounded image queue with an explicit end-of-stream marker.

use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::PipelineError;
use crate::image::TaggedImage;

/// One element travelling through a pipeline queue.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Image(TaggedImage),
    /// Nothing follows; every stage forwards it once and stops.
    EndOfStream,
}

impl QueueItem {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, QueueItem::EndOfStream)
    }
}

/// Create a queue holding at most `capacity` items (at least one).
///
/// A full queue blocks the producer; images are never dropped.
pub fn sentinel_queue(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (QueueSender { tx }, QueueReceiver { rx })
}

/// Producing end of a sentinel queue.
#[derive(Debug, Clone)]
pub struct QueueSender {
    tx: mpsc::Sender<QueueItem>,
}

impl QueueSender {
    /// Wait for room, then enqueue.
    pub async fn put(&self, item: QueueItem) -> Result<(), PipelineError> {
        self.tx.send(item).await.map_err(|_| PipelineError::Disconnected)
    }

    /// Enqueue from a plain thread, blocking while the queue is full.
    ///
    /// Must not be called from inside an async task.
    pub fn blocking_put(&self, item: QueueItem) -> Result<(), PipelineError> {
        self.tx.blocking_send(item).map_err(|_| PipelineError::Disconnected)
    }

    pub async fn put_image(&self, image: TaggedImage) -> Result<(), PipelineError> {
        self.put(QueueItem::Image(image)).await
    }

    pub async fn end_of_stream(&self) -> Result<(), PipelineError> {
        self.put(QueueItem::EndOfStream).await
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consuming end of a sentinel queue.
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<QueueItem>,
}

impl QueueReceiver {
    /// Wait up to `timeout` for the next item.
    ///
    /// Returns `Ok(None)` on timeout so the caller can check for a stop
    /// request, and [`PipelineError::Disconnected`] once every sender is gone
    /// and the queue is drained.
    pub async fn poll(&mut self, timeout: Duration) -> Result<Option<QueueItem>, PipelineError> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(item)) => Ok(Some(item)),
            Ok(None) => Err(PipelineError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    /// Wait for the next item with no timeout.
    pub async fn take(&mut self) -> Option<QueueItem> {
        self.rx.recv().await
    }

    /// Items currently waiting.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
