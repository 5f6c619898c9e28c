//! Final pipeline stage: drains the last queue into an image store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::StoreError;
use crate::store::ImageStore;

use super::queue::{QueueItem, QueueReceiver};
use super::source::StopFlag;
use super::DEFAULT_POLL_INTERVAL;

/// Called once when the store runs out of memory or disk, or gets an image too
/// large for any container file.
pub type StorageFullCallback = Box<dyn FnOnce(&StoreError) + Send>;

/// What the sink did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkReport {
    pub stored: u64,
    /// Images the store refused for reasons other than running out of space.
    pub failed: u64,
    pub storage_full: bool,
    pub end_of_stream: bool,
    /// Whether `finished()` succeeded on the store.
    pub finished: bool,
    pub elapsed: Duration,
}

impl SinkReport {
    pub fn images_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.stored as f64 / secs
        } else {
            0.0
        }
    }
}

/// Stores every image it receives, then finishes the store.
///
/// Store calls may block on disk, so each one runs on the blocking pool.
pub struct PipelineSink {
    store: Arc<dyn ImageStore>,
    poll_interval: Duration,
    stop: Option<StopFlag>,
    on_storage_full: Option<StorageFullCallback>,
}

impl PipelineSink {
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self {
            store,
            poll_interval: DEFAULT_POLL_INTERVAL,
            stop: None,
            on_storage_full: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Give up waiting for end of stream once `stop` is raised and the input
    /// is idle.
    pub fn with_stop_flag(mut self, stop: StopFlag) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn on_storage_full(mut self, callback: impl FnOnce(&StoreError) + Send + 'static) -> Self {
        self.on_storage_full = Some(Box::new(callback));
        self
    }

    /// Drain `input` until end of stream.
    ///
    /// Running out of space stops the sink: the callback fires, the store is
    /// finished and the receiver is dropped so upstream stages stop blocking.
    pub async fn run(mut self, mut input: QueueReceiver) -> SinkReport {
        let started = Instant::now();
        let mut report = SinkReport::default();

        loop {
            let item = match input.poll(self.poll_interval).await {
                Ok(Some(item)) => item,
                Ok(None) if self.stop.as_ref().is_some_and(StopFlag::is_stopped) => {
                    debug!("sink stopped while idle");
                    break;
                }
                Ok(None) => continue,
                Err(_) => {
                    warn!("sink input closed without end of stream");
                    break;
                }
            };

            let image = match item {
                QueueItem::EndOfStream => {
                    report.end_of_stream = true;
                    break;
                }
                QueueItem::Image(image) => image,
            };
            let coords = image.coords();

            let store = Arc::clone(&self.store);
            let result = tokio::task::spawn_blocking(move || store.put_image(&image)).await;
            match result {
                Ok(Ok(label)) => {
                    report.stored += 1;
                    debug!(label = %label, "image stored");
                }
                Ok(Err(err)) if err.is_resource_exhaustion() => {
                    error!(%coords, error = %err, "storage full, stopping acquisition");
                    report.storage_full = true;
                    if let Some(callback) = self.on_storage_full.take() {
                        callback(&err);
                    }
                    break;
                }
                Ok(Err(err)) => {
                    warn!(%coords, error = %err, "failed to store image");
                    report.failed += 1;
                }
                Err(err) => {
                    error!(%coords, error = %err, "store task failed");
                    report.failed += 1;
                }
            }
        }
        drop(input);

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.finished()).await {
            Ok(Ok(())) => report.finished = true,
            Ok(Err(err)) => error!(error = %err, "failed to finish store"),
            Err(err) => error!(error = %err, "finish task failed"),
        }

        report.elapsed = started.elapsed();
        info!(
            stored = report.stored,
            failed = report.failed,
            storage_full = report.storage_full,
            images_per_second = report.images_per_second(),
            "sink finished"
        );
        report
    }
}

impl std::fmt::Debug for PipelineSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineSink")
            .field("poll_interval", &self.poll_interval)
            .field("on_storage_full", &self.on_storage_full.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
