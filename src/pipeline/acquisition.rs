//! Wires a source, a processor chain and a store into one running pipeline.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{PipelineError, StoreError};
use crate::store::ImageStore;

use super::processor::{ProcessorChain, StageReport};
use super::queue::sentinel_queue;
use super::sink::{PipelineSink, SinkReport, StorageFullCallback};
use super::source::{run_producer, ImageSource, ProducerReport, StopFlag};
use super::PipelineOptions;

/// Everything a finished acquisition reports.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionReport {
    pub producer: ProducerReport,
    pub stages: Vec<StageReport>,
    pub sink: SinkReport,
}

impl AcquisitionReport {
    /// True when the acquisition ran to completion with nothing lost.
    pub fn is_complete(&self) -> bool {
        !self.producer.stopped
            && self.producer.dropped == 0
            && self.producer.source_error.is_none()
            && self.sink.end_of_stream
            && !self.sink.storage_full
            && self.stages
                .iter()
                .all(|s| !s.panicked && s.failed == 0 && s.discarded == 0)
    }
}

/// A running acquisition.
///
/// Must be started from inside a Tokio runtime.
pub struct Acquisition {
    stop: StopFlag,
    producer: JoinHandle<ProducerReport>,
    stages: Vec<JoinHandle<StageReport>>,
    sink: JoinHandle<SinkReport>,
}

impl Acquisition {
    /// Start moving images from `source` through `chain` into `store`.
    pub fn start(
        source: Box<dyn ImageSource>,
        chain: ProcessorChain,
        store: Arc<dyn ImageStore>,
        options: PipelineOptions,
    ) -> Self {
        Self::start_with(source, chain, store, options, None)
    }

    /// Like [`Acquisition::start`], also calling `on_storage_full` when the
    /// store runs out of space. The acquisition is stopped either way.
    pub fn start_with(
        source: Box<dyn ImageSource>,
        chain: ProcessorChain,
        store: Arc<dyn ImageStore>,
        options: PipelineOptions,
        on_storage_full: Option<StorageFullCallback>,
    ) -> Self {
        let stop = StopFlag::new();
        info!(
            stages = ?chain.names(),
            queue_capacity = options.queue_capacity,
            "starting acquisition"
        );

        let (tx, rx) = sentinel_queue(options.queue_capacity);
        let producer_stop = stop.clone();
        let producer = tokio::task::spawn_blocking(move || run_producer(source, tx, producer_stop));

        let (last, stages) = chain.spawn(rx, &stop, options);

        let sink_stop = stop.clone();
        let sink = PipelineSink::new(store)
            .with_poll_interval(options.poll_interval)
            .on_storage_full(move |err: &StoreError| {
                sink_stop.stop();
                if let Some(callback) = on_storage_full {
                    callback(err);
                }
            });
        let sink = tokio::spawn(sink.run(last));

        Self {
            stop,
            producer,
            stages,
            sink,
        }
    }

    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// Ask the acquisition to wind down. Images already produced still reach
    /// the store.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Wait for every part to finish.
    pub async fn wait(self) -> Result<AcquisitionReport, PipelineError> {
        let producer = self.producer.await?;
        let mut stages = Vec::with_capacity(self.stages.len());
        for handle in self.stages {
            stages.push(handle.await?);
        }
        let sink = self.sink.await?;

        let report = AcquisitionReport {
            producer,
            stages,
            sink,
        };
        if report.is_complete() {
            info!(stored = report.sink.stored, "acquisition complete");
        } else {
            warn!(
                produced = report.producer.produced,
                stored = report.sink.stored,
                storage_full = report.sink.storage_full,
                "acquisition ended early"
            );
        }
        Ok(report)
    }
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("stopped", &self.stop.is_stopped())
            .field("stages", &self.stages.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
