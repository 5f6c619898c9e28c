//! Acquisition pipeline.
//!
//! ```text
//! ImageSource ─▶ queue ─▶ stage 1 ─▶ queue ─▶ ... ─▶ stage N ─▶ queue ─▶ PipelineSink ─▶ ImageStore
//! ```
//!
//! Every arrow is a bounded [`sentinel_queue`]; a full queue blocks its
//! producer, which is the only flow control. Images are never dropped or
//! reordered. [`QueueItem::EndOfStream`] travels behind the last image and
//! every stage forwards it exactly once before stopping.
//!
//! The source runs on a blocking thread; stages and the sink are tasks. A
//! shared [`StopFlag`] ends production: the producer stops taking images from
//! the source and sends end of stream, and everything already taken still
//! reaches the sink, which finishes the store.

mod acquisition;
mod processor;
mod processors;
mod queue;
mod sink;
mod source;

use std::time::Duration;

pub use acquisition::{Acquisition, AcquisitionReport};
pub use processor::{run_stage, Processor, ProcessorChain, StageReport};
pub use processors::{FrameAverager, Mirror, AVERAGED_FRAMES_TAG};
pub use queue::{sentinel_queue, QueueItem, QueueReceiver, QueueSender};
pub use sink::{PipelineSink, SinkReport, StorageFullCallback};
pub use source::{run_producer, ImageSource, ProducerReport, StopFlag, SyntheticSource};

/// Default capacity of every pipeline queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// Default time a stage or the sink waits on an idle queue before polling again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Queue sizing and polling shared by all pipeline parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub queue_capacity: usize,
    pub poll_interval: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}
