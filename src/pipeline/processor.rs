//! Processor stages and the chain that wires them together.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::image::TaggedImage;

use super::queue::{sentinel_queue, QueueItem, QueueReceiver, QueueSender};
use super::source::StopFlag;
use super::PipelineOptions;

// =============================================================================
// Processor
// =============================================================================

/// One pluggable transform in the pipeline.
///
/// A processor may emit zero, one or several images per input. Images are
/// immutable; a processor that changes pixels builds a new image.
pub trait Processor: Send {
    fn name(&self) -> &str;

    /// Disabled processors are left out when a chain is spawned.
    fn is_enabled(&self) -> bool {
        true
    }

    /// Transform one image.
    ///
    /// An error skips this image only; the stage keeps running.
    fn process(&mut self, image: TaggedImage) -> Result<Vec<TaggedImage>, PipelineError>;

    /// Emit anything still buffered. Called once at end of stream.
    fn flush(&mut self) -> Result<Vec<TaggedImage>, PipelineError> {
        Ok(Vec::new())
    }
}

/// What one stage did before it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub name: String,
    pub received: u64,
    pub emitted: u64,
    /// Images skipped because the processor returned an error.
    pub failed: u64,
    /// Images lost after the processor panicked or the next stage went away.
    pub discarded: u64,
    pub panicked: bool,
    /// The next stage went away before end of stream.
    pub downstream_closed: bool,
}

enum Outcome {
    Done(Vec<TaggedImage>),
    Failed(PipelineError),
    Panicked(String),
}

fn guarded(f: impl FnOnce() -> Result<Vec<TaggedImage>, PipelineError>) -> Outcome {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(images)) => Outcome::Done(images),
        Ok(Err(err)) => Outcome::Failed(err),
        Err(payload) => Outcome::Panicked(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn emit(output: &QueueSender, images: Vec<TaggedImage>, report: &mut StageReport) -> bool {
    let total = images.len() as u64;
    for (sent, image) in images.into_iter().enumerate() {
        let coords = image.coords();
        if output.put_image(image).await.is_err() {
            let lost = total - sent as u64;
            warn!(stage = %report.name, %coords, lost, "next stage closed, images dropped");
            report.downstream_closed = true;
            report.discarded += lost;
            return false;
        }
        report.emitted += 1;
    }
    true
}

/// Run one processor between two queues until end of stream.
///
/// The stop flag is never a reason to leave early: the producer answers it by
/// sending end of stream, and every image ahead of that still gets processed.
/// Processor errors skip the offending image. A panicking processor raises the
/// stop flag, and the stage then forwards end of stream and discards its
/// remaining input so upstream never blocks on it.
pub async fn run_stage(
    mut processor: Box<dyn Processor>,
    mut input: QueueReceiver,
    output: QueueSender,
    stop: StopFlag,
    poll_interval: Duration,
) -> StageReport {
    let mut report = StageReport {
        name: processor.name().to_string(),
        ..StageReport::default()
    };
    debug!(stage = %report.name, "stage started");

    loop {
        let item = match input.poll(poll_interval).await {
            Ok(Some(item)) => item,
            Ok(None) => continue,
            Err(_) => {
                warn!(stage = %report.name, "input closed without end of stream");
                break;
            }
        };

        let image = match item {
            QueueItem::EndOfStream => break,
            QueueItem::Image(image) => image,
        };
        report.received += 1;
        let coords = image.coords();

        match guarded(|| processor.process(image)) {
            Outcome::Done(images) => {
                if !emit(&output, images, &mut report).await {
                    break;
                }
            }
            Outcome::Failed(err) => {
                warn!(stage = %report.name, %coords, error = %err, "processor failed, image skipped");
                report.failed += 1;
            }
            Outcome::Panicked(message) => {
                error!(stage = %report.name, %coords, panic = %message, "processor panicked, stopping acquisition");
                report.panicked = true;
                stop.stop();
                break;
            }
        }
    }

    if !report.panicked && !report.downstream_closed {
        match guarded(|| processor.flush()) {
            Outcome::Done(images) => {
                emit(&output, images, &mut report).await;
            }
            Outcome::Failed(err) => {
                warn!(stage = %report.name, error = %err, "flush failed");
            }
            Outcome::Panicked(message) => {
                error!(stage = %report.name, panic = %message, "processor panicked during flush");
                report.panicked = true;
            }
        }
    }

    if !report.downstream_closed && output.end_of_stream().await.is_err() {
        report.downstream_closed = true;
    }

    if report.panicked {
        while let Some(item) = input.take().await {
            if item.is_end_of_stream() {
                break;
            }
            report.discarded += 1;
        }
    }

    debug!(
        stage = %report.name,
        received = report.received,
        emitted = report.emitted,
        "stage finished"
    );
    report
}

// =============================================================================
// ProcessorChain
// =============================================================================

/// Ordered list of processors, spawned as one task per enabled processor.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append.
    pub fn with(mut self, processor: impl Processor + 'static) -> Self {
        self.push(Box::new(processor));
        self
    }

    pub fn push(&mut self, processor: Box<dyn Processor>) {
        self.processors.push(processor);
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Names of the processors, in order.
    pub fn names(&self) -> Vec<String> {
        self.processors.iter().map(|p| p.name().to_string()).collect()
    }

    /// Spawn one task per enabled processor, wiring stage `i`'s output queue
    /// to stage `i + 1`'s input.
    ///
    /// Returns the last stage's output (or `input` itself when no stage is
    /// enabled) and the stage handles.
    pub fn spawn(
        self,
        input: QueueReceiver,
        stop: &StopFlag,
        options: PipelineOptions,
    ) -> (QueueReceiver, Vec<JoinHandle<StageReport>>) {
        let mut current = input;
        let mut handles = Vec::new();

        for processor in self.processors {
            if !processor.is_enabled() {
                debug!(stage = processor.name(), "skipping disabled stage");
                continue;
            }
            let (tx, rx) = sentinel_queue(options.queue_capacity);
            let stage_input = std::mem::replace(&mut current, rx);
            handles.push(tokio::spawn(run_stage(
                processor,
                stage_input,
                tx,
                stop.clone(),
                options.poll_interval,
            )));
        }

        info!(stages = handles.len(), "processor chain started");
        (current, handles)
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.names())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
