//! Hardware-side image sources and the producer loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::image::{keys, Coordinate, SummaryMetadata, TaggedImage};

use super::queue::{QueueItem, QueueSender};

// =============================================================================
// StopFlag
// =============================================================================

/// Cooperative cancellation shared by every part of a pipeline.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// ImageSource
// =============================================================================

/// The hardware collaborator.
///
/// Every method may block; sources are only ever driven from a dedicated
/// blocking thread.
pub trait ImageSource: Send {
    /// Block until the next image is available.
    ///
    /// Returns `Ok(None)` once the acquisition has produced everything.
    fn pop_next(&mut self) -> Result<Option<TaggedImage>, PipelineError>;

    /// Images still to come, when known.
    fn remaining(&self) -> Option<u64>;

    fn is_finished(&self) -> bool;

    /// Abort the acquisition on the hardware side.
    fn stop(&mut self) {}
}

/// What the producer thread did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub produced: u64,
    /// Images taken from the source that the pipeline could no longer accept.
    pub dropped: u64,
    /// Ended by the stop flag rather than by the source running out.
    pub stopped: bool,
    pub source_error: Option<String>,
}

/// Pull images from `source` into `output` until it runs out or `stop` is
/// raised, then enqueue end of stream.
///
/// This is the only place the stop flag ends image flow. An image already
/// taken from the source is always enqueued; downstream stages keep running
/// until end of stream reaches them. Blocks on a full queue; call it from a
/// blocking thread.
pub fn run_producer(
    mut source: Box<dyn ImageSource>,
    output: QueueSender,
    stop: StopFlag,
) -> ProducerReport {
    let mut report = ProducerReport::default();
    loop {
        if stop.is_stopped() {
            source.stop();
            report.stopped = true;
            break;
        }
        match source.pop_next() {
            Ok(Some(image)) => {
                let coords = image.coords();
                if output.blocking_put(QueueItem::Image(image)).is_err() {
                    warn!(%coords, "pipeline closed, image from source dropped");
                    report.dropped += 1;
                    source.stop();
                    break;
                }
                report.produced += 1;
            }
            Ok(None) => break,
            Err(err) => {
                error!(error = %err, "image source failed");
                report.source_error = Some(err.to_string());
                break;
            }
        }
    }

    if output.blocking_put(QueueItem::EndOfStream).is_err() {
        debug!("pipeline closed before end of stream");
    }
    info!(
        produced = report.produced,
        dropped = report.dropped,
        stopped = report.stopped,
        "producer finished"
    );
    report
}

// =============================================================================
// SyntheticSource
// =============================================================================

/// Generates a full acquisition grid of deterministic test images.
///
/// Images come out in the summary's axis order, optionally paced by a fixed
/// interval between frames.
#[derive(Debug)]
pub struct SyntheticSource {
    summary: SummaryMetadata,
    pending: VecDeque<Coordinate>,
    interval: Option<Duration>,
    started: Option<Instant>,
    produced: u64,
    stopped: bool,
}

impl SyntheticSource {
    pub fn new(summary: SummaryMetadata) -> Self {
        let mut grid = Vec::new();
        for position in 0..summary.positions {
            for frame in 0..summary.frames {
                for slice in 0..summary.slices {
                    for channel in 0..summary.channels {
                        grid.push(Coordinate::new(channel, slice, frame, position));
                    }
                }
            }
        }
        summary.axis_order().sort(&mut grid);
        Self {
            summary,
            pending: grid.into(),
            interval: None,
            started: None,
            produced: 0,
            stopped: false,
        }
    }

    /// Wait `interval` between consecutive frames.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval).filter(|d| !d.is_zero());
        self
    }

    pub fn summary(&self) -> &SummaryMetadata {
        &self.summary
    }

    /// Build the image at `coords`.
    pub fn image(&self, coords: Coordinate) -> Result<TaggedImage, PipelineError> {
        let s = &self.summary;
        let bits = s.pixel_type.bits_per_sample();
        let samples = s.pixel_type.samples_per_pixel() as u32;
        let seed = coords.channel * 31 + coords.slice * 17 + coords.frame * 7 + coords.position * 13;

        let mut pixels = Vec::with_capacity(s.bytes_per_image() as usize);
        for y in 0..s.height {
            for x in 0..s.width {
                for sample in 0..samples {
                    let value = x + y * 3 + sample * 5 + seed;
                    if bits == 8 {
                        pixels.push(value as u8);
                    } else {
                        pixels.extend_from_slice(&((value * 97) as u16).to_le_bytes());
                    }
                }
            }
        }

        let interval_ms = self.interval.map_or(0.0, |d| d.as_secs_f64() * 1000.0);
        let tags = TaggedImage::base_tags(s.width, s.height, s.pixel_type, coords)
            .with(keys::CHANNEL, s.channel_name(coords.channel))
            .with(keys::POSITION_NAME, format!("Pos{}", coords.position))
            .with(keys::EXPOSURE_MS, 10.0)
            .with(keys::ELAPSED_TIME_MS, coords.frame as f64 * interval_ms)
            .with(keys::Z_UM, coords.slice as f64 * s.z_step_um)
            .with("Camera", "Synthetic");

        TaggedImage::new(pixels, tags).map_err(|e| PipelineError::Source(e.to_string()))
    }
}

impl ImageSource for SyntheticSource {
    fn pop_next(&mut self) -> Result<Option<TaggedImage>, PipelineError> {
        if self.stopped {
            return Ok(None);
        }
        let Some(coords) = self.pending.pop_front() else {
            return Ok(None);
        };

        let started = *self.started.get_or_insert_with(Instant::now);
        if let Some(interval) = self.interval {
            let due = started + interval * coords.frame;
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        let image = self.image(coords)?;
        self.produced += 1;
        Ok(Some(image))
    }

    fn remaining(&self) -> Option<u64> {
        Some(if self.stopped { 0 } else { self.pending.len() as u64 })
    }

    fn is_finished(&self) -> bool {
        self.stopped || self.pending.is_empty()
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

// =============================================================================
// Tests
// =============================================================================
