//! Test utilities for integration tests.
//!
//! Provides image builders, a scripted image source and a store wrapper that
//! can hold writes back to exercise backpressure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use acq_pipeline::{
    keys, Coordinate, DisplaySettings, ImageSource, ImageStore, PipelineError, PixelType,
    RamStore, StoreError, SummaryMetadata, TaggedImage,
};

// =============================================================================
// Image Builders
// =============================================================================

pub const WIDTH: u32 = 8;
pub const HEIGHT: u32 = 6;

pub fn summary(channels: u32, slices: u32, frames: u32, positions: u32) -> SummaryMetadata {
    SummaryMetadata::new(WIDTH, HEIGHT, PixelType::Gray16)
        .with_dimensions(channels, slices, frames, positions)
        .with_prefix("test")
}

/// A 16-bit image whose pixels depend on `coords`, with a few extra tags.
pub fn make_image(coords: Coordinate) -> TaggedImage {
    make_image_with(coords, WIDTH, HEIGHT, PixelType::Gray16)
}

pub fn make_image_with(coords: Coordinate, width: u32, height: u32, pixel_type: PixelType) -> TaggedImage {
    let len = width as usize * height as usize * pixel_type.bytes_per_pixel();
    let seed = (coords.channel * 41 + coords.slice * 13 + coords.frame * 7 + coords.position * 3) as usize;
    let pixels: Vec<u8> = (0..len).map(|i| ((i * 31 + seed) % 251) as u8).collect();
    let tags = TaggedImage::base_tags(width, height, pixel_type, coords)
        .with(keys::CHANNEL, format!("Ch{}", coords.channel))
        .with(keys::EXPOSURE_MS, 10.0 + coords.frame as f64)
        .with("Camera", "Test");
    TaggedImage::new(pixels, tags).unwrap()
}

/// Every coordinate of a grid in acquisition order: channel fastest.
pub fn grid(channels: u32, slices: u32, frames: u32, positions: u32) -> Vec<Coordinate> {
    let mut coords = Vec::new();
    for position in 0..positions {
        for frame in 0..frames {
            for slice in 0..slices {
                for channel in 0..channels {
                    coords.push(Coordinate::new(channel, slice, frame, position));
                }
            }
        }
    }
    coords
}

// =============================================================================
// Scripted Source
// =============================================================================

/// Emits a fixed list of images and counts how many were pulled.
pub struct ScriptedSource {
    images: VecDeque<TaggedImage>,
    popped: Arc<AtomicUsize>,
    delay: Option<Duration>,
    stopped: bool,
}

impl ScriptedSource {
    pub fn new(images: Vec<TaggedImage>) -> Self {
        Self {
            images: images.into(),
            popped: Arc::new(AtomicUsize::new(0)),
            delay: None,
            stopped: false,
        }
    }

    /// Block for `delay` inside every pop, like a camera waiting for exposure.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn from_coords(coords: &[Coordinate]) -> Self {
        Self::new(coords.iter().map(|c| make_image(*c)).collect())
    }

    /// Shared counter of images handed out so far.
    pub fn popped(&self) -> Arc<AtomicUsize> {
        self.popped.clone()
    }
}

impl ImageSource for ScriptedSource {
    fn pop_next(&mut self) -> Result<Option<TaggedImage>, PipelineError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.stopped {
            return Ok(None);
        }
        let next = self.images.pop_front();
        if next.is_some() {
            self.popped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(next)
    }

    fn remaining(&self) -> Option<u64> {
        Some(self.images.len() as u64)
    }

    fn is_finished(&self) -> bool {
        self.stopped || self.images.is_empty()
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

// =============================================================================
// Gated Store
// =============================================================================

/// A RAM store whose writes wait until the gate is opened, and which
/// records the order images arrive in.
pub struct GatedStore {
    inner: RamStore,
    open: Mutex<bool>,
    opened: Condvar,
    arrivals: Mutex<Vec<Coordinate>>,
}

impl GatedStore {
    pub fn new(summary: SummaryMetadata) -> Self {
        Self {
            inner: RamStore::new(summary),
            open: Mutex::new(false),
            opened: Condvar::new(),
            arrivals: Mutex::new(Vec::new()),
        }
    }

    pub fn open_gate(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    pub fn arrivals(&self) -> Vec<Coordinate> {
        self.arrivals.lock().clone()
    }
}

impl ImageStore for GatedStore {
    fn put_image(&self, image: &TaggedImage) -> Result<String, StoreError> {
        {
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
        }
        self.arrivals.lock().push(image.coords());
        self.inner.put_image(image)
    }

    fn get_image(&self, coords: &Coordinate) -> Result<Option<TaggedImage>, StoreError> {
        self.inner.get_image(coords)
    }

    fn image_keys(&self) -> Vec<Coordinate> {
        self.inner.image_keys()
    }

    fn summary_metadata(&self) -> SummaryMetadata {
        self.inner.summary_metadata()
    }

    fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), StoreError> {
        self.inner.set_summary_metadata(summary)
    }

    fn display_settings(&self) -> DisplaySettings {
        self.inner.display_settings()
    }

    fn set_display_settings(&self, display: DisplaySettings) -> Result<(), StoreError> {
        self.inner.set_display_settings(display)
    }

    fn finished(&self) -> Result<(), StoreError> {
        self.inner.finished()
    }

    fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    fn close(&self) -> Result<(), StoreError> {
        self.inner.close()
    }
}

/// Assert two images carry the same pixels and tags.
pub fn assert_same_image(actual: &TaggedImage, expected: &TaggedImage) {
    assert_eq!(actual.coords(), expected.coords());
    assert_eq!(actual.pixels(), expected.pixels(), "pixels differ at {}", expected.coords());
    assert_eq!(actual.tags(), expected.tags(), "tags differ at {}", expected.coords());
}
