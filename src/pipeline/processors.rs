//! Built-in processors.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::image::{keys, Coordinate, TaggedImage};

use super::processor::Processor;

/// Tag added to averaged images: how many frames went into them.
pub const AVERAGED_FRAMES_TAG: &str = "AveragedFrames";

fn stage_error(stage: &str, reason: impl ToString) -> PipelineError {
    PipelineError::StageFailed {
        stage: stage.to_string(),
        reason: reason.to_string(),
    }
}

// =============================================================================
// Mirror
// =============================================================================

/// Flips every image horizontally.
#[derive(Debug, Clone)]
pub struct Mirror {
    enabled: bool,
}

impl Mirror {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    pub fn enabled(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Reverse the pixel order of every row.
    pub fn flip(image: &TaggedImage) -> Vec<u8> {
        let bpp = image.pixel_type().bytes_per_pixel();
        let row_len = image.width() as usize * bpp;
        let mut out = Vec::with_capacity(image.byte_len());
        if row_len == 0 {
            return out;
        }
        for row in image.pixels().chunks_exact(row_len) {
            for pixel in row.chunks_exact(bpp).rev() {
                out.extend_from_slice(pixel);
            }
        }
        out
    }
}

impl Default for Mirror {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Mirror {
    fn name(&self) -> &str {
        "mirror"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn process(&mut self, image: TaggedImage) -> Result<Vec<TaggedImage>, PipelineError> {
        let flipped = image
            .with_pixels(Self::flip(&image))
            .map_err(|e| stage_error("mirror", e))?;
        Ok(vec![flipped])
    }
}

// =============================================================================
// FrameAverager
// =============================================================================

/// Averages every `frames` consecutive frames of each channel, slice and
/// position into one image.
///
/// The output carries the tags of the first frame in its group, with
/// `FrameIndex` renumbered to the group number and [`AVERAGED_FRAMES_TAG`]
/// set. Partial groups are averaged and emitted at end of stream.
#[derive(Debug)]
pub struct FrameAverager {
    frames: usize,
    groups: HashMap<(u32, u32, u32), Group>,
    emitted: HashMap<(u32, u32, u32), u32>,
}

#[derive(Debug)]
struct Group {
    first: TaggedImage,
    sums: Vec<u64>,
    count: usize,
}

impl FrameAverager {
    /// Average groups of `frames` images (at least one).
    pub fn new(frames: usize) -> Self {
        Self {
            frames: frames.max(1),
            groups: HashMap::new(),
            emitted: HashMap::new(),
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    fn group_key(coords: &Coordinate) -> (u32, u32, u32) {
        (coords.channel, coords.slice, coords.position)
    }

    fn samples(image: &TaggedImage) -> Vec<u64> {
        match image.pixel_type().bits_per_sample() {
            8 => image.pixels().iter().map(|&b| b as u64).collect(),
            _ => image
                .pixels()
                .chunks_exact(2)
                .map(|p| u16::from_le_bytes([p[0], p[1]]) as u64)
                .collect(),
        }
    }

    fn average(&mut self, key: (u32, u32, u32), group: Group) -> Result<TaggedImage, PipelineError> {
        let count = group.count as u64;
        let means = group.sums.iter().map(|s| (s + count / 2) / count);
        let pixels: Vec<u8> = match group.first.pixel_type().bits_per_sample() {
            8 => means.map(|m| m as u8).collect(),
            _ => means.flat_map(|m| (m as u16).to_le_bytes()).collect(),
        };

        let index = self.emitted.entry(key).or_insert(0);
        let mut tags = group.first.tags().clone();
        tags.insert(keys::FRAME_INDEX, *index);
        tags.insert(AVERAGED_FRAMES_TAG, group.count as u64);

        let image = TaggedImage::new(pixels, tags).map_err(|e| stage_error("frame-averager", e))?;
        *index += 1;
        Ok(image)
    }
}

impl Processor for FrameAverager {
    fn name(&self) -> &str {
        "frame-averager"
    }

    fn process(&mut self, image: TaggedImage) -> Result<Vec<TaggedImage>, PipelineError> {
        let key = Self::group_key(&image.coords());
        let samples = Self::samples(&image);

        let group = self.groups.entry(key).or_insert_with(|| Group {
            first: image.clone(),
            sums: vec![0; samples.len()],
            count: 0,
        });
        if group.sums.len() != samples.len() {
            return Err(stage_error(
                "frame-averager",
                format!("image at {} changed size mid-group", image.coords()),
            ));
        }
        for (sum, sample) in group.sums.iter_mut().zip(samples) {
            *sum += sample;
        }
        group.count += 1;
        if group.count < self.frames {
            return Ok(Vec::new());
        }

        match self.groups.remove(&key) {
            Some(group) => Ok(vec![self.average(key, group)?]),
            None => Ok(Vec::new()),
        }
    }

    fn flush(&mut self) -> Result<Vec<TaggedImage>, PipelineError> {
        let mut pending: Vec<((u32, u32, u32), Group)> = self.groups.drain().collect();
        pending.sort_by_key(|(key, group)| (group.first.coords().frame, key.2, key.1, key.0));
        if !pending.is_empty() {
            debug!(groups = pending.len(), "flushing partial frame groups");
        }
        // A group that cannot be averaged is skipped; the rest still go out.
        let mut out = Vec::with_capacity(pending.len());
        for (key, group) in pending {
            let coords = group.first.coords();
            match self.average(key, group) {
                Ok(image) => out.push(image),
                Err(err) => warn!(%coords, error = %err, "partial frame group skipped"),
            }
        }
        Ok(out)
    }
}

// =============================================================================
// Tests
// =============================================================================
