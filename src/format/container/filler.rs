//! Stand-ins for grid cells that were never acquired.
//!
//! OME consumers expect a complete channel x slice x frame grid per position.
//! When an acquisition leaves holes (a z-stack on only some channels, an
//! aborted time point), each hole is pointed at the nearest real image instead
//! of duplicating pixels on disk.
//!
//! The search order is fixed: slices backward then forward in the same
//! channel and frame, then frames backward then forward in the same channel
//! and slice, then any slice of the nearest frame, then the first image of the
//! position, then the first image of the file.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::image::{AxisOrder, Coordinate};

/// A missing grid cell and the real image that stands in for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filler {
    pub missing: Coordinate,
    pub source: Coordinate,
}

/// The rectangular grid a container must cover.
///
/// Frames always start at 0. Each dimension is widened to whatever the
/// written images reach, and every position holding a written image is
/// included even when missing from `positions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GridExtent {
    pub channels: u32,
    pub slices: u32,
    pub frames: u32,
    pub positions: BTreeSet<u32>,
}

impl GridExtent {
    pub fn new(channels: u32, slices: u32, frames: u32) -> Self {
        Self {
            channels,
            slices,
            frames,
            positions: BTreeSet::new(),
        }
    }

    pub fn with_positions(mut self, positions: impl IntoIterator<Item = u32>) -> Self {
        self.positions.extend(positions);
        self
    }

    /// Grow the extent to cover `coords`.
    pub fn include(&mut self, coords: &Coordinate) {
        self.channels = self.channels.max(coords.channel + 1);
        self.slices = self.slices.max(coords.slice + 1);
        self.frames = self.frames.max(coords.frame + 1);
        self.positions.insert(coords.position);
    }
}

/// Compute fillers for every cell of `extent` that `written` lacks.
///
/// Cells in `covered` hold real images elsewhere (another file of the same
/// dataset) and get no filler. Sources are always taken from `written`.
pub fn missing_planes(
    written: &[Coordinate],
    extent: &GridExtent,
    covered: &HashSet<Coordinate>,
    order: AxisOrder,
) -> Vec<Filler> {
    let mut sorted = written.to_vec();
    order.sort(&mut sorted);
    let Some(first) = sorted.first().copied() else {
        return Vec::new();
    };

    let mut extent = extent.clone();
    let mut by_position: BTreeMap<u32, Coordinate> = BTreeMap::new();
    for coords in &sorted {
        extent.include(coords);
        by_position.entry(coords.position).or_insert(*coords);
    }
    let present: HashSet<Coordinate> = sorted.iter().copied().collect();
    let grid = Grid {
        channels: extent.channels,
        slices: extent.slices,
        frames: extent.frames,
    };

    let mut fillers = Vec::new();
    for &position in &extent.positions {
        let fallback = by_position.get(&position).copied().unwrap_or(first);
        for frame in 0..grid.frames {
            for channel in 0..grid.channels {
                for slice in 0..grid.slices {
                    let cell = Coordinate::new(channel, slice, frame, position);
                    if present.contains(&cell) || covered.contains(&cell) {
                        continue;
                    }
                    let source = grid.nearest(&present, cell).unwrap_or(fallback);
                    fillers.push(Filler {
                        missing: cell,
                        source,
                    });
                }
            }
        }
    }

    fillers.sort_by(|a, b| order.compare(&a.missing, &b.missing));
    fillers
}

struct Grid {
    channels: u32,
    slices: u32,
    frames: u32,
}

impl Grid {
    fn nearest(&self, present: &HashSet<Coordinate>, cell: Coordinate) -> Option<Coordinate> {
        let last_slice = self.slices.saturating_sub(1);
        let last_frame = self.frames.saturating_sub(1);

        let slice_hit = backward_then_forward(cell.slice, 0, last_slice)
            .map(|z| cell.with_slice(z))
            .find(|c| present.contains(c));
        if slice_hit.is_some() {
            return slice_hit;
        }

        let frame_hit = backward_then_forward(cell.frame, 0, last_frame)
            .map(|t| cell.with_frame(t))
            .find(|c| present.contains(c));
        if frame_hit.is_some() {
            return frame_hit;
        }

        for distance in 1..=last_frame {
            let candidates = [
                cell.frame.checked_sub(distance),
                cell.frame.checked_add(distance).filter(|t| *t <= last_frame),
            ];
            for frame in candidates.into_iter().flatten() {
                let hit = std::iter::once(cell.slice)
                    .chain(backward_then_forward(cell.slice, 0, last_slice))
                    .map(|z| Coordinate::new(cell.channel, z, frame, cell.position))
                    .find(|c| present.contains(c));
                if hit.is_some() {
                    return hit;
                }
            }
        }
        None
    }
}

/// `from-1, from-2, .., low, from+1, from+2, .., high`
fn backward_then_forward(from: u32, low: u32, high: u32) -> impl Iterator<Item = u32> {
    let backward = (low..from.min(high.saturating_add(1))).rev();
    let forward = from.saturating_add(1)..=high;
    backward.chain(forward)
}
