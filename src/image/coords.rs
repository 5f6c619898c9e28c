//! Image coordinates and dataset ordering.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::MetadataError;

// =============================================================================
// Coordinate
// =============================================================================

/// Position of one image within an acquisition.
///
/// Equal tuples are equal coordinates regardless of how they were built.
/// Coordinates carry no inherent ordering; use [`AxisOrder`] to sort them the
/// way a particular dataset lays images out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Coordinate {
    pub channel: u32,
    pub slice: u32,
    pub frame: u32,
    pub position: u32,
}

impl Coordinate {
    /// Create a new coordinate.
    pub const fn new(channel: u32, slice: u32, frame: u32, position: u32) -> Self {
        Self {
            channel,
            slice,
            frame,
            position,
        }
    }

    /// Label in `channel_slice_frame_position` form.
    pub fn label(&self) -> String {
        self.to_string()
    }

    /// Same coordinate at a different slice.
    pub const fn with_slice(self, slice: u32) -> Self {
        Self { slice, ..self }
    }

    /// Same coordinate at a different frame.
    pub const fn with_frame(self, frame: u32) -> Self {
        Self { frame, ..self }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}_{}",
            self.channel, self.slice, self.frame, self.position
        )
    }
}

impl FromStr for Coordinate {
    type Err = MetadataError;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = label.split('_').collect();
        if parts.len() != 4 {
            return Err(MetadataError::InvalidMetadata(format!(
                "image label '{}' does not have four indices",
                label
            )));
        }

        let mut indices = [0u32; 4];
        for (slot, part) in indices.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| {
                MetadataError::InvalidMetadata(format!("image label '{}' is not numeric", label))
            })?;
        }

        Ok(Coordinate::new(indices[0], indices[1], indices[2], indices[3]))
    }
}

// =============================================================================
// AxisOrder
// =============================================================================

/// On-disk ordering of a dataset.
///
/// - `slices_first`: every slice of a channel is stored before the next channel.
///   Otherwise every channel of a slice is stored before the next slice.
/// - `time_first`: every frame of a position is stored before the next position.
///   Otherwise every position of a frame is stored before the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AxisOrder {
    pub slices_first: bool,
    pub time_first: bool,
}

impl AxisOrder {
    /// Create an ordering from the two acquisition flags.
    pub const fn new(slices_first: bool, time_first: bool) -> Self {
        Self {
            slices_first,
            time_first,
        }
    }

    /// Sort key from outermost to innermost axis.
    fn key(&self, c: &Coordinate) -> [u32; 4] {
        let (outer, inner) = if self.time_first {
            (c.position, c.frame)
        } else {
            (c.frame, c.position)
        };
        let (major, minor) = if self.slices_first {
            (c.channel, c.slice)
        } else {
            (c.slice, c.channel)
        };
        [outer, inner, major, minor]
    }

    /// Compare two coordinates under this ordering.
    pub fn compare(&self, a: &Coordinate, b: &Coordinate) -> Ordering {
        self.key(a).cmp(&self.key(b))
    }

    /// Sort coordinates in place under this ordering.
    pub fn sort(&self, coords: &mut [Coordinate]) {
        coords.sort_by(|a, b| self.compare(a, b));
    }
}

// =============================================================================
// Tests
// =============================================================================
