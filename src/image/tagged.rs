//! Pixel buffers paired with their metadata.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::MetadataError;

use super::coords::Coordinate;
use super::tags::{keys, TagSet};

// =============================================================================
// PixelType
// =============================================================================

/// Pixel formats an acquisition can produce.
///
/// Multi-byte samples are held little-endian in memory. RGB formats carry four
/// samples per pixel (the last one unused by cameras, kept verbatim).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    Gray8,
    Gray16,
    Rgb32,
    Rgb64,
}

impl PixelType {
    /// Bytes used by one pixel.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelType::Gray8 => 1,
            PixelType::Gray16 => 2,
            PixelType::Rgb32 => 4,
            PixelType::Rgb64 => 8,
        }
    }

    /// Samples per pixel.
    pub const fn samples_per_pixel(self) -> u16 {
        match self {
            PixelType::Gray8 | PixelType::Gray16 => 1,
            PixelType::Rgb32 | PixelType::Rgb64 => 4,
        }
    }

    /// Bits in one sample.
    pub const fn bits_per_sample(self) -> u16 {
        match self {
            PixelType::Gray8 | PixelType::Rgb32 => 8,
            PixelType::Gray16 | PixelType::Rgb64 => 16,
        }
    }

    pub const fn is_rgb(self) -> bool {
        matches!(self, PixelType::Rgb32 | PixelType::Rgb64)
    }

    /// Largest representable sample value.
    pub const fn max_value(self) -> u32 {
        match self.bits_per_sample() {
            8 => 255,
            _ => 65535,
        }
    }

    /// Canonical tag value, e.g. `GRAY16`.
    pub const fn as_str(self) -> &'static str {
        match self {
            PixelType::Gray8 => "GRAY8",
            PixelType::Gray16 => "GRAY16",
            PixelType::Rgb32 => "RGB32",
            PixelType::Rgb64 => "RGB64",
        }
    }
}

impl fmt::Display for PixelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PixelType {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GRAY8" => Ok(PixelType::Gray8),
            "GRAY16" => Ok(PixelType::Gray16),
            "RGB32" => Ok(PixelType::Rgb32),
            "RGB64" => Ok(PixelType::Rgb64),
            _ => Err(MetadataError::UnknownPixelType(s.to_string())),
        }
    }
}

impl Serialize for PixelType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PixelType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// TaggedImage
// =============================================================================

/// An immutable pixel buffer plus its tag set.
///
/// Construction validates that Width, Height and PixelType tags exist and agree
/// with the buffer length, and that the four coordinate index tags are present.
/// Clones share both the buffer and the tags; stages that change pixels build
/// a new image with [`TaggedImage::with_pixels`].
#[derive(Clone, PartialEq)]
pub struct TaggedImage {
    pixels: Bytes,
    tags: Arc<TagSet>,
    width: u32,
    height: u32,
    pixel_type: PixelType,
    coords: Coordinate,
}

impl TaggedImage {
    /// Validate and wrap a pixel buffer and its tags.
    pub fn new(pixels: impl Into<Bytes>, tags: TagSet) -> Result<Self, MetadataError> {
        let pixels = pixels.into();
        let width = tags.get_u32(keys::WIDTH)?;
        let height = tags.get_u32(keys::HEIGHT)?;
        let pixel_type: PixelType = tags.get_str(keys::PIXEL_TYPE)?.parse()?;
        let coords = tags.coordinate()?;

        let expected = width as usize * height as usize * pixel_type.bytes_per_pixel();
        if pixels.len() != expected {
            return Err(MetadataError::BufferSizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            pixels,
            tags: Arc::new(tags),
            width,
            height,
            pixel_type,
            coords,
        })
    }

    /// Build a tag set with geometry and coordinate tags already filled in.
    pub fn base_tags(
        width: u32,
        height: u32,
        pixel_type: PixelType,
        coords: Coordinate,
    ) -> TagSet {
        let mut tags = TagSet::new()
            .with(keys::WIDTH, width)
            .with(keys::HEIGHT, height)
            .with(keys::PIXEL_TYPE, pixel_type.as_str());
        tags.set_coordinate(coords);
        tags
    }

    /// A new image with the same tags and different pixels.
    pub fn with_pixels(&self, pixels: impl Into<Bytes>) -> Result<Self, MetadataError> {
        Self::new(pixels, (*self.tags).clone())
    }

    /// A new image with the same pixels and different tags.
    pub fn with_tags(&self, tags: TagSet) -> Result<Self, MetadataError> {
        Self::new(self.pixels.clone(), tags)
    }

    pub fn pixels(&self) -> &Bytes {
        &self.pixels
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_type(&self) -> PixelType {
        self.pixel_type
    }

    pub fn coords(&self) -> Coordinate {
        self.coords
    }

    /// Label in `channel_slice_frame_position` form.
    pub fn label(&self) -> String {
        self.coords.label()
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }
}

impl fmt::Debug for TaggedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaggedImage")
            .field("coords", &self.coords)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pixel_type", &self.pixel_type)
            .field("tags", &self.tags.len())
            .finish()
    }
}
