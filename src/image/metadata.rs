//! Dataset-level metadata: summary and display settings.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MetadataError;

use super::coords::AxisOrder;
use super::tagged::PixelType;

// =============================================================================
// SummaryMetadata
// =============================================================================

/// One per acquisition; created before the first image arrives.
///
/// Only `comment` is expected to change after acquisition start. Unknown keys
/// from foreign writers are carried in `extra` so they survive a round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryMetadata {
    #[serde(default)]
    pub prefix: String,
    pub width: u32,
    pub height: u32,
    pub pixel_type: PixelType,
    #[serde(default = "one")]
    pub channels: u32,
    #[serde(default = "one")]
    pub slices: u32,
    #[serde(default = "one")]
    pub frames: u32,
    #[serde(default = "one")]
    pub positions: u32,
    #[serde(default)]
    pub channel_names: Vec<String>,
    #[serde(default, rename = "PixelSize_um")]
    pub pixel_size_um: f64,
    #[serde(default, rename = "z-step_um")]
    pub z_step_um: f64,
    #[serde(default)]
    pub slices_first: bool,
    #[serde(default)]
    pub time_first: bool,
    #[serde(default)]
    pub comment: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn one() -> u32 {
    1
}

impl SummaryMetadata {
    /// Summary for a `channels x slices x frames x positions` acquisition.
    pub fn new(width: u32, height: u32, pixel_type: PixelType) -> Self {
        Self {
            prefix: String::new(),
            width,
            height,
            pixel_type,
            channels: 1,
            slices: 1,
            frames: 1,
            positions: 1,
            channel_names: Vec::new(),
            pixel_size_um: 0.0,
            z_step_um: 0.0,
            slices_first: false,
            time_first: false,
            comment: String::new(),
            extra: Map::new(),
        }
    }

    /// Builder-style dimension setter.
    pub fn with_dimensions(mut self, channels: u32, slices: u32, frames: u32, positions: u32) -> Self {
        self.channels = channels.max(1);
        self.slices = slices.max(1);
        self.frames = frames.max(1);
        self.positions = positions.max(1);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// The on-disk ordering described by the two ordering flags.
    pub fn axis_order(&self) -> AxisOrder {
        AxisOrder::new(self.slices_first, self.time_first)
    }

    /// Bytes in one image's pixel buffer.
    pub fn bytes_per_image(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.pixel_type.bytes_per_pixel() as u64
    }

    /// Name of a channel, falling back to its index.
    pub fn channel_name(&self, channel: u32) -> String {
        self.channel_names
            .get(channel as usize)
            .cloned()
            .unwrap_or_else(|| format!("Ch{}", channel))
    }

    /// Serialize as a compact JSON string.
    pub fn to_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from a JSON string.
    pub fn from_json(text: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(text.trim_end_matches(['\0', ' ']))?)
    }

    /// Parse from an already-decoded JSON value.
    pub fn from_value(value: Value) -> Result<Self, MetadataError> {
        Ok(serde_json::from_value(value)?)
    }
}

// =============================================================================
// DisplaySettings
// =============================================================================

/// Display parameters of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelDisplay {
    pub name: String,
    /// Packed 0xRRGGBB color.
    pub color: u32,
    pub gamma: f64,
    pub min: u32,
    pub max: u32,
}

/// Per-channel display settings, persisted separately from the summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplaySettings {
    pub channels: Vec<ChannelDisplay>,
}

impl DisplaySettings {
    /// Default white, linear, full-range settings for every summary channel.
    pub fn defaults_for(summary: &SummaryMetadata) -> Self {
        let channels = (0..summary.channels)
            .map(|c| ChannelDisplay {
                name: summary.channel_name(c),
                color: 0xFF_FF_FF,
                gamma: 1.0,
                min: 0,
                max: summary.pixel_type.max_value(),
            })
            .collect();
        Self { channels }
    }

    pub fn to_json(&self) -> Result<String, MetadataError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, MetadataError> {
        Ok(serde_json::from_str(text.trim_end_matches(['\0', ' ']))?)
    }
}
