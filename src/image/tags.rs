//! Open key/value metadata attached to every image.
//!
//! Tags are an ordered string-keyed mapping of JSON values. Insertion order is
//! preserved so a tag set serializes back to exactly the bytes it was read from.
//! Typed accessors fail with [`MetadataError::MissingTag`] or
//! [`MetadataError::TypeMismatch`] instead of inventing defaults.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::MetadataError;

use super::coords::Coordinate;

/// Well-known tag names.
pub mod keys {
    pub const WIDTH: &str = "Width";
    pub const HEIGHT: &str = "Height";
    pub const PIXEL_TYPE: &str = "PixelType";
    pub const CHANNEL_INDEX: &str = "ChannelIndex";
    pub const SLICE_INDEX: &str = "SliceIndex";
    pub const FRAME_INDEX: &str = "FrameIndex";
    pub const POSITION_INDEX: &str = "PositionIndex";
    pub const CHANNEL: &str = "Channel";
    pub const POSITION_NAME: &str = "PositionName";
    pub const EXPOSURE_MS: &str = "Exposure-ms";
    pub const ELAPSED_TIME_MS: &str = "ElapsedTime-ms";
    pub const Z_UM: &str = "ZPositionUm";
    pub const FILE_NAME: &str = "FileName";
    pub const SUMMARY: &str = "Summary";
}

/// Ordered tag set of one image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(Map<String, Value>);

impl TagSet {
    /// Create an empty tag set.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap an existing JSON object.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Parse a tag set from a JSON object string.
    pub fn from_json(text: &str) -> Result<Self, MetadataError> {
        match serde_json::from_str::<Value>(text.trim_end_matches(['\0', ' ']))? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(MetadataError::InvalidMetadata(format!(
                "expected a JSON object for image tags, found {}",
                type_name(&other)
            ))),
        }
    }

    /// Serialize to a compact JSON object string.
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a tag, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Remove a tag, preserving the order of the remaining ones.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    fn require(&self, key: &str) -> Result<&Value, MetadataError> {
        self.0
            .get(key)
            .ok_or_else(|| MetadataError::MissingTag(key.to_string()))
    }

    /// Read a string tag.
    pub fn get_str(&self, key: &str) -> Result<&str, MetadataError> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| mismatch(key, "string", value))
    }

    /// Read a signed integer tag.
    ///
    /// Integers written as strings (a common habit of acquisition software)
    /// are accepted when they parse cleanly.
    pub fn get_i64(&self, key: &str) -> Result<i64, MetadataError> {
        let value = self.require(key)?;
        match value {
            Value::Number(n) => n.as_i64().ok_or_else(|| mismatch(key, "integer", value)),
            Value::String(s) => s.trim().parse().map_err(|_| mismatch(key, "integer", value)),
            _ => Err(mismatch(key, "integer", value)),
        }
    }

    /// Read a non-negative integer tag that fits in 32 bits.
    pub fn get_u32(&self, key: &str) -> Result<u32, MetadataError> {
        let raw = self.get_i64(key)?;
        u32::try_from(raw).map_err(|_| MetadataError::TypeMismatch {
            key: key.to_string(),
            expected: "unsigned 32-bit integer",
            found: raw.to_string(),
        })
    }

    /// Read a floating-point tag.
    pub fn get_f64(&self, key: &str) -> Result<f64, MetadataError> {
        let value = self.require(key)?;
        match value {
            Value::Number(n) => n.as_f64().ok_or_else(|| mismatch(key, "number", value)),
            Value::String(s) => s.trim().parse().map_err(|_| mismatch(key, "number", value)),
            _ => Err(mismatch(key, "number", value)),
        }
    }

    /// Read the four coordinate index tags.
    pub fn coordinate(&self) -> Result<Coordinate, MetadataError> {
        Ok(Coordinate::new(
            self.get_u32(keys::CHANNEL_INDEX)?,
            self.get_u32(keys::SLICE_INDEX)?,
            self.get_u32(keys::FRAME_INDEX)?,
            self.get_u32(keys::POSITION_INDEX)?,
        ))
    }

    /// Write the four coordinate index tags.
    pub fn set_coordinate(&mut self, coords: Coordinate) {
        self.insert(keys::CHANNEL_INDEX, coords.channel);
        self.insert(keys::SLICE_INDEX, coords.slice);
        self.insert(keys::FRAME_INDEX, coords.frame);
        self.insert(keys::POSITION_INDEX, coords.position);
    }
}

impl From<Map<String, Value>> for TagSet {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn mismatch(key: &str, expected: &'static str, found: &Value) -> MetadataError {
    MetadataError::TypeMismatch {
        key: key.to_string(),
        expected,
        found: type_name(found).to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
