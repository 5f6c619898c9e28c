//! JSON sidecar listing the summary and every image's tags.
//!
//! The file is one JSON object written incrementally:
//!
//! ```text
//! {
//! "Summary": { ... },
//! "FrameKey-0-0-0": { ... },
//! "FrameKey-0-1-0": { ... }
//! }
//! ```
//!
//! Records are flushed one at a time, so an interrupted acquisition leaves a
//! file that only lacks its closing brace (or ends inside the last record).
//! [`Sidecar::load`] recovers both cases.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{MetadataError, StoreError};
use crate::image::{keys, Coordinate, SummaryMetadata, TagSet};

/// Name of the sidecar in a disk-per-image dataset.
pub const SIDECAR_FILE_NAME: &str = "metadata.txt";

const FRAME_KEY_PREFIX: &str = "FrameKey-";
const RECORD_SEPARATOR: &str = ",\n\"";

/// Sidecar key of one image: `FrameKey-<frame>-<channel>-<slice>`.
pub fn frame_key(coords: &Coordinate) -> String {
    format!(
        "{}{}-{}-{}",
        FRAME_KEY_PREFIX, coords.frame, coords.channel, coords.slice
    )
}

// =============================================================================
// Writer
// =============================================================================

/// Appends records to a sidecar file.
pub struct SidecarWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    records: usize,
}

impl SidecarWriter {
    /// Create the file and write the summary record.
    pub fn create(path: impl AsRef<Path>, summary: &SummaryMetadata) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let summary = serde_json::to_string_pretty(summary).map_err(MetadataError::from)?;
        let mut file = BufWriter::new(File::create(&path)?);
        write!(file, "{{\n\"{}\": {}", keys::SUMMARY, summary)?;
        file.flush()?;
        debug!(path = %path.display(), "created sidecar");
        Ok(Self {
            path,
            file: Some(file),
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of image records written.
    pub fn records(&self) -> usize {
        self.records
    }

    /// Append the tags of one image.
    pub fn append(&mut self, coords: &Coordinate, tags: &TagSet) -> Result<(), StoreError> {
        let record = serde_json::to_string_pretty(tags).map_err(MetadataError::from)?;
        let file = self.file.as_mut().ok_or(StoreError::Finished)?;
        write!(file, ",\n\"{}\": {}", frame_key(coords), record)?;
        file.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Write the closing brace. Idempotent.
    pub fn close(&mut self) -> Result<(), StoreError> {
        if let Some(mut file) = self.file.take() {
            file.write_all(b"\n}\n")?;
            file.flush()?;
            file.get_ref().sync_all()?;
        }
        Ok(())
    }
}

// =============================================================================
// Parsed sidecar
// =============================================================================

/// Contents of a sidecar file.
#[derive(Debug, Clone, PartialEq)]
pub struct Sidecar {
    pub summary: SummaryMetadata,
    /// Image records in file order, keyed by frame key.
    pub frames: Vec<(String, TagSet)>,
    /// Any other top-level records, such as `SystemState`.
    pub other: Map<String, Value>,
}

impl Sidecar {
    /// Parse a complete sidecar document.
    ///
    /// A truncated file fails with [`MetadataError::InvalidMetadata`];
    /// see [`Sidecar::recover`].
    pub fn parse(text: &str) -> Result<Self, MetadataError> {
        let root: Map<String, Value> = serde_json::from_str(text).map_err(|e| {
            MetadataError::InvalidMetadata(format!("sidecar is not a complete JSON object: {}", e))
        })?;

        let mut summary = None;
        let mut frames = Vec::new();
        let mut other = Map::new();
        for (key, value) in root {
            if key == keys::SUMMARY {
                summary = Some(SummaryMetadata::from_value(value)?);
            } else if key.starts_with(FRAME_KEY_PREFIX) {
                match value {
                    Value::Object(map) => frames.push((key, TagSet::from_map(map))),
                    _ => {
                        return Err(MetadataError::InvalidMetadata(format!(
                            "record {} is not an object",
                            key
                        )))
                    }
                }
            } else {
                other.insert(key, value);
            }
        }

        let summary = summary.ok_or_else(|| {
            MetadataError::InvalidMetadata("sidecar has no Summary record".to_string())
        })?;
        Ok(Self {
            summary,
            frames,
            other,
        })
    }

    /// Candidate repairs of an interrupted sidecar, most complete first.
    ///
    /// The first appends the missing closing brace; the second also drops a
    /// record cut off mid-write.
    pub fn recover(text: &str) -> Vec<String> {
        let trimmed = text.trim_end().trim_end_matches(',');
        let mut candidates = vec![format!("{}\n}}", trimmed)];
        if let Some(cut) = trimmed.rfind(RECORD_SEPARATOR) {
            candidates.push(format!("{}\n}}", &trimmed[..cut]));
        }
        candidates
    }

    /// Read and parse a sidecar file, recovering an interrupted one.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let invalid = |source| StoreError::InvalidMetadata {
            path: path.display().to_string(),
            source,
        };

        let err = match Self::parse(&text) {
            Ok(sidecar) => return Ok(sidecar),
            Err(err) => err,
        };
        if !matches!(err, MetadataError::InvalidMetadata(_)) {
            return Err(invalid(err));
        }

        for candidate in Self::recover(&text) {
            if let Ok(sidecar) = Self::parse(&candidate) {
                warn!(
                    path = %path.display(),
                    records = sidecar.frames.len(),
                    "recovered truncated sidecar"
                );
                return Ok(sidecar);
            }
        }
        Err(invalid(err))
    }
}

// =============================================================================
// Tests
// =============================================================================
