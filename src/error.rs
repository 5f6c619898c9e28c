use thiserror::Error;

use crate::image::{Coordinate, PixelType};

/// I/O errors that can occur when reading or writing dataset files
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Requested range exceeds resource bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    RangeOutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// File or directory not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operating system could not allocate memory for the operation
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// The device holding the dataset has no space left
    #[error("Storage full: {0}")]
    StorageFull(String),

    /// Any other operating system I/O failure
    #[error("I/O failure: {0}")]
    Io(String),
}

/// OS error codes for a full device: ENOSPC and EDQUOT on Unix,
/// ERROR_HANDLE_DISK_FULL and ERROR_DISK_FULL on Windows.
#[cfg(unix)]
const STORAGE_FULL_CODES: &[i32] = &[28, 122];
#[cfg(windows)]
const STORAGE_FULL_CODES: &[i32] = &[39, 112];
#[cfg(not(any(unix, windows)))]
const STORAGE_FULL_CODES: &[i32] = &[];

fn is_storage_full(err: &std::io::Error) -> bool {
    err.raw_os_error()
        .is_some_and(|code| STORAGE_FULL_CODES.contains(&code))
}

impl From<std::io::Error> for IoError {
    fn from(err: std::io::Error) -> Self {
        if is_storage_full(&err) {
            return IoError::StorageFull(err.to_string());
        }
        match err.kind() {
            std::io::ErrorKind::NotFound => IoError::NotFound(err.to_string()),
            std::io::ErrorKind::OutOfMemory => IoError::OutOfMemory(err.to_string()),
            _ => IoError::Io(err.to_string()),
        }
    }
}

impl IoError {
    /// Out of memory or out of disk space.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, IoError::OutOfMemory(_) | IoError::StorageFull(_))
    }
}

/// Errors raised by tag-set accessors and metadata documents
#[derive(Debug, Clone, Error)]
pub enum MetadataError {
    /// A required tag is absent from the tag set
    #[error("Missing required tag: {0}")]
    MissingTag(String),

    /// A tag is present but holds a value of the wrong type
    #[error("Tag {key} has wrong type: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: String,
    },

    /// PixelType tag names a format this crate cannot store
    #[error("Unknown pixel type: {0}")]
    UnknownPixelType(String),

    /// Pixel buffer length disagrees with width/height/pixel type
    #[error("Pixel buffer holds {actual} bytes, expected {expected}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// A metadata document (e.g. the sidecar file) is structurally invalid
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::Json(err.to_string())
    }
}

/// Errors that can occur when reading or writing multi-page containers
#[derive(Debug, Clone, Error)]
pub enum ContainerError {
    /// I/O error while reading or writing the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Image or summary metadata could not be decoded
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Invalid byte-order marker (not II or MM)
    #[error("Invalid byte order marker: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid format version number
    #[error("Invalid format version: expected 42, got {0}")]
    InvalidVersion(u16),

    /// File is too small to contain a valid header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Summary metadata block at offset 32 carries the wrong header tag
    #[error("Invalid summary metadata header: expected {expected}, found {found}")]
    InvalidSummaryHeader { expected: u32, found: u32 },

    /// Index map pointer slot or block carries the wrong header tag
    #[error("Invalid index map at offset {offset}: expected header {expected}, found {found}")]
    InvalidIndexMap { offset: u64, expected: u32, found: u32 },

    /// A trailer pointer slot carries the wrong header tag
    #[error("Invalid {block} pointer at offset {slot}: expected header {expected}, found {found}")]
    InvalidOffsetHeader {
        block: &'static str,
        slot: u64,
        expected: u32,
        found: u32,
    },

    /// Directory entry cannot describe a stored image
    #[error("Invalid directory entry at offset {offset}: {reason}")]
    InvalidDirectory { offset: u64, reason: String },

    /// Offset points outside the file
    #[error("Offset {offset} lies outside the file (size {size})")]
    InvalidOffset { offset: u64, size: u64 },

    /// Unknown field type in a directory entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// Write attempted after the writer was closed
    #[error("Container writer is closed")]
    WriterClosed,

    /// The image does not fit under the configured file size limit
    #[error("Container full: {needed} bytes needed, limit is {limit}")]
    FileFull { needed: u64, limit: u64 },
}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        ContainerError::Io(err.into())
    }
}

/// Errors returned by image stores
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Store was opened from an existing dataset and cannot accept writes
    #[error("Store is read-only")]
    ReadOnly,

    /// Store has already been finished
    #[error("Store is finished; no further images can be written")]
    Finished,

    /// Store has been closed
    #[error("Store is closed")]
    Closed,

    /// Image geometry differs from the summary metadata
    #[error(
        "Image at {coords} is {found_width}x{found_height} {found_type}, \
         dataset is {width}x{height} {pixel_type}"
    )]
    DimensionMismatch {
        coords: Coordinate,
        width: u32,
        height: u32,
        pixel_type: PixelType,
        found_width: u32,
        found_height: u32,
        found_type: PixelType,
    },

    /// Summary geometry changed after images were stored
    #[error("Summary geometry cannot change once images are stored")]
    GeometryLocked,

    /// Directory holds no recognizable dataset
    #[error("No dataset found at {0}")]
    UnknownDataset(String),

    /// In-memory buffering exceeded its budget
    #[error("Out of memory storing {coords}: {requested} bytes requested, {available} available")]
    OutOfMemory {
        coords: Coordinate,
        requested: u64,
        available: u64,
    },

    /// Two coordinates map onto the same image file
    #[error("Image at {coords} would overwrite the file of {owner}: {path}")]
    FileNameClash {
        coords: Coordinate,
        owner: Coordinate,
        path: String,
    },

    /// A single image failed to encode or decode
    #[error("Failed to encode image at {coords}: {reason}")]
    Encode { coords: Coordinate, reason: String },

    /// Sidecar or settings file could not be parsed
    #[error("Invalid metadata in {path}: {source}")]
    InvalidMetadata {
        path: String,
        #[source]
        source: MetadataError,
    },

    /// Metadata accessor failure
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    /// Container codec failure
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    /// Plain I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err.into())
    }
}

impl StoreError {
    /// Whether this error means the store cannot take any more images.
    ///
    /// Covers memory budgets, full devices and images too large for any
    /// container. The pipeline sink treats these as fatal and stops pulling
    /// images.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            StoreError::OutOfMemory { .. } => true,
            StoreError::Io(err) => err.is_resource_exhaustion(),
            StoreError::Container(ContainerError::Io(err)) => err.is_resource_exhaustion(),
            StoreError::Container(ContainerError::FileFull { .. }) => true,
            _ => false,
        }
    }
}

/// Errors raised by the acquisition pipeline
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The other end of a queue has gone away
    #[error("Queue disconnected")]
    Disconnected,

    /// A processor stage failed in a way that ended the stage
    #[error("Stage {stage} failed: {reason}")]
    StageFailed { stage: String, reason: String },

    /// The hardware collaborator reported an error
    #[error("Image source error: {0}")]
    Source(String),

    /// A worker task could not be joined
    #[error("Worker task failed: {0}")]
    Join(String),
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        PipelineError::Join(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_full_device_is_resource_exhaustion() {
        let err: StoreError = std::io::Error::from_raw_os_error(28).into();
        assert!(matches!(err, StoreError::Io(IoError::StorageFull(_))));
        assert!(err.is_resource_exhaustion());

        let err: StoreError = ContainerError::from(std::io::Error::from_raw_os_error(28)).into();
        assert!(err.is_resource_exhaustion());
    }

    #[test]
    fn test_oversized_image_is_resource_exhaustion() {
        let err = StoreError::Container(ContainerError::FileFull { needed: 4096, limit: 100 });
        assert!(err.is_resource_exhaustion());
    }

    #[test]
    fn test_transient_errors_are_not_exhaustion() {
        let not_found: StoreError = std::io::Error::from(std::io::ErrorKind::NotFound).into();
        assert!(!not_found.is_resource_exhaustion());
        let encode = StoreError::Encode {
            coords: Coordinate::default(),
            reason: "bad pixels".to_string(),
        };
        assert!(!encode.is_resource_exhaustion());
        assert!(!StoreError::Finished.is_resource_exhaustion());
    }
}
