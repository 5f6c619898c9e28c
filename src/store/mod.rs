//! Coordinate-addressed image stores.
//!
//! Every store implements [`ImageStore`]; the pipeline sink writes through it
//! and display code reads back through it, possibly at the same time.
//!
//! # Implementations
//!
//! - [`RamStore`]: everything in memory, with an optional [`FrontCache`] and
//!   byte budget
//! - [`DiskStore`]: one TIFF file per image plus a JSON sidecar per position
//! - [`MultipageStore`]: whole acquisition in one or a few container files
//!
//! # Lifecycle
//!
//! A writable store accepts images until [`ImageStore::finished`] is called
//! (exactly once has effect; later calls are no-ops). [`ImageStore::close`]
//! releases files and memory; afterwards reads return `None`.
//! Stores opened from an existing dataset with [`open_dataset`] are
//! read-only.

mod disk;
mod front_cache;
mod multipage;
mod ram;
mod sidecar;

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::StoreError;
use crate::image::{Coordinate, DisplaySettings, SummaryMetadata, TaggedImage};

pub use disk::{DiskStore, DISPLAY_FILE_NAME};
pub use front_cache::{FrontCache, DEFAULT_FRONT_CACHE_ENTRIES};
pub use multipage::{MultipageOptions, MultipageStore};
pub use ram::RamStore;
pub use sidecar::{frame_key, Sidecar, SidecarWriter, SIDECAR_FILE_NAME};

// =============================================================================
// ImageStore
// =============================================================================

/// A repository of tagged images addressed by coordinate.
///
/// Methods take `&self`; implementations serialize their own mutations so a
/// sink thread can write while a display thread reads.
pub trait ImageStore: Send + Sync {
    /// Store an image, replacing any image already at its coordinate.
    ///
    /// Returns the image label (`channel_slice_frame_position`).
    fn put_image(&self, image: &TaggedImage) -> Result<String, StoreError>;

    /// Fetch the image at `coords`, if any.
    fn get_image(&self, coords: &Coordinate) -> Result<Option<TaggedImage>, StoreError>;

    /// Coordinates of all stored images, in the dataset's axis order.
    fn image_keys(&self) -> Vec<Coordinate>;

    fn summary_metadata(&self) -> SummaryMetadata;

    /// Replace the summary.
    ///
    /// Once images are stored only fields other than the image geometry may
    /// change.
    fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), StoreError>;

    fn display_settings(&self) -> DisplaySettings;

    fn set_display_settings(&self, display: DisplaySettings) -> Result<(), StoreError>;

    /// Mark the dataset complete. Idempotent.
    fn finished(&self) -> Result<(), StoreError>;

    fn is_finished(&self) -> bool;

    /// Release all resources. Idempotent.
    fn close(&self) -> Result<(), StoreError>;

    /// Whether the store was opened from an existing dataset.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Free-form comment carried in the summary.
    fn comment(&self) -> String {
        self.summary_metadata().comment
    }

    fn set_comment(&self, comment: &str) -> Result<(), StoreError> {
        let mut summary = self.summary_metadata();
        summary.comment = comment.to_string();
        self.set_summary_metadata(summary)
    }

    /// Number of stored images.
    fn image_count(&self) -> usize {
        self.image_keys().len()
    }
}

// =============================================================================
// Shared checks
// =============================================================================

/// Reject an image whose geometry differs from the dataset's.
pub fn check_geometry(summary: &SummaryMetadata, image: &TaggedImage) -> Result<(), StoreError> {
    if image.width() == summary.width
        && image.height() == summary.height
        && image.pixel_type() == summary.pixel_type
    {
        return Ok(());
    }
    Err(StoreError::DimensionMismatch {
        coords: image.coords(),
        width: summary.width,
        height: summary.height,
        pixel_type: summary.pixel_type,
        found_width: image.width(),
        found_height: image.height(),
        found_type: image.pixel_type(),
    })
}

/// Reject a summary replacement that changes geometry once images exist.
pub fn check_summary_change(
    current: &SummaryMetadata,
    next: &SummaryMetadata,
    has_images: bool,
) -> Result<(), StoreError> {
    let same_geometry = current.width == next.width
        && current.height == next.height
        && current.pixel_type == next.pixel_type;
    if has_images && !same_geometry {
        return Err(StoreError::GeometryLocked);
    }
    Ok(())
}

/// Sort coordinates the way `summary` lays the dataset out.
pub fn sorted_keys(summary: &SummaryMetadata, keys: impl IntoIterator<Item = Coordinate>) -> Vec<Coordinate> {
    let mut keys: Vec<Coordinate> = keys.into_iter().collect();
    summary.axis_order().sort(&mut keys);
    keys
}

// =============================================================================
// Dataset detection
// =============================================================================

/// Open an existing dataset directory read-only.
///
/// A directory holding `metadata.txt` (directly or under `Pos*/`) is a
/// disk-per-image dataset; a directory holding `*.tif` containers is a
/// multipage dataset. A single container file path is also accepted.
pub fn open_dataset(path: impl AsRef<Path>) -> Result<Arc<dyn ImageStore>, StoreError> {
    let path = path.as_ref();
    if path.is_file() {
        info!(path = %path.display(), "opening container file");
        return Ok(Arc::new(MultipageStore::open_files(vec![path.to_path_buf()])?));
    }
    if !path.is_dir() {
        return Err(StoreError::UnknownDataset(path.display().to_string()));
    }

    if DiskStore::is_dataset(path)? {
        info!(path = %path.display(), "opening disk-per-image dataset");
        return Ok(Arc::new(DiskStore::open(path)?));
    }
    if MultipageStore::is_dataset(path)? {
        info!(path = %path.display(), "opening multipage dataset");
        return Ok(Arc::new(MultipageStore::open(path)?));
    }
    Err(StoreError::UnknownDataset(path.display().to_string()))
}
