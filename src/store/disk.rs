//! Disk-per-image store: one TIFF file per image plus a JSON sidecar.
//!
//! Layout of a dataset directory:
//!
//! ```text
//! <root>/display_and_comments.txt
//! <root>/metadata.txt                       (single position)
//! <root>/img_000000000_DAPI_000.tif
//! <root>/Pos1/metadata.txt                  (multi-position)
//! <root>/Pos1/img_000000000_DAPI_000.tif
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::format::single::{read_tiff, write_tiff};
use crate::image::{Coordinate, DisplaySettings, SummaryMetadata, TagSet, TaggedImage};

use super::front_cache::FrontCache;
use super::sidecar::{Sidecar, SidecarWriter, SIDECAR_FILE_NAME};
use super::{check_geometry, check_summary_change, sorted_keys, ImageStore};

/// Display settings and comments of a disk-per-image dataset.
pub const DISPLAY_FILE_NAME: &str = "display_and_comments.txt";

/// Image file name: `img_<frame>_<channel name>_<slice>.tif`.
///
/// Channel names are reduced to `[A-Za-z0-9_-]`. When two channels reduce to
/// the same text, each of them also carries its index (`GFP_1_c0`).
fn image_file_name(summary: &SummaryMetadata, coords: &Coordinate) -> String {
    format!(
        "img_{:09}_{}_{:03}.tif",
        coords.frame,
        channel_file_label(summary, coords.channel),
        coords.slice
    )
}

fn sanitize_channel_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn channel_file_label(summary: &SummaryMetadata, channel: u32) -> String {
    let label = sanitize_channel_name(&summary.channel_name(channel));
    let span = summary
        .channels
        .max(summary.channel_names.len() as u32)
        .max(channel + 1);
    let clashes = (0..span)
        .filter(|other| *other != channel)
        .any(|other| sanitize_channel_name(&summary.channel_name(other)) == label);
    if clashes {
        format!("{}_c{}", label, channel)
    } else {
        label
    }
}

struct DiskEntry {
    path: PathBuf,
    tags: TagSet,
}

struct DiskState {
    summary: SummaryMetadata,
    display: DisplaySettings,
    entries: HashMap<Coordinate, DiskEntry>,
    /// Which coordinate each image file belongs to.
    owners: HashMap<PathBuf, Coordinate>,
    sidecars: HashMap<u32, SidecarWriter>,
    finished: bool,
    closed: bool,
}

/// Writes each image to its own TIFF file as it arrives.
///
/// Every image's tags are appended to the position's `metadata.txt` sidecar
/// right after its pixels hit the disk, so an interrupted acquisition can be
/// reopened with everything written up to that point.
pub struct DiskStore {
    root: PathBuf,
    read_only: bool,
    state: Mutex<DiskState>,
    front: FrontCache,
}

impl DiskStore {
    /// Start a new dataset in `root`, creating the directory if needed.
    pub fn create(root: impl AsRef<Path>, summary: SummaryMetadata) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        info!(root = %root.display(), "created disk-per-image dataset");
        Ok(Self::with_state(
            root,
            false,
            DiskState {
                display: DisplaySettings::defaults_for(&summary),
                summary,
                entries: HashMap::new(),
                owners: HashMap::new(),
                sidecars: HashMap::new(),
                finished: false,
                closed: false,
            },
        ))
    }

    /// Open an existing dataset read-only.
    ///
    /// Every sidecar is parsed before the store is returned, so all images
    /// are addressable from the first [`ImageStore::get_image`] call.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        let sidecar_dirs = Self::sidecar_dirs(&root)?;
        if sidecar_dirs.is_empty() {
            return Err(StoreError::UnknownDataset(root.display().to_string()));
        }

        let mut summary: Option<SummaryMetadata> = None;
        let mut entries = HashMap::new();
        for dir in &sidecar_dirs {
            let sidecar_path = dir.join(SIDECAR_FILE_NAME);
            let sidecar = Sidecar::load(&sidecar_path)?;
            let dataset_summary = summary.get_or_insert(sidecar.summary.clone());
            for (key, tags) in sidecar.frames {
                let coords = tags.coordinate().map_err(|source| StoreError::InvalidMetadata {
                    path: format!("{} ({})", sidecar_path.display(), key),
                    source,
                })?;
                let path = dir.join(image_file_name(dataset_summary, &coords));
                entries.insert(coords, DiskEntry { path, tags });
            }
        }
        let mut summary = summary.ok_or_else(|| StoreError::UnknownDataset(root.display().to_string()))?;

        let (display, comment) = Self::read_display_file(&root, &summary);
        if let Some(comment) = comment {
            summary.comment = comment;
        }

        info!(
            root = %root.display(),
            images = entries.len(),
            positions = sidecar_dirs.len(),
            "opened disk-per-image dataset"
        );
        Ok(Self::with_state(
            root,
            true,
            DiskState {
                summary,
                display,
                owners: entries.iter().map(|(c, e)| (e.path.clone(), *c)).collect(),
                entries,
                sidecars: HashMap::new(),
                finished: true,
                closed: false,
            },
        ))
    }

    fn with_state(root: PathBuf, read_only: bool, state: DiskState) -> Self {
        Self {
            root,
            read_only,
            state: Mutex::new(state),
            front: FrontCache::new(),
        }
    }

    /// Whether `root` looks like a disk-per-image dataset.
    pub fn is_dataset(root: &Path) -> Result<bool, StoreError> {
        Ok(!Self::sidecar_dirs(root)?.is_empty())
    }

    /// Directories holding a sidecar: the root itself, or its `Pos*` children.
    fn sidecar_dirs(root: &Path) -> Result<Vec<PathBuf>, StoreError> {
        if root.join(SIDECAR_FILE_NAME).is_file() {
            return Ok(vec![root.to_path_buf()]);
        }
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            let is_position = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("Pos"));
            if is_position && path.join(SIDECAR_FILE_NAME).is_file() {
                dirs.push(path);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn position_dir(&self, summary: &SummaryMetadata, position: u32) -> PathBuf {
        if summary.positions <= 1 && position == 0 {
            self.root.clone()
        } else {
            self.root.join(format!("Pos{}", position))
        }
    }

    fn read_display_file(root: &Path, summary: &SummaryMetadata) -> (DisplaySettings, Option<String>) {
        let defaults = DisplaySettings::defaults_for(summary);
        let path = root.join(DISPLAY_FILE_NAME);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => return (defaults, None),
        };
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable display settings");
                return (defaults, None);
            }
        };

        let display = value
            .get("Channels")
            .cloned()
            .and_then(|channels| serde_json::from_value(channels).ok())
            .unwrap_or(defaults);
        let comment = value
            .pointer("/Comments/Summary")
            .and_then(Value::as_str)
            .map(String::from);
        (display, comment)
    }

    fn write_display_file(&self, state: &DiskState) -> Result<(), StoreError> {
        let document = json!({
            "Channels": state.display,
            "Comments": { "Summary": state.summary.comment },
        });
        let text = serde_json::to_string_pretty(&document).map_err(crate::error::MetadataError::from)?;
        std::fs::write(self.root.join(DISPLAY_FILE_NAME), text)?;
        Ok(())
    }

    fn finish_locked(&self, state: &mut DiskState) -> Result<(), StoreError> {
        if state.finished {
            return Ok(());
        }
        for sidecar in state.sidecars.values_mut() {
            sidecar.close()?;
        }
        state.sidecars.clear();
        self.write_display_file(state)?;
        state.finished = true;
        info!(root = %self.root.display(), images = state.entries.len(), "disk dataset finished");
        Ok(())
    }
}

impl ImageStore for DiskStore {
    fn put_image(&self, image: &TaggedImage) -> Result<String, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let coords = image.coords();
        let mut state = self.state.lock();
        if state.closed {
            return Err(StoreError::Closed);
        }
        if state.finished {
            return Err(StoreError::Finished);
        }
        check_geometry(&state.summary, image)?;

        let dir = self.position_dir(&state.summary, coords.position);
        if !state.sidecars.contains_key(&coords.position) {
            std::fs::create_dir_all(&dir)?;
            let writer = SidecarWriter::create(dir.join(SIDECAR_FILE_NAME), &state.summary)?;
            state.sidecars.insert(coords.position, writer);
        }

        let path = dir.join(image_file_name(&state.summary, &coords));
        if let Some(owner) = state.owners.get(&path).filter(|owner| **owner != coords) {
            return Err(StoreError::FileNameClash {
                coords,
                owner: *owner,
                path: path.display().to_string(),
            });
        }
        write_tiff(&path, image)?;
        if let Some(sidecar) = state.sidecars.get_mut(&coords.position) {
            sidecar.append(&coords, image.tags())?;
        }

        debug!(%coords, path = %path.display(), "wrote image file");
        state.owners.insert(path.clone(), coords);
        state.entries.insert(
            coords,
            DiskEntry {
                path,
                tags: image.tags().clone(),
            },
        );
        self.front.put(coords, image.clone());
        Ok(image.label())
    }

    fn get_image(&self, coords: &Coordinate) -> Result<Option<TaggedImage>, StoreError> {
        if let Some(hit) = self.front.get(coords) {
            return Ok(Some(hit));
        }
        // Held across the file read so a put at the same coordinate cannot
        // interleave with it or be shadowed by a stale front-cache entry.
        let state = self.state.lock();
        if state.closed {
            return Ok(None);
        }
        let Some(entry) = state.entries.get(coords) else {
            return Ok(None);
        };

        let pixels = read_tiff(&entry.path, *coords, state.summary.pixel_type)?;
        let image = TaggedImage::new(pixels, entry.tags.clone())?;
        self.front.put(*coords, image.clone());
        Ok(Some(image))
    }

    fn image_keys(&self) -> Vec<Coordinate> {
        let state = self.state.lock();
        if state.closed {
            return Vec::new();
        }
        sorted_keys(&state.summary, state.entries.keys().copied())
    }

    fn summary_metadata(&self) -> SummaryMetadata {
        self.state.lock().summary.clone()
    }

    fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let mut state = self.state.lock();
        check_summary_change(&state.summary, &summary, !state.entries.is_empty())?;
        state.summary = summary;
        if state.finished && !state.closed {
            self.write_display_file(&state)?;
        }
        Ok(())
    }

    fn display_settings(&self) -> DisplaySettings {
        self.state.lock().display.clone()
    }

    fn set_display_settings(&self, display: DisplaySettings) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.display = display;
        if state.finished && !state.closed && !self.read_only {
            self.write_display_file(&state)?;
        }
        Ok(())
    }

    fn finished(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        self.finish_locked(&mut state)
    }

    fn is_finished(&self) -> bool {
        self.state.lock().finished
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        let result = self.finish_locked(&mut state);
        state.entries.clear();
        state.closed = true;
        self.front.clear();
        result
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn image_count(&self) -> usize {
        self.state.lock().entries.len()
    }
}

impl std::fmt::Debug for DiskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskStore")
            .field("root", &self.root)
            .field("read_only", &self.read_only)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
