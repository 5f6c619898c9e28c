//! Multipage container store.
//!
//! An acquisition is written into one container series, or one series per
//! stage position. A series rolls over into `<base>_<n>.ome.tif` when the
//! current file cannot take the next image under its size limit.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ContainerError, StoreError};
use crate::format::container::{ContainerReader, ContainerWriter, GridExtent, WriterOptions};
use crate::image::{Coordinate, DisplaySettings, SummaryMetadata, TaggedImage};

use super::sidecar::SidecarWriter;
use super::{check_geometry, check_summary_change, sorted_keys, ImageStore};

const CONTAINER_SUFFIX: &str = ".ome.tif";

/// How a multipage dataset is split into files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipageOptions {
    /// One file series per stage position.
    pub split_by_position: bool,
    /// Also write a `<base>_metadata.txt` sidecar per series.
    pub write_metadata_file: bool,
    pub writer: WriterOptions,
}

impl Default for MultipageOptions {
    fn default() -> Self {
        Self {
            split_by_position: true,
            write_metadata_file: false,
            writer: WriterOptions::default(),
        }
    }
}

// =============================================================================
// State
// =============================================================================

struct ContainerFile {
    path: PathBuf,
    reader: Option<ContainerReader>,
    /// The writer holds bytes readers cannot see yet.
    dirty: bool,
    /// Trailer written; readers can use the index map.
    complete: bool,
}

struct Series {
    base: String,
    writer: Option<ContainerWriter>,
    file: usize,
    rollovers: u32,
    sidecar: Option<SidecarWriter>,
}

#[derive(Debug, Clone, Copy)]
struct Location {
    file: usize,
    offset: u64,
}

struct MultipageState {
    summary: SummaryMetadata,
    display: DisplaySettings,
    files: Vec<ContainerFile>,
    series: BTreeMap<u32, Series>,
    locations: HashMap<Coordinate, Location>,
    fillers: HashSet<Coordinate>,
    finished: bool,
    closed: bool,
}

impl MultipageState {
    fn new(summary: SummaryMetadata, display: DisplaySettings) -> Self {
        Self {
            summary,
            display,
            files: Vec::new(),
            series: BTreeMap::new(),
            locations: HashMap::new(),
            fillers: HashSet::new(),
            finished: false,
            closed: false,
        }
    }

    fn record(&mut self, coords: Coordinate, location: Location) {
        self.locations.insert(coords, location);
        self.fillers.remove(&coords);
    }

    /// Index fillers of a finished file that no real image covers.
    fn merge_fillers(&mut self, file: usize) -> Result<(), ContainerError> {
        let Some(reader) = self.files[file].reader.as_ref() else {
            return Ok(());
        };
        let mut added = Vec::new();
        for (coords, offset) in reader.index().iter() {
            if reader.is_filler(coords) && !self.locations.contains_key(coords) {
                added.push((*coords, *offset));
            }
        }
        for (coords, offset) in added {
            self.locations.insert(coords, Location { file, offset });
            self.fillers.insert(coords);
        }
        Ok(())
    }

    fn reader(&mut self, file: usize) -> Result<&ContainerReader, ContainerError> {
        if self.files[file].dirty {
            if let Some(writer) = self
                .series
                .values_mut()
                .filter(|s| s.file == file)
                .find_map(|s| s.writer.as_mut())
            {
                writer.flush()?;
            }
            self.files[file].dirty = false;
        }

        let entry = &mut self.files[file];
        if entry.reader.is_none() {
            let reader = if entry.complete {
                ContainerReader::open(&entry.path)?
            } else {
                ContainerReader::open_unindexed(&entry.path)?
            };
            entry.reader = Some(reader);
        }
        entry.reader.as_ref().ok_or(ContainerError::WriterClosed)
    }
}

// =============================================================================
// MultipageStore
// =============================================================================

/// Stores an acquisition in multipage container files.
///
/// Images are readable by coordinate as soon as they are written; the
/// containers are finalized (fillers, index map, display settings, comments,
/// OME-XML) by [`ImageStore::finished`].
pub struct MultipageStore {
    dir: PathBuf,
    options: MultipageOptions,
    read_only: bool,
    state: Mutex<MultipageState>,
}

impl MultipageStore {
    /// Start a new dataset in `dir`.
    pub fn create(
        dir: impl AsRef<Path>,
        summary: SummaryMetadata,
        options: MultipageOptions,
    ) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        info!(
            dir = %dir.display(),
            split_by_position = options.split_by_position,
            "created multipage dataset"
        );
        let display = DisplaySettings::defaults_for(&summary);
        Ok(Self {
            dir,
            options,
            read_only: false,
            state: Mutex::new(MultipageState::new(summary, display)),
        })
    }

    /// Open every container in `dir` read-only.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref();
        let files = Self::container_files(dir)?;
        if files.is_empty() {
            return Err(StoreError::UnknownDataset(dir.display().to_string()));
        }
        let mut store = Self::open_files(files)?;
        store.dir = dir.to_path_buf();
        Ok(store)
    }

    /// Open the given container files read-only as one dataset.
    ///
    /// Index maps are validated up front; a container without a valid index
    /// map fails the open (see
    /// [`repair_index_map`](crate::format::container::repair_index_map)).
    pub fn open_files(paths: Vec<PathBuf>) -> Result<Self, StoreError> {
        let mut readers = Vec::with_capacity(paths.len());
        for path in &paths {
            readers.push(ContainerReader::open(path)?);
        }
        let first = readers
            .first()
            .ok_or_else(|| StoreError::UnknownDataset("no container files".to_string()))?;

        let mut summary = first.summary().clone();
        if !first.comment().is_empty() {
            summary.comment = first.comment().to_string();
        }
        let mut state = MultipageState::new(summary, first.display_settings());

        for (file, reader) in readers.iter().enumerate() {
            for coords in reader.coordinates() {
                if let Some(offset) = reader.index().get(&coords) {
                    state.record(coords, Location { file, offset });
                }
            }
        }
        for (path, reader) in paths.iter().zip(readers) {
            state.files.push(ContainerFile {
                path: path.clone(),
                reader: Some(reader),
                dirty: false,
                complete: true,
            });
        }
        for file in 0..state.files.len() {
            state.merge_fillers(file)?;
        }
        state.finished = true;

        let dir = paths
            .first()
            .and_then(|p| p.parent())
            .map(Path::to_path_buf)
            .unwrap_or_default();
        info!(
            dir = %dir.display(),
            files = state.files.len(),
            images = state.locations.len() - state.fillers.len(),
            fillers = state.fillers.len(),
            "opened multipage dataset"
        );
        Ok(Self {
            dir,
            options: MultipageOptions::default(),
            read_only: true,
            state: Mutex::new(state),
        })
    }

    /// Whether `dir` holds at least one container file.
    pub fn is_dataset(dir: &Path) -> Result<bool, StoreError> {
        Ok(!Self::container_files(dir)?.is_empty())
    }

    /// Container files in `dir`, grouped by series and in rollover order.
    pub fn container_files(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_tiff = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"));
            if is_tiff && path.is_file() && ContainerReader::open_unindexed(&path).is_ok() {
                files.push(path);
            }
        }
        files.sort_by_cached_key(|path| rollover_key(path));
        Ok(files)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Paths of every container file written or opened so far.
    pub fn files(&self) -> Vec<PathBuf> {
        self.state.lock().files.iter().map(|f| f.path.clone()).collect()
    }

    /// Whether the image at `coords` is a stand-in for a missing plane.
    pub fn is_filler(&self, coords: &Coordinate) -> bool {
        self.state.lock().fillers.contains(coords)
    }

    fn series_key(&self, coords: &Coordinate) -> u32 {
        if self.options.split_by_position {
            coords.position
        } else {
            0
        }
    }

    fn series_base(&self, summary: &SummaryMetadata, key: u32) -> String {
        let prefix = if summary.prefix.is_empty() {
            "images"
        } else {
            summary.prefix.as_str()
        };
        if self.options.split_by_position {
            format!("{}_MMStack_Pos{}", prefix, key)
        } else {
            format!("{}_MMStack", prefix)
        }
    }

    fn file_path(&self, base: &str, rollover: u32) -> PathBuf {
        if rollover == 0 {
            self.dir.join(format!("{}{}", base, CONTAINER_SUFFIX))
        } else {
            self.dir.join(format!("{}_{}{}", base, rollover, CONTAINER_SUFFIX))
        }
    }

    /// Open a new container for `series`, registering it as a file.
    fn start_file(
        &self,
        state: &mut MultipageState,
        base: &str,
        rollover: u32,
    ) -> Result<(ContainerWriter, usize), StoreError> {
        let path = self.file_path(base, rollover);
        let writer = ContainerWriter::create(&path, &state.summary, self.options.writer)?;
        state.files.push(ContainerFile {
            path,
            reader: None,
            dirty: true,
            complete: false,
        });
        Ok((writer, state.files.len() - 1))
    }

    fn ensure_series(&self, state: &mut MultipageState, key: u32) -> Result<(), StoreError> {
        if state.series.contains_key(&key) {
            return Ok(());
        }
        let base = self.series_base(&state.summary, key);
        let (writer, file) = self.start_file(state, &base, 0)?;
        let sidecar = if self.options.write_metadata_file {
            let path = self.dir.join(format!("{}_metadata.txt", base));
            Some(SidecarWriter::create(path, &state.summary)?)
        } else {
            None
        };
        state.series.insert(
            key,
            Series {
                base,
                writer: Some(writer),
                file,
                rollovers: 0,
                sidecar,
            },
        );
        Ok(())
    }

    /// Finalize the current file of a series and start the next one.
    fn roll_over(&self, state: &mut MultipageState, key: u32) -> Result<(), StoreError> {
        let (base, rollovers) = match state.series.get(&key) {
            Some(series) => (series.base.clone(), series.rollovers + 1),
            None => return Ok(()),
        };
        let finished_file = close_series_file(state, key, None)?;
        let (writer, file) = self.start_file(state, &base, rollovers)?;
        if let Some(series) = state.series.get_mut(&key) {
            series.writer = Some(writer);
            series.file = file;
            series.rollovers = rollovers;
        }
        if let Some(done) = finished_file {
            state.merge_fillers(done)?;
        }
        info!(series = %base, file = rollovers, "container full, rolled over");
        Ok(())
    }

    fn finish_locked(&self, state: &mut MultipageState) -> Result<(), StoreError> {
        if state.finished {
            return Ok(());
        }
        let covered: HashSet<Coordinate> = state
            .locations
            .keys()
            .filter(|c| !state.fillers.contains(c))
            .copied()
            .collect();
        let last_frame = covered.iter().map(|c| c.frame).max().unwrap_or(0);
        let last_position = covered.iter().map(|c| c.position).max().unwrap_or(0);
        let extent = GridExtent::new(state.summary.channels, state.summary.slices, last_frame + 1);

        let keys: Vec<u32> = state.series.keys().copied().collect();
        let claimed = if self.options.split_by_position {
            positions_by_series(&keys, last_position)
        } else {
            keys.iter().map(|k| (*k, (0..=last_position).collect())).collect()
        };

        let mut completed = Vec::new();
        for key in keys {
            let positions = claimed.get(&key).cloned().unwrap_or_default();
            let series_extent = extent.clone().with_positions(positions);
            if let Some(file) = close_series_file(state, key, Some((&series_extent, &covered)))? {
                completed.push(file);
            }
            if let Some(series) = state.series.get_mut(&key) {
                if let Some(sidecar) = series.sidecar.as_mut() {
                    sidecar.close()?;
                }
            }
        }
        for file in completed {
            state.merge_fillers(file)?;
        }
        state.finished = true;
        info!(
            dir = %self.dir.display(),
            files = state.files.len(),
            images = state.locations.len() - state.fillers.len(),
            fillers = state.fillers.len(),
            "multipage dataset finished"
        );
        Ok(())
    }
}

/// `(series base, rollover number)` of a container path.
///
/// `run_MMStack_Pos0_12.ome.tif` sorts as `("run_MMStack_Pos0", 12)`; a name
/// without a numeric suffix is rollover 0.
fn rollover_key(path: &Path) -> (String, u32) {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name
        .strip_suffix(CONTAINER_SUFFIX)
        .or_else(|| name.rsplit_once('.').map(|(stem, _)| stem))
        .unwrap_or(name.as_str());
    match stem.rsplit_once('_') {
        Some((base, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
            (base.to_string(), n.parse().unwrap_or(u32::MAX))
        }
        _ => (stem.to_string(), 0),
    }
}

/// Assign every position up to `last_position` to a series.
///
/// A position with no series of its own goes to the nearest series below it,
/// or the lowest series when there is none below.
fn positions_by_series(keys: &[u32], last_position: u32) -> BTreeMap<u32, Vec<u32>> {
    let mut claimed: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for position in 0..=last_position {
        let owner = keys
            .iter()
            .copied()
            .filter(|k| *k <= position)
            .max()
            .or_else(|| keys.iter().copied().min());
        if let Some(owner) = owner {
            claimed.entry(owner).or_default().push(position);
        }
    }
    claimed
}

/// Fill, close and reopen the current file of a series.
///
/// Files closed on rollover are full and get no fillers. Returns the file
/// index when a file was finalized.
fn close_series_file(
    state: &mut MultipageState,
    key: u32,
    fill: Option<(&GridExtent, &HashSet<Coordinate>)>,
) -> Result<Option<usize>, StoreError> {
    let comment = state.summary.comment.clone();
    let Some(series) = state.series.get_mut(&key) else {
        return Ok(None);
    };
    let Some(mut writer) = series.writer.take() else {
        return Ok(None);
    };
    let file = series.file;

    let fillers = match fill {
        Some((extent, covered)) => writer.fill_missing_planes_within(extent, covered)?,
        None => 0,
    };
    writer.close(&state.display, &comment)?;
    debug!(path = %writer.path().display(), images = writer.image_count(), fillers, "finalized container");

    let entry = &mut state.files[file];
    entry.dirty = false;
    entry.complete = true;
    entry.reader = Some(ContainerReader::open(&entry.path)?);
    Ok(Some(file))
}

impl ImageStore for MultipageStore {
    fn put_image(&self, image: &TaggedImage) -> Result<String, StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let coords = image.coords();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(StoreError::Closed);
        }
        if state.finished {
            return Err(StoreError::Finished);
        }
        check_geometry(&state.summary, image)?;

        let key = self.series_key(&coords);
        self.ensure_series(state, key)?;

        let needs_rollover = state
            .series
            .get(&key)
            .and_then(|s| s.writer.as_ref())
            .is_some_and(|w| w.image_count() > 0 && !w.has_space_for(image));
        if needs_rollover {
            self.roll_over(state, key)?;
        }

        let series = state
            .series
            .get_mut(&key)
            .ok_or(StoreError::Container(ContainerError::WriterClosed))?;
        let writer = series.writer.as_mut().ok_or(StoreError::Container(ContainerError::WriterClosed))?;
        let offset = writer.write_image(image, false)?;
        if let Some(sidecar) = series.sidecar.as_mut() {
            sidecar.append(&coords, image.tags())?;
        }
        let file = series.file;

        state.files[file].dirty = true;
        state.record(coords, Location { file, offset });
        Ok(image.label())
    }

    fn get_image(&self, coords: &Coordinate) -> Result<Option<TaggedImage>, StoreError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(None);
        }
        let Some(location) = state.locations.get(coords).copied() else {
            return Ok(None);
        };
        let reader = state.reader(location.file)?;
        match reader.read_image_at(location.offset) {
            Ok(image) => Ok(Some(image)),
            Err(err) => {
                warn!(%coords, offset = location.offset, error = %err, "failed to read image");
                Err(err.into())
            }
        }
    }

    fn image_keys(&self) -> Vec<Coordinate> {
        let state = self.state.lock();
        if state.closed {
            return Vec::new();
        }
        sorted_keys(
            &state.summary,
            state
                .locations
                .keys()
                .filter(|c| !state.fillers.contains(c))
                .copied(),
        )
    }

    fn summary_metadata(&self) -> SummaryMetadata {
        self.state.lock().summary.clone()
    }

    fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), StoreError> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        let mut state = self.state.lock();
        check_summary_change(&state.summary, &summary, !state.locations.is_empty())?;
        state.summary = summary;
        Ok(())
    }

    fn display_settings(&self) -> DisplaySettings {
        self.state.lock().display.clone()
    }

    fn set_display_settings(&self, display: DisplaySettings) -> Result<(), StoreError> {
        self.state.lock().display = display;
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
        for file in state.files.iter_mut() {
            file.reader = None;
        }
        state.locations.clear();
        state.fillers.clear();
        state.closed = true;
        result
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn image_count(&self) -> usize {
        let state = self.state.lock();
        state.locations.len() - state.fillers.len()
    }
}

impl std::fmt::Debug for MultipageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipageStore")
            .field("dir", &self.dir)
            .field("options", &self.options)
            .field("read_only", &self.read_only)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
