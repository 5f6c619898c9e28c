//! Sequential container writer.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};

use crate::error::ContainerError;
use crate::image::{AxisOrder, Coordinate, DisplaySettings, SummaryMetadata, TaggedImage};
use crate::io::ByteOrder;

use super::filler::{missing_planes, GridExtent};
use super::header::{encode_block, ContainerHeader, TrailerSlot};
use super::header::{COMMENTS_SLOT, DISPLAY_SETTINGS_SLOT, INDEX_MAP_SLOT};
use super::ifd::{encode_directory, encoded_size, DirectoryLayout, Resolution};
use super::index_map::IndexMap;
use super::ome::{build_ome_xml, OmePlane};
use super::tags::{
    COMMENTS_HEADER, COMMENTS_OFFSET_HEADER, DISPLAY_SETTINGS_HEADER,
    DISPLAY_SETTINGS_OFFSET_HEADER, INDEX_MAP_OFFSET_HEADER,
};

// =============================================================================
// Options
// =============================================================================

/// Largest file a container may grow to; every offset must fit in 32 bits.
pub const DEFAULT_MAX_FILE_SIZE: u64 = u32::MAX as u64;

/// Space kept free for the comments block and OME-XML written at close.
pub const DEFAULT_TRAILER_RESERVE: u64 = 1024 * 1024;

/// Space kept free per channel for the display settings block.
pub const DISPLAY_SETTINGS_BYTES_PER_CHANNEL: u64 = 256;

/// Estimated OME-XML bytes per plane, counted against the file size limit.
const OME_BYTES_PER_PLANE: u64 = 160;

/// Writer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    pub byte_order: ByteOrder,
    /// Clamped to [`DEFAULT_MAX_FILE_SIZE`]
    pub max_file_size: u64,
    pub trailer_reserve: u64,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            byte_order: ByteOrder::native(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            trailer_reserve: DEFAULT_TRAILER_RESERVE,
        }
    }
}

// =============================================================================
// ContainerWriter
// =============================================================================

/// Writes one container file: header, images in arrival order, then the
/// index map and trailer blocks.
///
/// The writer owns the file handle exclusively for the whole session. Images
/// written so far can be read back through a separate reader once
/// [`ContainerWriter::flush`] has been called; the writer's [`IndexMap`]
/// locates them.
pub struct ContainerWriter {
    path: PathBuf,
    file_name: String,
    file: Option<BufWriter<File>>,
    options: WriterOptions,
    axis_order: AxisOrder,
    summary: SummaryMetadata,
    resolution: Resolution,
    position: u64,
    index: IndexMap,
    written: Vec<Coordinate>,
    ifd_numbers: HashMap<u64, u32>,
    last_layout: Option<DirectoryLayout>,
    description_field: Option<u64>,
    index_written: bool,
}

impl ContainerWriter {
    /// Create (or truncate) `path` and write the header and summary.
    pub fn create(
        path: impl AsRef<Path>,
        summary: &SummaryMetadata,
        options: WriterOptions,
    ) -> Result<Self, ContainerError> {
        let path = path.as_ref().to_path_buf();
        let options = WriterOptions {
            max_file_size: options.max_file_size.min(DEFAULT_MAX_FILE_SIZE),
            ..options
        };

        let summary_json = summary.to_json()?;
        let (header, first_ifd) = ContainerHeader::encode(options.byte_order, summary_json.as_bytes());
        let mut file = BufWriter::new(File::create(&path)?);
        file.write_all(&header)?;

        debug!(path = %path.display(), first_ifd, "created container");

        Ok(Self {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            path,
            file: Some(file),
            options,
            axis_order: summary.axis_order(),
            summary: summary.clone(),
            resolution: Resolution::from_pixel_size_um(summary.pixel_size_um),
            position: first_ifd,
            index: IndexMap::new(),
            written: Vec::new(),
            ifd_numbers: HashMap::new(),
            last_layout: None,
            description_field: None,
            index_written: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.options.byte_order
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of real images written.
    pub fn image_count(&self) -> usize {
        self.written.len()
    }

    /// Coordinate to directory offset of everything written so far.
    pub fn index(&self) -> &IndexMap {
        &self.index
    }

    /// Whether the index map has been written and no more images are accepted.
    pub fn is_finished(&self) -> bool {
        self.index_written
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn space_needed(&self, image: &TaggedImage) -> u64 {
        let metadata_len = image.tags().to_json().len();
        let entries = self.index.len() as u64 + 1;
        encoded_size(image, metadata_len, self.written.is_empty())
            + IndexMap::encoded_len(self.index.len() + 1)
            + entries * OME_BYTES_PER_PLANE
            + self.summary.channels as u64 * DISPLAY_SETTINGS_BYTES_PER_CHANNEL
            + self.options.trailer_reserve
    }

    /// Whether `image` still fits under the file size limit, keeping room for
    /// the index map and trailer blocks.
    pub fn has_space_for(&self, image: &TaggedImage) -> bool {
        self.position + self.space_needed(image) <= self.options.max_file_size
    }

    fn file(&mut self) -> Result<&mut BufWriter<File>, ContainerError> {
        self.file.as_mut().ok_or(ContainerError::WriterClosed)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<u64, ContainerError> {
        let at = self.position;
        self.file()?.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(at)
    }

    fn patch(&mut self, at: u64, bytes: &[u8]) -> Result<(), ContainerError> {
        let end = self.position;
        let file = self.file()?;
        file.seek(SeekFrom::Start(at))?;
        file.write_all(bytes)?;
        file.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    /// Append one image.
    ///
    /// The entry's next pointer is set to where the following image will
    /// start, or to 0 when `is_last`. With `is_last` the index map is written
    /// right away and the writer accepts no more images.
    ///
    /// Returns the offset of the new directory entry.
    pub fn write_image(&mut self, image: &TaggedImage, is_last: bool) -> Result<u64, ContainerError> {
        if self.index_written || self.file.is_none() {
            return Err(ContainerError::WriterClosed);
        }
        if !self.has_space_for(image) {
            return Err(ContainerError::FileFull {
                needed: self.space_needed(image),
                limit: self.options.max_file_size.saturating_sub(self.position),
            });
        }

        let first = self.written.is_empty();
        let (bytes, layout) = encode_directory(
            self.options.byte_order,
            self.position,
            image,
            self.resolution,
            first,
            is_last,
        );
        let offset = self.append(&bytes)?;

        if first {
            self.description_field = layout.description_field;
        }
        self.ifd_numbers.insert(offset, self.written.len() as u32);
        self.index.insert(image.coords(), offset);
        self.written.push(image.coords());
        self.last_layout = Some(layout);

        trace!(coords = %image.coords(), offset, len = layout.len, "wrote directory entry");

        if is_last {
            self.finish()?;
        }
        Ok(offset)
    }

    /// Point every hole in the grid this file wrote at its nearest real image.
    ///
    /// The grid spans the summary's channels and slices and frames from 0 to
    /// the last one written. Returns how many filler entries were added to
    /// the index map.
    pub fn fill_missing_planes(&mut self) -> Result<usize, ContainerError> {
        let extent = GridExtent::new(self.summary.channels, self.summary.slices, 0);
        self.fill_missing_planes_within(&extent, &HashSet::new())
    }

    /// Fill every cell of `extent` that neither this file nor `covered` holds.
    ///
    /// `covered` names coordinates stored in other files of the same dataset.
    pub fn fill_missing_planes_within(
        &mut self,
        extent: &GridExtent,
        covered: &HashSet<Coordinate>,
    ) -> Result<usize, ContainerError> {
        if self.index_written {
            return Err(ContainerError::WriterClosed);
        }
        let fillers = missing_planes(&self.written, extent, covered, self.axis_order);
        let mut added = 0;
        for filler in fillers {
            if let Some(offset) = self.index.get(&filler.source) {
                if self.index.insert_if_absent(filler.missing, offset) {
                    added += 1;
                }
            }
        }
        if added > 0 {
            debug!(path = %self.path.display(), added, "added missing-plane fillers");
        }
        Ok(added)
    }

    /// Terminate the directory chain and write the index map.
    ///
    /// Idempotent.
    pub fn finish(&mut self) -> Result<(), ContainerError> {
        if self.index_written {
            return Ok(());
        }
        let order = self.options.byte_order;

        if let Some(layout) = self.last_layout {
            self.patch(layout.next_pointer_position, &order.u32_bytes(0))?;
        }

        let block = self.index.encode(order, self.axis_order);
        let index_offset = self.append(&block)?;
        self.patch(
            INDEX_MAP_SLOT,
            &TrailerSlot::encode(order, INDEX_MAP_OFFSET_HEADER, index_offset as u32),
        )?;
        self.file()?.flush()?;
        self.index_written = true;

        debug!(
            path = %self.path.display(),
            entries = self.index.len(),
            index_offset,
            "wrote index map"
        );
        Ok(())
    }

    /// Finish, then write OME-XML, display settings and comments and release
    /// the file handle.
    pub fn close(&mut self, display: &DisplaySettings, comment: &str) -> Result<(), ContainerError> {
        if self.file.is_none() {
            return Ok(());
        }
        self.finish()?;
        let order = self.options.byte_order;

        if let Some(field) = self.description_field {
            let mut xml = build_ome_xml(&self.summary, &self.ome_planes()).into_bytes();
            xml.push(0);
            let at = self.append(&xml)?;
            if self.position % 2 == 1 {
                self.append(&[0])?;
            }
            let mut count_and_offset = [0u8; 8];
            count_and_offset[..4].copy_from_slice(&order.u32_bytes(xml.len() as u32));
            count_and_offset[4..].copy_from_slice(&order.u32_bytes(at as u32));
            self.patch(field + 4, &count_and_offset)?;
        }

        let display_json = display.to_json()?;
        let block = encode_block(order, DISPLAY_SETTINGS_HEADER, display_json.as_bytes());
        let display_offset = self.append(&block)?;
        self.patch(
            DISPLAY_SETTINGS_SLOT,
            &TrailerSlot::encode(order, DISPLAY_SETTINGS_OFFSET_HEADER, display_offset as u32),
        )?;

        let comments_json = serde_json::json!({ "Summary": comment }).to_string();
        let block = encode_block(order, COMMENTS_HEADER, comments_json.as_bytes());
        let comments_offset = self.append(&block)?;
        self.patch(
            COMMENTS_SLOT,
            &TrailerSlot::encode(order, COMMENTS_OFFSET_HEADER, comments_offset as u32),
        )?;

        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.get_ref().sync_all()?;
        }

        info!(
            path = %self.path.display(),
            images = self.written.len(),
            bytes = self.position,
            "closed container"
        );
        Ok(())
    }

    /// Push buffered bytes to the file so readers can see them.
    pub fn flush(&mut self) -> Result<(), ContainerError> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }

    fn ome_planes(&self) -> Vec<OmePlane> {
        self.index
            .sorted(self.axis_order)
            .into_iter()
            .filter_map(|(coords, offset)| {
                self.ifd_numbers.get(&offset).map(|ifd| OmePlane {
                    coords,
                    ifd: *ifd,
                    file_name: self.file_name.clone(),
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for ContainerWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerWriter")
            .field("path", &self.path)
            .field("position", &self.position)
            .field("images", &self.written.len())
            .field("finished", &self.index_written)
            .finish()
    }
}
