//! Random-access container reader.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::ContainerError;
use crate::image::{
    keys, Coordinate, DisplaySettings, PixelType, SummaryMetadata, TagSet, TaggedImage,
};
use crate::io::{ByteOrder, MappedFile, RangeReader};

use super::header::{ContainerHeader, TrailerSlot, HEADER_SIZE};
use super::ifd::{directory_size, Directory};
use super::index_map::{IndexMap, INDEX_ENTRY_SIZE, INDEX_PREFIX_SIZE};
use super::tags::{
    COMMENTS_HEADER, COMMENTS_OFFSET_HEADER, DISPLAY_SETTINGS_HEADER,
    DISPLAY_SETTINGS_OFFSET_HEADER, INDEX_MAP_OFFSET_HEADER,
};

/// Reads images out of one container file by coordinate.
///
/// [`ContainerReader::open`] validates the header and rebuilds the complete
/// index map before any image can be requested. Every read maps exactly the
/// byte range it needs, so any number of readers may share a file.
pub struct ContainerReader<R: RangeReader = MappedFile> {
    reader: R,
    header: ContainerHeader,
    summary: SummaryMetadata,
    index: IndexMap,
    fillers: HashSet<Coordinate>,
    display: Option<DisplaySettings>,
    comment: String,
}

impl ContainerReader<MappedFile> {
    /// Open a finished container.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        Self::from_reader(MappedFile::open(path)?)
    }

    /// Open a container without reading its trailer.
    ///
    /// Used for files still being written and for files whose index map is
    /// missing; images are reachable through [`ContainerReader::read_image_at`]
    /// and [`ContainerReader::images`].
    pub fn open_unindexed(path: impl AsRef<Path>) -> Result<Self, ContainerError> {
        Self::unindexed(MappedFile::open(path)?)
    }
}

impl<R: RangeReader> ContainerReader<R> {
    /// Validate the header, read the summary and rebuild the index map.
    pub fn from_reader(reader: R) -> Result<Self, ContainerError> {
        let mut container = Self::unindexed(reader)?;
        container.load_trailer()?;
        Ok(container)
    }

    /// Validate the header and read the summary only.
    pub fn unindexed(reader: R) -> Result<Self, ContainerError> {
        let size = reader.size();
        if size < HEADER_SIZE as u64 {
            return Err(ContainerError::FileTooSmall {
                required: HEADER_SIZE as u64,
                actual: size,
            });
        }
        let header_bytes = reader.read_exact_at(0, HEADER_SIZE)?;
        let header = ContainerHeader::parse(&header_bytes, size)?;

        let summary_bytes = reader.read_exact_at(HEADER_SIZE as u64, header.summary_len as usize)?;
        let summary = SummaryMetadata::from_json(&String::from_utf8_lossy(&summary_bytes))?;

        Ok(Self {
            reader,
            header,
            summary,
            index: IndexMap::new(),
            fillers: HashSet::new(),
            display: None,
            comment: String::new(),
        })
    }

    fn load_trailer(&mut self) -> Result<(), ContainerError> {
        let order = self.header.byte_order;
        let slot = self.header.index_map;
        if slot.tag != INDEX_MAP_OFFSET_HEADER {
            return Err(ContainerError::InvalidIndexMap {
                offset: slot.position,
                expected: INDEX_MAP_OFFSET_HEADER,
                found: slot.tag,
            });
        }

        let prefix = self.reader.read_exact_at(slot.offset, INDEX_PREFIX_SIZE)?;
        let count = IndexMap::decode_prefix(&prefix, order, slot.offset)?;
        let entries = self.reader.read_exact_at(
            slot.offset + INDEX_PREFIX_SIZE as u64,
            count * INDEX_ENTRY_SIZE,
        )?;
        self.index = IndexMap::decode_entries(&entries, order, self.reader.size())?;
        self.fillers = self.detect_fillers()?;

        self.display = self
            .read_optional_block(
                self.header.display_settings,
                DISPLAY_SETTINGS_OFFSET_HEADER,
                DISPLAY_SETTINGS_HEADER,
                "display settings",
            )
            .and_then(|text| match DisplaySettings::from_json(&text) {
                Ok(display) => Some(display),
                Err(err) => {
                    warn!(file = self.reader.identifier(), error = %err, "unreadable display settings");
                    None
                }
            });

        self.comment = self
            .read_optional_block(
                self.header.comments,
                COMMENTS_OFFSET_HEADER,
                COMMENTS_HEADER,
                "comments",
            )
            .and_then(|text| serde_json::from_str::<serde_json::Value>(&text).ok())
            .and_then(|value| value.get("Summary").and_then(|s| s.as_str()).map(String::from))
            .unwrap_or_default();

        debug!(
            file = self.reader.identifier(),
            entries = self.index.len(),
            fillers = self.fillers.len(),
            "loaded container index"
        );
        Ok(())
    }

    /// Read a display settings or comments block.
    ///
    /// These blocks do not affect whether pixels can be trusted, so a damaged
    /// one is logged and skipped rather than failing the open.
    fn read_optional_block(
        &self,
        slot: TrailerSlot,
        slot_tag: u32,
        block_tag: u32,
        block: &'static str,
    ) -> Option<String> {
        if slot.is_empty() {
            return None;
        }
        if slot.tag != slot_tag {
            let err = ContainerError::InvalidOffsetHeader {
                block,
                slot: slot.position,
                expected: slot_tag,
                found: slot.tag,
            };
            warn!(file = self.reader.identifier(), error = %err, "ignoring trailer block");
            return None;
        }

        let order = self.header.byte_order;
        let read = || -> Result<Bytes, ContainerError> {
            let prefix = self.reader.read_exact_at(slot.offset, 8)?;
            let tag = order.read_u32(&prefix);
            if tag != block_tag {
                return Err(ContainerError::InvalidOffsetHeader {
                    block,
                    slot: slot.offset,
                    expected: block_tag,
                    found: tag,
                });
            }
            let len = order.read_offset(&prefix[4..]);
            Ok(self.reader.read_exact_at(slot.offset + 8, len as usize)?)
        };

        match read() {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(err) => {
                warn!(file = self.reader.identifier(), error = %err, "ignoring trailer block");
                None
            }
        }
    }

    /// Fillers share their offset with the real image they stand in for. The
    /// real owner of a shared offset is the coordinate its own tags name.
    fn detect_fillers(&self) -> Result<HashSet<Coordinate>, ContainerError> {
        let mut by_offset: HashMap<u64, Vec<Coordinate>> = HashMap::new();
        for (coords, offset) in self.index.iter() {
            by_offset.entry(*offset).or_default().push(*coords);
        }

        let mut fillers = HashSet::new();
        for (offset, coords) in by_offset {
            if coords.len() < 2 {
                continue;
            }
            let owner = self.read_tags_at(offset)?.coordinate()?;
            fillers.extend(coords.into_iter().filter(|c| *c != owner));
        }
        Ok(fillers)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    pub fn summary(&self) -> &SummaryMetadata {
        &self.summary
    }

    /// Stored display settings, or defaults derived from the summary.
    pub fn display_settings(&self) -> DisplaySettings {
        self.display
            .clone()
            .unwrap_or_else(|| DisplaySettings::defaults_for(&self.summary))
    }

    /// Summary comment from the comments block.
    pub fn comment(&self) -> &str {
        &self.comment
    }

    /// The index map including filler entries.
    pub fn index(&self) -> &IndexMap {
        &self.index
    }

    pub fn identifier(&self) -> &str {
        self.reader.identifier()
    }

    /// Coordinates of real images, sorted by the dataset's axis order.
    pub fn coordinates(&self) -> Vec<Coordinate> {
        let mut coords: Vec<Coordinate> = self
            .index
            .iter()
            .map(|(c, _)| *c)
            .filter(|c| !self.fillers.contains(c))
            .collect();
        self.summary.axis_order().sort(&mut coords);
        coords
    }

    /// Whether `coords` is served by a stand-in image.
    pub fn is_filler(&self, coords: &Coordinate) -> bool {
        self.fillers.contains(coords)
    }

    /// Whether any image, real or filler, is indexed at `coords`.
    pub fn contains(&self, coords: &Coordinate) -> bool {
        self.index.contains(coords)
    }

    // -------------------------------------------------------------------------
    // Image access
    // -------------------------------------------------------------------------

    /// Read the image indexed at `coords`.
    ///
    /// Filler coordinates return the image standing in for them, unchanged.
    pub fn read_image(&self, coords: &Coordinate) -> Result<Option<TaggedImage>, ContainerError> {
        match self.index.get(coords) {
            Some(offset) => self.read_image_at(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Decode the fixed part of the directory entry at `offset`.
    pub fn read_directory(&self, offset: u64) -> Result<Directory, ContainerError> {
        let size = self.reader.size();
        if offset.saturating_add(2) > size {
            return Err(ContainerError::InvalidOffset { offset, size });
        }
        let count_bytes = self.reader.read_exact_at(offset, 2)?;
        let count = self.header.byte_order.read_u16(&count_bytes);
        let bytes = self.reader.read_exact_at(offset, directory_size(count))?;
        Directory::parse(&bytes, offset, self.header.byte_order)
    }

    fn read_metadata(&self, dir: &Directory) -> Result<TagSet, ContainerError> {
        let bytes = self
            .reader
            .read_exact_at(dir.metadata_offset, dir.metadata_len as usize)?;
        Ok(TagSet::from_json(&String::from_utf8_lossy(&bytes))?)
    }

    fn read_tags_at(&self, offset: u64) -> Result<TagSet, ContainerError> {
        let dir = self.read_directory(offset)?;
        self.read_metadata(&dir)
    }

    /// Read the image whose directory entry starts at `offset`.
    pub fn read_image_at(&self, offset: u64) -> Result<TaggedImage, ContainerError> {
        let dir = self.read_directory(offset)?;
        self.decode_image(&dir)
    }

    fn decode_image(&self, dir: &Directory) -> Result<TaggedImage, ContainerError> {
        let tags = self.read_metadata(dir)?;
        let strip = self
            .reader
            .read_exact_at(dir.strip_offset, dir.strip_byte_count as usize)?;

        let wide = tags
            .get_str(keys::PIXEL_TYPE)
            .ok()
            .and_then(|t| t.parse::<PixelType>().ok())
            .map(|t| t.bits_per_sample() == 16)
            .unwrap_or(false);
        let pixels = if wide && self.header.byte_order == ByteOrder::BigEndian {
            self.header.byte_order.convert_u16_samples(&strip)
        } else {
            strip
        };

        let image = TaggedImage::new(pixels, tags)?;
        if image.width() != dir.width || image.height() != dir.height {
            return Err(ContainerError::InvalidDirectory {
                offset: dir.offset,
                reason: format!(
                    "directory says {}x{}, image tags say {}x{}",
                    dir.width,
                    dir.height,
                    image.width(),
                    image.height()
                ),
            });
        }
        Ok(image)
    }

    /// Read the image at `offset` and return it with the offset of the entry
    /// that follows it in the directory chain.
    ///
    /// Returns `None` at the end of the chain: a 0 offset, or an offset at or
    /// past the end of the file (the slot a writer will fill next).
    pub fn read_next_image(&self, offset: u64) -> Result<Option<(TaggedImage, u64)>, ContainerError> {
        if offset == 0 || offset >= self.reader.size() {
            return Ok(None);
        }
        let dir = self.read_directory(offset)?;
        let image = self.decode_image(&dir)?;
        Ok(Some((image, dir.next_ifd_offset)))
    }

    /// Walk the directory chain from the first entry.
    pub fn images(&self) -> ImageChain<'_, R> {
        ImageChain {
            container: self,
            next: self.header.first_ifd_offset,
            done: false,
        }
    }
}

/// Iterator over the directory chain, yielding `(offset, image)`.
///
/// Stops after the first error, and when a next pointer fails to move forward.
pub struct ImageChain<'a, R: RangeReader> {
    container: &'a ContainerReader<R>,
    next: u64,
    done: bool,
}

impl<R: RangeReader> Iterator for ImageChain<'_, R> {
    type Item = Result<(u64, TaggedImage), ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let offset = self.next;
        match self.container.read_next_image(offset) {
            Ok(Some((image, next))) => {
                if next <= offset {
                    self.done = true;
                }
                self.next = next;
                Some(Ok((offset, image)))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl<R: RangeReader> std::fmt::Debug for ContainerReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerReader")
            .field("file", &self.reader.identifier())
            .field("entries", &self.index.len())
            .field("fillers", &self.fillers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::container::{ContainerWriter, WriterOptions, INDEX_MAP_HEADER};
    use crate::image::{ChannelDisplay, PixelType};
    use serde_json::json;
    use std::path::PathBuf;

    fn summary(pixel_type: PixelType) -> SummaryMetadata {
        let mut summary = SummaryMetadata::new(5, 3, pixel_type)
            .with_dimensions(2, 2, 1, 1)
            .with_prefix("unit");
        summary.slices_first = true;
        summary.pixel_size_um = 0.65;
        summary
    }

    fn image(pixel_type: PixelType, coords: Coordinate, seed: u8) -> TaggedImage {
        let len = 5 * 3 * pixel_type.bytes_per_pixel();
        let pixels: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect();
        let tags = TaggedImage::base_tags(5, 3, pixel_type, coords)
            .with("Camera", "Sim")
            .with("Exposure-ms", 10.5)
            .with("Nested", json!({"a": [1, 2, 3], "b": null}))
            .with("Unit", "µm");
        TaggedImage::new(pixels, tags).unwrap()
    }

    fn write_container(
        path: &PathBuf,
        pixel_type: PixelType,
        order: ByteOrder,
        coords: &[Coordinate],
    ) -> Vec<TaggedImage> {
        let options = WriterOptions {
            byte_order: order,
            ..WriterOptions::default()
        };
        let mut writer = ContainerWriter::create(path, &summary(pixel_type), options).unwrap();
        let images: Vec<TaggedImage> = coords
            .iter()
            .enumerate()
            .map(|(i, c)| image(pixel_type, *c, i as u8))
            .collect();
        for img in &images {
            writer.write_image(img, false).unwrap();
        }
        let display = DisplaySettings {
            channels: vec![ChannelDisplay {
                name: "DAPI".into(),
                color: 0x0000FF,
                gamma: 0.8,
                min: 3,
                max: 900,
            }],
        };
        writer.close(&display, "overnight run").unwrap();
        images
    }

    fn grid() -> Vec<Coordinate> {
        vec![
            Coordinate::new(0, 0, 0, 0),
            Coordinate::new(0, 1, 0, 0),
            Coordinate::new(1, 0, 0, 0),
            Coordinate::new(1, 1, 0, 0),
        ]
    }

    // -------------------------------------------------------------------------
    // Round trip
    // -------------------------------------------------------------------------

    #[test]
    fn test_round_trip_every_pixel_type_and_byte_order() {
        let dir = tempfile::tempdir().unwrap();
        for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
            for pixel_type in [PixelType::Gray8, PixelType::Gray16, PixelType::Rgb32, PixelType::Rgb64] {
                let path = dir.path().join(format!("{:?}_{}.ome.tif", order, pixel_type));
                let written = write_container(&path, pixel_type, order, &grid());

                let reader = ContainerReader::open(&path).unwrap();
                assert_eq!(reader.byte_order(), order);
                assert_eq!(reader.summary(), &summary(pixel_type));
                assert_eq!(reader.coordinates().len(), 4);
                for img in &written {
                    let back = reader.read_image(&img.coords()).unwrap().unwrap();
                    assert_eq!(back.pixels(), img.pixels());
                    assert_eq!(back.tags(), img.tags());
                    assert_eq!(back.tags().to_json(), img.tags().to_json());
                }
            }
        }
    }

    #[test]
    fn test_trailer_blocks_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trailer.ome.tif");
        write_container(&path, PixelType::Gray16, ByteOrder::LittleEndian, &grid());

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.comment(), "overnight run");
        let display = reader.display_settings();
        assert_eq!(display.channels.len(), 1);
        assert_eq!(display.channels[0].max, 900);
        assert!(reader.read_image(&Coordinate::new(5, 5, 5, 5)).unwrap().is_none());
    }

    #[test]
    fn test_coordinates_follow_axis_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("order.ome.tif");
        let mut coords = grid();
        coords.reverse();
        write_container(&path, PixelType::Gray8, ByteOrder::LittleEndian, &coords);

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.coordinates(), grid());
    }

    #[test]
    fn test_chain_walk_matches_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.ome.tif");
        let written = write_container(&path, PixelType::Gray8, ByteOrder::BigEndian, &grid());

        let reader = ContainerReader::open(&path).unwrap();
        let walked: Vec<Coordinate> = reader
            .images()
            .map(|item| item.unwrap().1.coords())
            .collect();
        let expected: Vec<Coordinate> = written.iter().map(|i| i.coords()).collect();
        assert_eq!(walked, expected);

        let first = reader.header().first_ifd_offset;
        let (img, next) = reader.read_next_image(first).unwrap().unwrap();
        assert_eq!(img.coords(), written[0].coords());
        assert_eq!(Some(next), reader.index().get(&written[1].coords()));
    }

    // -------------------------------------------------------------------------
    // Format integrity
    // -------------------------------------------------------------------------

    fn patch_file(path: &PathBuf, at: usize, bytes: &[u8]) {
        let mut data = std::fs::read(path).unwrap();
        data[at..at + bytes.len()].copy_from_slice(bytes);
        std::fs::write(path, data).unwrap();
    }

    #[test]
    fn test_wrong_index_map_slot_tag_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot.ome.tif");
        write_container(&path, PixelType::Gray8, ByteOrder::LittleEndian, &grid());
        patch_file(&path, 8, &[0xAA, 0xBB, 0xCC, 0xDD]);

        assert!(matches!(
            ContainerReader::open(&path),
            Err(ContainerError::InvalidIndexMap {
                offset: 8,
                expected: INDEX_MAP_OFFSET_HEADER,
                found: 0xDDCCBBAA
            })
        ));
    }

    #[test]
    fn test_wrong_index_map_block_tag_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("block.ome.tif");
        write_container(&path, PixelType::Gray8, ByteOrder::LittleEndian, &grid());
        let block = ContainerReader::open(&path).unwrap().header().index_map.offset;
        patch_file(&path, block as usize, &[0, 0, 0, 0]);

        match ContainerReader::open(&path) {
            Err(ContainerError::InvalidIndexMap {
                offset,
                expected,
                found,
            }) => {
                assert_eq!(offset, block);
                assert_eq!(expected, INDEX_MAP_HEADER);
                assert_eq!(found, 0);
            }
            other => panic!("expected InvalidIndexMap, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_magic_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("magic.ome.tif");
        write_container(&path, PixelType::Gray8, ByteOrder::LittleEndian, &grid());
        patch_file(&path, 0, b"XY");
        assert!(matches!(
            ContainerReader::open(&path),
            Err(ContainerError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_damaged_display_block_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("display.ome.tif");
        write_container(&path, PixelType::Gray16, ByteOrder::LittleEndian, &grid());
        patch_file(&path, 16, &[1, 2, 3, 4]);

        let reader = ContainerReader::open(&path).unwrap();
        let display = reader.display_settings();
        assert_eq!(display, DisplaySettings::defaults_for(reader.summary()));
        assert_eq!(reader.comment(), "overnight run");
    }

    #[test]
    fn test_unfinished_file_has_no_index_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("open.ome.tif");
        let mut writer =
            ContainerWriter::create(&path, &summary(PixelType::Gray8), WriterOptions::default()).unwrap();
        writer.write_image(&image(PixelType::Gray8, grid()[0], 0), false).unwrap();
        writer.write_image(&image(PixelType::Gray8, grid()[1], 1), false).unwrap();
        writer.flush().unwrap();

        assert!(matches!(
            ContainerReader::open(&path),
            Err(ContainerError::InvalidIndexMap { offset: 8, found: 0, .. })
        ));

        let pending = ContainerReader::open_unindexed(&path).unwrap();
        assert_eq!(pending.images().count(), 2);
        let offset = writer.index().get(&grid()[1]).unwrap();
        assert_eq!(pending.read_image_at(offset).unwrap().coords(), grid()[1]);
    }

    // -------------------------------------------------------------------------
    // Writer protocol
    // -------------------------------------------------------------------------

    #[test]
    fn test_is_last_finishes_writer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.ome.tif");
        let mut writer =
            ContainerWriter::create(&path, &summary(PixelType::Gray8), WriterOptions::default()).unwrap();
        writer.write_image(&image(PixelType::Gray8, grid()[0], 0), true).unwrap();
        assert!(writer.is_finished());
        assert!(matches!(
            writer.write_image(&image(PixelType::Gray8, grid()[1], 1), false),
            Err(ContainerError::WriterClosed)
        ));
        writer.flush().unwrap();

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.coordinates(), vec![grid()[0]]);
        let first = reader.header().first_ifd_offset;
        assert_eq!(reader.read_directory(first).unwrap().next_ifd_offset, 0);
    }

    #[test]
    fn test_file_full() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("full.ome.tif");
        let options = WriterOptions {
            max_file_size: 1700,
            trailer_reserve: 0,
            ..WriterOptions::default()
        };
        let mut writer = ContainerWriter::create(&path, &summary(PixelType::Gray16), options).unwrap();
        let img = image(PixelType::Gray16, grid()[0], 0);
        assert!(writer.has_space_for(&img));
        writer.write_image(&img, false).unwrap();

        let mut full = false;
        for (i, coords) in grid().into_iter().enumerate().skip(1) {
            match writer.write_image(&image(PixelType::Gray16, coords, i as u8), false) {
                Ok(_) => {}
                Err(ContainerError::FileFull { .. }) => {
                    full = true;
                    break;
                }
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }
        assert!(full);
    }

    #[test]
    fn test_sparse_grid_is_complete_after_fillers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sparse.ome.tif");
        let mut writer =
            ContainerWriter::create(&path, &summary(PixelType::Gray8), WriterOptions::default()).unwrap();
        // channel 1 only has slice 0
        let real = [grid()[0], grid()[1], grid()[2]];
        for (i, coords) in real.iter().enumerate() {
            writer.write_image(&image(PixelType::Gray8, *coords, i as u8), false).unwrap();
        }
        assert_eq!(writer.fill_missing_planes().unwrap(), 1);
        writer.close(&DisplaySettings::default(), "").unwrap();

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.coordinates(), real.to_vec());
        let hole = Coordinate::new(1, 1, 0, 0);
        assert!(reader.is_filler(&hole));
        let stand_in = reader.read_image(&hole).unwrap().unwrap();
        assert_eq!(stand_in.coords(), Coordinate::new(1, 0, 0, 0));
        for coords in real {
            assert_eq!(reader.read_image(&coords).unwrap().unwrap().coords(), coords);
        }
    }
}
