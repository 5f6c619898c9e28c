//! Rebuild the index map of an interrupted container.
//!
//! A container whose acquisition was cut short has a valid header and a chain
//! of directory entries, but no index map (its slot at offset 8 is empty) and
//! possibly a half-written last entry. Repair walks the chain from the header,
//! stops at the first entry that cannot be decoded, terminates the chain at the
//! last good entry and appends a fresh index map.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::error::ContainerError;

use super::header::{align_even, TrailerSlot};
use super::header::{COMMENTS_SLOT, DISPLAY_SETTINGS_SLOT, INDEX_MAP_SLOT};
use super::index_map::IndexMap;
use super::reader::ContainerReader;
use super::tags::INDEX_MAP_OFFSET_HEADER;

/// Outcome of [`repair_index_map`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    /// Images recovered into the new index map
    pub images: usize,
    /// Offset of the first entry that could not be decoded, if any
    pub broken_at: Option<u64>,
    /// Where the new index map was written
    pub index_offset: u64,
}

/// Repair the container at `path` in place.
pub fn repair_index_map(path: impl AsRef<Path>) -> Result<RepairReport, ContainerError> {
    let path = path.as_ref();
    let container = ContainerReader::open_unindexed(path)?;
    let order = container.byte_order();
    let axis_order = container.summary().axis_order();

    let mut index = IndexMap::new();
    let mut last_good = None;
    let mut broken_at = None;
    let mut expected_next = container.header().first_ifd_offset;

    for item in container.images() {
        match item {
            Ok((offset, image)) => {
                index.insert(image.coords(), offset);
                let dir = container.read_directory(offset)?;
                expected_next = dir.next_ifd_offset;
                last_good = Some(dir);
            }
            Err(err) => {
                warn!(path = %path.display(), offset = expected_next, error = %err, "directory chain broken");
                broken_at = Some(expected_next);
                break;
            }
        }
    }

    let data_end = last_good
        .as_ref()
        .map(|dir| dir.end())
        .unwrap_or(container.header().first_ifd_offset);
    drop(container);

    let mut file = OpenOptions::new().read(true).write(true).open(path)?;
    let file_len = file.metadata()?.len();

    // Drop a half-written trailing entry; otherwise append past whatever is there.
    let index_offset = match broken_at {
        Some(offset) if offset >= data_end => {
            let at = align_even(offset);
            file.set_len(at)?;
            at
        }
        _ => align_even(file_len),
    };

    if let Some(dir) = &last_good {
        file.seek(SeekFrom::Start(dir.next_pointer_position))?;
        file.write_all(&order.u32_bytes(0))?;
    }

    // Trailer blocks that now point past the end are forgotten.
    for slot in [DISPLAY_SETTINGS_SLOT, COMMENTS_SLOT] {
        let mut raw = [0u8; 8];
        file.seek(SeekFrom::Start(slot))?;
        file.read_exact(&mut raw)?;
        if order.read_offset(&raw[4..]) >= index_offset {
            file.seek(SeekFrom::Start(slot))?;
            file.write_all(&[0u8; 8])?;
        }
    }

    if index_offset > file_len {
        // alignment byte
        file.seek(SeekFrom::Start(file_len))?;
        file.write_all(&[0])?;
    } else {
        file.seek(SeekFrom::Start(index_offset))?;
    }
    file.write_all(&index.encode(order, axis_order))?;
    file.seek(SeekFrom::Start(INDEX_MAP_SLOT))?;
    file.write_all(&TrailerSlot::encode(order, INDEX_MAP_OFFSET_HEADER, index_offset as u32))?;
    file.flush()?;
    file.sync_all()?;

    info!(
        path = %path.display(),
        images = index.len(),
        index_offset,
        broken = broken_at.is_some(),
        "repaired container index map"
    );

    Ok(RepairReport {
        images: index.len(),
        broken_at,
        index_offset,
    })
}
