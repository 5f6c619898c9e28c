//! Coordinate to directory-offset table stored as a container trailer.
//!
//! # Layout
//! ```text
//! u32  INDEX_MAP_HEADER
//! u32  entry count
//! per entry (24 bytes): channel, slice, frame, position (u32 each), offset (u64)
//! ```
//! Entries are written sorted by the dataset's axis order.

use std::collections::HashMap;

use bytes::BytesMut;

use crate::error::ContainerError;
use crate::image::{AxisOrder, Coordinate};
use crate::io::ByteOrder;

use super::tags::INDEX_MAP_HEADER;

/// Bytes per index map entry.
pub const INDEX_ENTRY_SIZE: usize = 24;

/// Bytes before the first entry.
pub const INDEX_PREFIX_SIZE: usize = 8;

/// In-memory index of one container file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMap {
    entries: HashMap<Coordinate, u64>,
}

impl IndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the directory offset of `coords`, replacing any previous one.
    pub fn insert(&mut self, coords: Coordinate, offset: u64) -> Option<u64> {
        self.entries.insert(coords, offset)
    }

    /// Record `coords` only if nothing is recorded for it yet.
    pub fn insert_if_absent(&mut self, coords: Coordinate, offset: u64) -> bool {
        if self.entries.contains_key(&coords) {
            return false;
        }
        self.entries.insert(coords, offset);
        true
    }

    pub fn get(&self, coords: &Coordinate) -> Option<u64> {
        self.entries.get(coords).copied()
    }

    pub fn contains(&self, coords: &Coordinate) -> bool {
        self.entries.contains_key(coords)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Coordinate, &u64)> {
        self.entries.iter()
    }

    /// All entries sorted by `order`.
    pub fn sorted(&self, order: AxisOrder) -> Vec<(Coordinate, u64)> {
        let mut entries: Vec<(Coordinate, u64)> =
            self.entries.iter().map(|(c, o)| (*c, *o)).collect();
        entries.sort_by(|a, b| order.compare(&a.0, &b.0));
        entries
    }

    /// Size of the encoded block for `count` entries.
    pub const fn encoded_len(count: usize) -> u64 {
        (INDEX_PREFIX_SIZE + count * INDEX_ENTRY_SIZE) as u64
    }

    /// Encode the complete block.
    pub fn encode(&self, byte_order: ByteOrder, axis_order: AxisOrder) -> BytesMut {
        let mut buf = BytesMut::with_capacity(Self::encoded_len(self.len()) as usize);
        byte_order.put_u32(&mut buf, INDEX_MAP_HEADER);
        byte_order.put_u32(&mut buf, self.len() as u32);
        for (coords, offset) in self.sorted(axis_order) {
            byte_order.put_u32(&mut buf, coords.channel);
            byte_order.put_u32(&mut buf, coords.slice);
            byte_order.put_u32(&mut buf, coords.frame);
            byte_order.put_u32(&mut buf, coords.position);
            byte_order.put_u64(&mut buf, offset);
        }
        buf
    }

    /// Validate the block prefix and return the entry count.
    pub fn decode_prefix(
        bytes: &[u8],
        byte_order: ByteOrder,
        block_offset: u64,
    ) -> Result<usize, ContainerError> {
        let tag = byte_order.read_u32(bytes);
        if tag != INDEX_MAP_HEADER {
            return Err(ContainerError::InvalidIndexMap {
                offset: block_offset,
                expected: INDEX_MAP_HEADER,
                found: tag,
            });
        }
        Ok(byte_order.read_u32(&bytes[4..]) as usize)
    }

    /// Decode `bytes.len() / 24` entries, checking every offset against the
    /// file size.
    pub fn decode_entries(
        bytes: &[u8],
        byte_order: ByteOrder,
        file_size: u64,
    ) -> Result<Self, ContainerError> {
        let mut map = Self::new();
        for entry in bytes.chunks_exact(INDEX_ENTRY_SIZE) {
            let coords = Coordinate::new(
                byte_order.read_u32(&entry[0..]),
                byte_order.read_u32(&entry[4..]),
                byte_order.read_u32(&entry[8..]),
                byte_order.read_u32(&entry[12..]),
            );
            let offset = byte_order.read_u64(&entry[16..]);
            if offset >= file_size {
                return Err(ContainerError::InvalidOffset {
                    offset,
                    size: file_size,
                });
            }
            map.insert(coords, offset);
        }
        Ok(map)
    }
}
