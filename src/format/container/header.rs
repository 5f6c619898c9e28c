//! Container header and the fixed pointer slots that follow it.
//!
//! # Layout
//! ```text
//! Bytes  0-1:  Byte order ("II" or "MM")
//! Bytes  2-3:  Version (42)
//! Bytes  4-7:  Offset of the first directory entry
//! Bytes  8-15: INDEX_MAP_OFFSET_HEADER, index map offset
//! Bytes 16-23: DISPLAY_SETTINGS_OFFSET_HEADER, display settings offset
//! Bytes 24-31: COMMENTS_OFFSET_HEADER, comments offset
//! Bytes 32-39: SUMMARY_MD_HEADER, summary metadata length
//! Bytes 40-..: Summary metadata JSON, padded to an even offset
//! ```
//!
//! The three slots at 8/16/24 are zero while a file is being written and are
//! filled in at close, so a file with an empty index map slot was interrupted.

use bytes::{BufMut, BytesMut};

use crate::error::ContainerError;
use crate::io::ByteOrder;

use super::tags::SUMMARY_MD_HEADER;

// =============================================================================
// Constants
// =============================================================================

const BYTE_ORDER_LITTLE_ENDIAN: [u8; 2] = *b"II";
const BYTE_ORDER_BIG_ENDIAN: [u8; 2] = *b"MM";

/// Format version, the classic TIFF magic number.
pub const VERSION: u16 = 42;

/// Bytes before the summary metadata text.
pub const HEADER_SIZE: usize = 40;

/// Byte position of the index map slot.
pub const INDEX_MAP_SLOT: u64 = 8;
/// Byte position of the display settings slot.
pub const DISPLAY_SETTINGS_SLOT: u64 = 16;
/// Byte position of the comments slot.
pub const COMMENTS_SLOT: u64 = 24;

/// Round an offset up to the next even byte, as TIFF requires for offsets.
#[inline]
pub const fn align_even(offset: u64) -> u64 {
    offset + (offset & 1)
}

// =============================================================================
// TrailerSlot
// =============================================================================

/// One tag + offset pair at a fixed header position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrailerSlot {
    /// Byte position of the slot itself
    pub position: u64,
    pub tag: u32,
    pub offset: u64,
}

impl TrailerSlot {
    fn parse(bytes: &[u8], position: u64, order: ByteOrder) -> Self {
        let at = position as usize;
        Self {
            position,
            tag: order.read_u32(&bytes[at..]),
            offset: order.read_offset(&bytes[at + 4..]),
        }
    }

    /// Never filled in by a writer.
    pub fn is_empty(&self) -> bool {
        self.tag == 0 && self.offset == 0
    }

    /// Encode a slot for an in-place patch.
    pub fn encode(order: ByteOrder, tag: u32, offset: u32) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[..4].copy_from_slice(&order.u32_bytes(tag));
        out[4..].copy_from_slice(&order.u32_bytes(offset));
        out
    }
}

// =============================================================================
// ContainerHeader
// =============================================================================

/// Parsed fixed-size header of a container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub byte_order: ByteOrder,
    pub first_ifd_offset: u64,
    pub index_map: TrailerSlot,
    pub display_settings: TrailerSlot,
    pub comments: TrailerSlot,
    /// Length of the summary metadata text starting at [`HEADER_SIZE`]
    pub summary_len: u64,
}

impl ContainerHeader {
    /// Parse the first [`HEADER_SIZE`] bytes of a container.
    ///
    /// # Errors
    /// - `FileTooSmall` if fewer than 40 bytes are available
    /// - `InvalidMagic` if the byte order marker is not II or MM
    /// - `InvalidVersion` if the version is not 42
    /// - `InvalidSummaryHeader` if the tag at offset 32 is wrong
    /// - `InvalidOffset` if the first directory or summary lies past the end
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, ContainerError> {
        if bytes.len() < HEADER_SIZE {
            return Err(ContainerError::FileTooSmall {
                required: HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        let byte_order = match [bytes[0], bytes[1]] {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => {
                return Err(ContainerError::InvalidMagic(u16::from_le_bytes([
                    bytes[0], bytes[1],
                ])))
            }
        };

        let version = byte_order.read_u16(&bytes[2..]);
        if version != VERSION {
            return Err(ContainerError::InvalidVersion(version));
        }

        let summary_tag = byte_order.read_u32(&bytes[32..]);
        if summary_tag != SUMMARY_MD_HEADER {
            return Err(ContainerError::InvalidSummaryHeader {
                expected: SUMMARY_MD_HEADER,
                found: summary_tag,
            });
        }
        let summary_len = byte_order.read_offset(&bytes[36..]);
        if HEADER_SIZE as u64 + summary_len > file_size {
            return Err(ContainerError::InvalidOffset {
                offset: HEADER_SIZE as u64 + summary_len,
                size: file_size,
            });
        }

        // An empty container ends right where its first directory would start.
        let first_ifd_offset = byte_order.read_offset(&bytes[4..]);
        if first_ifd_offset > file_size {
            return Err(ContainerError::InvalidOffset {
                offset: first_ifd_offset,
                size: file_size,
            });
        }

        Ok(Self {
            byte_order,
            first_ifd_offset,
            index_map: TrailerSlot::parse(bytes, INDEX_MAP_SLOT, byte_order),
            display_settings: TrailerSlot::parse(bytes, DISPLAY_SETTINGS_SLOT, byte_order),
            comments: TrailerSlot::parse(bytes, COMMENTS_SLOT, byte_order),
            summary_len,
        })
    }

    /// Encode a fresh header followed by the summary text.
    ///
    /// Returns the bytes (already padded to an even length) and the offset at
    /// which the first directory entry will be written.
    pub fn encode(order: ByteOrder, summary_json: &[u8]) -> (BytesMut, u64) {
        let first_ifd = align_even(HEADER_SIZE as u64 + summary_json.len() as u64);
        let mut buf = BytesMut::with_capacity(first_ifd as usize);

        buf.put_slice(&order.marker());
        order.put_u16(&mut buf, VERSION);
        order.put_u32(&mut buf, first_ifd as u32);
        // index map, display settings, comments: filled in at close
        buf.put_bytes(0, 24);
        order.put_u32(&mut buf, SUMMARY_MD_HEADER);
        order.put_u32(&mut buf, summary_json.len() as u32);
        buf.put_slice(summary_json);
        buf.put_bytes(0, first_ifd as usize - buf.len());

        (buf, first_ifd)
    }
}

// =============================================================================
// Length-prefixed blocks
// =============================================================================

/// Encode `tag, length, payload` as one block.
pub fn encode_block(order: ByteOrder, tag: u32, payload: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(8 + payload.len() + 1);
    order.put_u32(&mut buf, tag);
    order.put_u32(&mut buf, payload.len() as u32);
    buf.put_slice(payload);
    if buf.len() % 2 == 1 {
        buf.put_u8(0);
    }
    buf
}
