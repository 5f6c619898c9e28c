use bytes::{BufMut, Bytes, BytesMut};

use crate::error::IoError;

/// Positioned reads of byte ranges from a dataset file.
///
/// Readers never share a cursor, so any number of threads may read the same
/// resource at once. Implementations must be thread-safe.
pub trait RangeReader: Send + Sync {
    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Returns an error if the range is out of bounds or if the read fails.
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError>;

    /// Total size of the resource in bytes.
    fn size(&self) -> u64;

    /// Identifier for logging, typically the file path.
    fn identifier(&self) -> &str;
}

/// A `RangeReader` over an in-memory buffer.
///
/// Used to decode container structures that were assembled in memory and by
/// tests that need to hand-craft damaged files.
#[derive(Debug, Clone)]
pub struct BytesReader {
    data: Bytes,
    name: String,
}

impl BytesReader {
    pub fn new(data: impl Into<Bytes>, name: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            name: name.into(),
        }
    }
}

impl RangeReader for BytesReader {
    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Bytes, IoError> {
        let size = self.data.len() as u64;
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= size => Ok(self.data.slice(offset as usize..end as usize)),
            _ => Err(IoError::RangeOutOfBounds {
                offset,
                requested: len as u64,
                size,
            }),
        }
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn identifier(&self) -> &str {
        &self.name
    }
}

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order of a container file, declared by its first two bytes.
///
/// Every multi-byte field in the file, including 16-bit pixel samples, is
/// encoded in this order. All offset and length fields are unsigned: a 32-bit
/// field with its top bit set widens to a `u64` above 2 GiB, never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    /// "II"
    #[default]
    LittleEndian,
    /// "MM"
    BigEndian,
}

impl ByteOrder {
    /// The order of the machine we are running on.
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::BigEndian
        } else {
            ByteOrder::LittleEndian
        }
    }

    /// Two-byte marker written at offset 0.
    pub const fn marker(self) -> [u8; 2] {
        match self {
            ByteOrder::LittleEndian => *b"II",
            ByteOrder::BigEndian => *b"MM",
        }
    }

    /// Read a u16 from the first two bytes of `bytes`.
    ///
    /// # Panics
    /// Panics if the slice has fewer than 2 bytes.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        let raw = [bytes[0], bytes[1]];
        match self {
            ByteOrder::LittleEndian => u16::from_le_bytes(raw),
            ByteOrder::BigEndian => u16::from_be_bytes(raw),
        }
    }

    /// Read a u32 from the first four bytes of `bytes`.
    ///
    /// # Panics
    /// Panics if the slice has fewer than 4 bytes.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            ByteOrder::LittleEndian => u32::from_le_bytes(raw),
            ByteOrder::BigEndian => u32::from_be_bytes(raw),
        }
    }

    /// Read a u32 offset or length field and widen it.
    #[inline]
    pub fn read_offset(self, bytes: &[u8]) -> u64 {
        u64::from(self.read_u32(bytes))
    }

    /// Read a u64 from the first eight bytes of `bytes`.
    ///
    /// # Panics
    /// Panics if the slice has fewer than 8 bytes.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            ByteOrder::LittleEndian => u64::from_le_bytes(raw),
            ByteOrder::BigEndian => u64::from_be_bytes(raw),
        }
    }

    #[inline]
    pub fn put_u16(self, buf: &mut BytesMut, value: u16) {
        match self {
            ByteOrder::LittleEndian => buf.put_u16_le(value),
            ByteOrder::BigEndian => buf.put_u16(value),
        }
    }

    #[inline]
    pub fn put_u32(self, buf: &mut BytesMut, value: u32) {
        match self {
            ByteOrder::LittleEndian => buf.put_u32_le(value),
            ByteOrder::BigEndian => buf.put_u32(value),
        }
    }

    #[inline]
    pub fn put_u64(self, buf: &mut BytesMut, value: u64) {
        match self {
            ByteOrder::LittleEndian => buf.put_u64_le(value),
            ByteOrder::BigEndian => buf.put_u64(value),
        }
    }

    /// Encode a u32 as a standalone 4-byte array (for in-place patches).
    #[inline]
    pub fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::LittleEndian => value.to_le_bytes(),
            ByteOrder::BigEndian => value.to_be_bytes(),
        }
    }

    /// Convert little-endian 16-bit samples to this order.
    ///
    /// The conversion is its own inverse, so it also converts file samples
    /// back to the in-memory little-endian layout.
    pub fn convert_u16_samples(self, samples: &[u8]) -> Bytes {
        match self {
            ByteOrder::LittleEndian => Bytes::copy_from_slice(samples),
            ByteOrder::BigEndian => {
                let mut out = BytesMut::with_capacity(samples.len());
                for pair in samples.chunks_exact(2) {
                    out.put_slice(&[pair[1], pair[0]]);
                }
                out.freeze()
            }
        }
    }
}
