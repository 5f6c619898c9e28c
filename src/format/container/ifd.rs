//! Directory entries: one per image, TIFF IFD compatible.
//!
//! # Layout of one entry
//! ```text
//! u16            field count N
//! N x 12 bytes   fields in ascending tag order (tag, type, count, value/offset)
//! u32            offset of the next entry, 0 after the last image
//! ..             out-of-line values: bits per sample (RGB), X/Y resolution
//! ..             image tag set as JSON, NUL terminated, padded to even
//! ..             pixel strip, padded to even
//! ```

use bytes::{BufMut, BytesMut};

use crate::error::ContainerError;
use crate::image::TaggedImage;
use crate::io::ByteOrder;

use super::header::align_even;
use super::tags::{
    FieldType, Tag, COMPRESSION_NONE, PHOTOMETRIC_MIN_IS_BLACK, PHOTOMETRIC_RGB,
    RESOLUTION_UNIT_CM,
};

/// Size of one field record.
pub const ENTRY_SIZE: usize = 12;

/// Bytes occupied by the fixed part of a directory with `count` fields.
#[inline]
pub const fn directory_size(count: u16) -> usize {
    2 + count as usize * ENTRY_SIZE + 4
}

// =============================================================================
// IfdEntry
// =============================================================================

/// One raw field record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag: u16,
    pub field_type_raw: u16,
    pub count: u32,
    pub value_offset_bytes: [u8; 4],
}

impl IfdEntry {
    fn parse(bytes: &[u8], order: ByteOrder) -> Self {
        Self {
            tag: order.read_u16(&bytes[0..]),
            field_type_raw: order.read_u16(&bytes[2..]),
            count: order.read_u32(&bytes[4..]),
            value_offset_bytes: [bytes[8], bytes[9], bytes[10], bytes[11]],
        }
    }

    pub fn field_type(&self) -> Option<FieldType> {
        FieldType::from_u16(self.field_type_raw)
    }

    /// Read a single inline SHORT or LONG value.
    pub fn value_u32(&self, order: ByteOrder) -> Result<u32, ContainerError> {
        match self.field_type() {
            Some(FieldType::Short) => Ok(order.read_u16(&self.value_offset_bytes) as u32),
            Some(_) => Ok(order.read_u32(&self.value_offset_bytes)),
            None => Err(ContainerError::UnknownFieldType(self.field_type_raw)),
        }
    }

    /// The value field read as an unsigned offset.
    pub fn offset(&self, order: ByteOrder) -> u64 {
        order.read_offset(&self.value_offset_bytes)
    }
}

// =============================================================================
// Directory
// =============================================================================

/// The decoded fixed part of a directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    /// Byte position of the entry itself
    pub offset: u64,
    pub width: u32,
    pub height: u32,
    pub samples_per_pixel: u16,
    pub strip_offset: u64,
    pub strip_byte_count: u64,
    pub metadata_offset: u64,
    pub metadata_len: u64,
    /// Byte position of the ImageDescription field record, first entry only
    pub description_field: Option<u64>,
    /// Byte position of the next-entry pointer
    pub next_pointer_position: u64,
    pub next_ifd_offset: u64,
}

impl Directory {
    /// Decode a directory from `bytes`, which must start at `offset` and hold
    /// at least [`directory_size`] bytes for the count it declares.
    pub fn parse(bytes: &[u8], offset: u64, order: ByteOrder) -> Result<Self, ContainerError> {
        let invalid = |reason: String| ContainerError::InvalidDirectory { offset, reason };

        if bytes.len() < 2 {
            return Err(invalid("missing field count".into()));
        }
        let count = order.read_u16(bytes);
        if count == 0 {
            return Err(invalid("directory has no fields".into()));
        }
        if bytes.len() < directory_size(count) {
            return Err(invalid(format!(
                "{} fields need {} bytes, only {} available",
                count,
                directory_size(count),
                bytes.len()
            )));
        }

        let mut width = None;
        let mut height = None;
        let mut samples_per_pixel = 1u16;
        let mut strip_offset = None;
        let mut strip_byte_count = None;
        let mut metadata = None;
        let mut description_field = None;

        for i in 0..count as usize {
            let at = 2 + i * ENTRY_SIZE;
            let entry = IfdEntry::parse(&bytes[at..at + ENTRY_SIZE], order);
            match Tag::from_u16(entry.tag) {
                Some(Tag::ImageWidth) => width = Some(entry.value_u32(order)?),
                Some(Tag::ImageLength) => height = Some(entry.value_u32(order)?),
                Some(Tag::SamplesPerPixel) => samples_per_pixel = entry.value_u32(order)? as u16,
                Some(Tag::StripOffsets) => strip_offset = Some(entry.offset(order)),
                Some(Tag::StripByteCounts) => {
                    strip_byte_count = Some(u64::from(entry.value_u32(order)?))
                }
                Some(Tag::Metadata) => {
                    metadata = Some((entry.offset(order), u64::from(entry.count)))
                }
                Some(Tag::ImageDescription) => description_field = Some(offset + at as u64),
                _ => {}
            }
        }

        let next_pointer_at = 2 + count as usize * ENTRY_SIZE;
        let (metadata_offset, metadata_len) =
            metadata.ok_or_else(|| invalid("no image metadata field".into()))?;

        Ok(Self {
            offset,
            width: width.ok_or_else(|| invalid("no width field".into()))?,
            height: height.ok_or_else(|| invalid("no height field".into()))?,
            samples_per_pixel,
            strip_offset: strip_offset.ok_or_else(|| invalid("no strip offset".into()))?,
            strip_byte_count: strip_byte_count
                .ok_or_else(|| invalid("no strip byte count".into()))?,
            metadata_offset,
            metadata_len,
            description_field,
            next_pointer_position: offset + next_pointer_at as u64,
            next_ifd_offset: order.read_offset(&bytes[next_pointer_at..]),
        })
    }

    /// Last byte (exclusive) covered by this entry's data.
    pub fn end(&self) -> u64 {
        (self.strip_offset + self.strip_byte_count).max(self.metadata_offset + self.metadata_len)
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// X/Y resolution in pixels per centimeter, as a rational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub numerator: u32,
    pub denominator: u32,
}

impl Resolution {
    /// Derive the resolution from a pixel size in micrometers.
    ///
    /// Unknown (zero or negative) pixel sizes encode as 1/1.
    pub fn from_pixel_size_um(pixel_size_um: f64) -> Self {
        if pixel_size_um > 0.0 && pixel_size_um.is_finite() {
            let per_cm = 10_000.0 / pixel_size_um;
            Self {
                numerator: (per_cm * 1000.0).round().min(u32::MAX as f64) as u32,
                denominator: 1000,
            }
        } else {
            Self {
                numerator: 1,
                denominator: 1,
            }
        }
    }
}

/// Where the parts of an encoded directory landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryLayout {
    pub offset: u64,
    /// Total bytes, padding included
    pub len: u64,
    pub strip_offset: u64,
    pub next_pointer_position: u64,
    pub description_field: Option<u64>,
}

impl DirectoryLayout {
    /// Offset at which the following entry would start.
    pub fn end(&self) -> u64 {
        self.offset + self.len
    }
}

/// Bytes needed to encode `image` with a `metadata_len`-byte tag set.
pub fn encoded_size(image: &TaggedImage, metadata_len: usize, with_description: bool) -> u64 {
    let count = field_count(image, with_description);
    let extra = bits_array_len(image) + 16;
    align_even(directory_size(count) as u64 + extra as u64 + metadata_len as u64 + 1)
        + align_even(image.byte_len() as u64)
}

fn field_count(image: &TaggedImage, with_description: bool) -> u16 {
    let mut count = 14;
    if with_description {
        count += 1;
    }
    if image.pixel_type().is_rgb() {
        count += 1;
    }
    count
}

fn bits_array_len(image: &TaggedImage) -> usize {
    let samples = image.pixel_type().samples_per_pixel() as usize;
    if samples > 1 {
        samples * 2
    } else {
        0
    }
}

fn put_field(buf: &mut BytesMut, order: ByteOrder, tag: Tag, ty: FieldType, count: u32, value: u32) {
    order.put_u16(buf, tag.as_u16());
    order.put_u16(buf, ty as u16);
    order.put_u32(buf, count);
    if ty == FieldType::Short && count == 1 {
        // left-justified in the value field
        order.put_u16(buf, value as u16);
        order.put_u16(buf, 0);
    } else {
        order.put_u32(buf, value);
    }
}

/// Encode `image` as a directory entry starting at `offset`.
///
/// The next-entry pointer is set to the byte right after this entry, where the
/// writer will put the next image, or to 0 when `is_last`.
pub fn encode_directory(
    order: ByteOrder,
    offset: u64,
    image: &TaggedImage,
    resolution: Resolution,
    with_description: bool,
    is_last: bool,
) -> (BytesMut, DirectoryLayout) {
    let pixel_type = image.pixel_type();
    let samples = pixel_type.samples_per_pixel();
    let bits = pixel_type.bits_per_sample();
    let mut metadata = image.tags().to_json().into_bytes();
    metadata.push(0);

    let count = field_count(image, with_description);
    let fixed = directory_size(count) as u64;
    let bits_offset = offset + fixed;
    let x_res_offset = bits_offset + bits_array_len(image) as u64;
    let y_res_offset = x_res_offset + 8;
    let metadata_offset = y_res_offset + 8;
    let strip_offset = align_even(metadata_offset + metadata.len() as u64);
    let strip_len = image.byte_len() as u64;
    let len = align_even(strip_offset + strip_len) - offset;

    let mut buf = BytesMut::with_capacity(len as usize);
    order.put_u16(&mut buf, count);

    put_field(&mut buf, order, Tag::ImageWidth, FieldType::Long, 1, image.width());
    put_field(&mut buf, order, Tag::ImageLength, FieldType::Long, 1, image.height());
    if samples > 1 {
        put_field(&mut buf, order, Tag::BitsPerSample, FieldType::Short, samples as u32, bits_offset as u32);
    } else {
        put_field(&mut buf, order, Tag::BitsPerSample, FieldType::Short, 1, bits as u32);
    }
    put_field(&mut buf, order, Tag::Compression, FieldType::Short, 1, COMPRESSION_NONE as u32);
    let photometric = if pixel_type.is_rgb() {
        PHOTOMETRIC_RGB
    } else {
        PHOTOMETRIC_MIN_IS_BLACK
    };
    put_field(&mut buf, order, Tag::PhotometricInterpretation, FieldType::Short, 1, photometric as u32);
    let description_field = if with_description {
        let at = offset + buf.len() as u64;
        put_field(&mut buf, order, Tag::ImageDescription, FieldType::Ascii, 0, 0);
        Some(at)
    } else {
        None
    };
    put_field(&mut buf, order, Tag::StripOffsets, FieldType::Long, 1, strip_offset as u32);
    put_field(&mut buf, order, Tag::SamplesPerPixel, FieldType::Short, 1, samples as u32);
    put_field(&mut buf, order, Tag::RowsPerStrip, FieldType::Long, 1, image.height());
    put_field(&mut buf, order, Tag::StripByteCounts, FieldType::Long, 1, strip_len as u32);
    put_field(&mut buf, order, Tag::XResolution, FieldType::Rational, 1, x_res_offset as u32);
    put_field(&mut buf, order, Tag::YResolution, FieldType::Rational, 1, y_res_offset as u32);
    put_field(&mut buf, order, Tag::ResolutionUnit, FieldType::Short, 1, RESOLUTION_UNIT_CM as u32);
    if pixel_type.is_rgb() {
        put_field(&mut buf, order, Tag::ExtraSamples, FieldType::Short, 1, 0);
    }
    put_field(&mut buf, order, Tag::MetadataLength, FieldType::Long, 1, metadata.len() as u32);
    put_field(&mut buf, order, Tag::Metadata, FieldType::Ascii, metadata.len() as u32, metadata_offset as u32);

    let next_pointer_position = offset + buf.len() as u64;
    let next = if is_last { 0 } else { (offset + len) as u32 };
    order.put_u32(&mut buf, next);

    if samples > 1 {
        for _ in 0..samples {
            order.put_u16(&mut buf, bits);
        }
    }
    for _ in 0..2 {
        order.put_u32(&mut buf, resolution.numerator);
        order.put_u32(&mut buf, resolution.denominator);
    }
    buf.put_slice(&metadata);
    if buf.len() % 2 == 1 {
        buf.put_u8(0);
    }

    if bits == 16 && order == ByteOrder::BigEndian {
        buf.put_slice(&order.convert_u16_samples(image.pixels()));
    } else {
        buf.put_slice(image.pixels());
    }
    if buf.len() % 2 == 1 {
        buf.put_u8(0);
    }

    let layout = DirectoryLayout {
        offset,
        len,
        strip_offset,
        next_pointer_position,
        description_field,
    };
    (buf, layout)
}
