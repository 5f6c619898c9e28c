//! Field types, directory tags and block header constants of the container.
//!
//! The container is TIFF-compatible: a plain TIFF reader sees an ordinary
//! multi-page, uncompressed, single-strip image. Everything beyond TIFF lives
//! in the fixed header region (offsets 8..40) and in two private tags.

// =============================================================================
// Block header constants
// =============================================================================

/// Slot tag at offset 8, followed by the index map offset.
pub const INDEX_MAP_OFFSET_HEADER: u32 = 54_773_648;
/// First word of the index map block.
pub const INDEX_MAP_HEADER: u32 = 3_453_623;
/// Slot tag at offset 16, followed by the display settings offset.
pub const DISPLAY_SETTINGS_OFFSET_HEADER: u32 = 483_765_892;
/// First word of the display settings block.
pub const DISPLAY_SETTINGS_HEADER: u32 = 347_834_724;
/// Slot tag at offset 24, followed by the comments offset.
pub const COMMENTS_OFFSET_HEADER: u32 = 99_384_722;
/// First word of the comments block.
pub const COMMENTS_HEADER: u32 = 84_720_485;
/// Tag at offset 32, followed by the summary metadata length.
pub const SUMMARY_MD_HEADER: u32 = 2_355_492;

// =============================================================================
// Field types
// =============================================================================

/// Encoding of a directory entry's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer
    Byte = 1,
    /// NUL-terminated 8-bit text
    Ascii = 2,
    /// Unsigned 16-bit integer
    Short = 3,
    /// Unsigned 32-bit integer
    Long = 4,
    /// Two LONGs: numerator, denominator
    Rational = 5,
    /// Opaque bytes
    Undefined = 7,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::Undefined => 1,
            FieldType::Short => 2,
            FieldType::Long => 4,
            FieldType::Rational => 8,
        }
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            7 => Some(FieldType::Undefined),
            _ => None,
        }
    }

    /// The value/offset field of an entry is 4 bytes wide.
    pub const INLINE_THRESHOLD: usize = 4;

    /// Whether `count` values of this type fit in the entry itself.
    #[inline]
    pub fn fits_inline(self, count: u32) -> bool {
        self.size_in_bytes() as u64 * count as u64 <= Self::INLINE_THRESHOLD as u64
    }
}

// =============================================================================
// Directory tags
// =============================================================================

/// Tags written into every directory entry, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Tag {
    ImageWidth = 256,
    ImageLength = 257,
    BitsPerSample = 258,
    Compression = 259,
    PhotometricInterpretation = 262,
    /// Only on the first directory of a file; patched with OME-XML at close.
    ImageDescription = 270,
    StripOffsets = 273,
    SamplesPerPixel = 277,
    RowsPerStrip = 278,
    StripByteCounts = 279,
    XResolution = 282,
    YResolution = 283,
    ResolutionUnit = 296,
    /// Present for RGB pixel types: the fourth sample is unspecified data.
    ExtraSamples = 338,
    /// Byte length of the image tag set, NUL included.
    MetadataLength = 51122,
    /// The image tag set as JSON.
    Metadata = 51123,
}

impl Tag {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            256 => Some(Tag::ImageWidth),
            257 => Some(Tag::ImageLength),
            258 => Some(Tag::BitsPerSample),
            259 => Some(Tag::Compression),
            262 => Some(Tag::PhotometricInterpretation),
            270 => Some(Tag::ImageDescription),
            273 => Some(Tag::StripOffsets),
            277 => Some(Tag::SamplesPerPixel),
            278 => Some(Tag::RowsPerStrip),
            279 => Some(Tag::StripByteCounts),
            282 => Some(Tag::XResolution),
            283 => Some(Tag::YResolution),
            296 => Some(Tag::ResolutionUnit),
            338 => Some(Tag::ExtraSamples),
            51122 => Some(Tag::MetadataLength),
            51123 => Some(Tag::Metadata),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Compression value for uncompressed strips.
pub const COMPRESSION_NONE: u16 = 1;
/// Photometric interpretation: zero is black.
pub const PHOTOMETRIC_MIN_IS_BLACK: u16 = 1;
/// Photometric interpretation: RGB.
pub const PHOTOMETRIC_RGB: u16 = 2;
/// Resolution unit: centimeter.
pub const RESOLUTION_UNIT_CM: u16 = 3;
