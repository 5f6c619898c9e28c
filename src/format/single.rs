//! One image per TIFF file, for the disk-per-image store.
//!
//! Pixels are encoded losslessly with the `image` crate. RGB formats keep all
//! four samples so a round trip returns the exact bytes that went in.

use std::io::Cursor;
use std::path::Path;

use bytes::Bytes;
use image::{DynamicImage, ImageBuffer, ImageFormat, ImageReader, Luma, Rgba};

use crate::error::StoreError;
use crate::image::{Coordinate, PixelType, TaggedImage};

fn encode_error(coords: Coordinate, reason: impl ToString) -> StoreError {
    StoreError::Encode {
        coords,
        reason: reason.to_string(),
    }
}

fn le_samples(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn le_bytes(samples: &[u16]) -> Bytes {
    samples
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect::<Vec<u8>>()
        .into()
}

fn to_dynamic(image: &TaggedImage) -> Option<DynamicImage> {
    let (w, h) = (image.width(), image.height());
    let raw = image.pixels().to_vec();
    match image.pixel_type() {
        PixelType::Gray8 => {
            ImageBuffer::<Luma<u8>, _>::from_raw(w, h, raw).map(DynamicImage::ImageLuma8)
        }
        PixelType::Gray16 => ImageBuffer::<Luma<u16>, _>::from_raw(w, h, le_samples(&raw))
            .map(DynamicImage::ImageLuma16),
        PixelType::Rgb32 => {
            ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, raw).map(DynamicImage::ImageRgba8)
        }
        PixelType::Rgb64 => ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, le_samples(&raw))
            .map(DynamicImage::ImageRgba16),
    }
}

/// Encode the pixels of `image` as a TIFF file in memory.
pub fn encode_tiff(image: &TaggedImage) -> Result<Vec<u8>, StoreError> {
    let dynamic =
        to_dynamic(image).ok_or_else(|| encode_error(image.coords(), "buffer does not match geometry"))?;
    let mut out = Cursor::new(Vec::new());
    dynamic
        .write_to(&mut out, ImageFormat::Tiff)
        .map_err(|e| encode_error(image.coords(), e))?;
    Ok(out.into_inner())
}

/// Write the pixels of `image` to `path`.
pub fn write_tiff(path: &Path, image: &TaggedImage) -> Result<(), StoreError> {
    let encoded = encode_tiff(image)?;
    std::fs::write(path, encoded)?;
    Ok(())
}

/// Read pixels back from a file written by [`write_tiff`].
///
/// The decoded format must match `pixel_type`; the result is laid out the way
/// [`TaggedImage`] expects (16-bit samples little-endian).
pub fn read_tiff(path: &Path, coords: Coordinate, pixel_type: PixelType) -> Result<Bytes, StoreError> {
    let decoded = ImageReader::open(path)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| encode_error(coords, e))?;

    let pixels = match (pixel_type, decoded) {
        (PixelType::Gray8, DynamicImage::ImageLuma8(buf)) => Bytes::from(buf.into_raw()),
        (PixelType::Gray16, DynamicImage::ImageLuma16(buf)) => le_bytes(buf.as_raw()),
        (PixelType::Rgb32, DynamicImage::ImageRgba8(buf)) => Bytes::from(buf.into_raw()),
        (PixelType::Rgb64, DynamicImage::ImageRgba16(buf)) => le_bytes(buf.as_raw()),
        (expected, other) => {
            return Err(encode_error(
                coords,
                format!("file holds {:?} pixels, dataset is {}", other.color(), expected),
            ))
        }
    };
    Ok(pixels)
}
