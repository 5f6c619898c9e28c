//! Positioned byte-range access to dataset files.

mod mapped;
mod range_reader;

pub use mapped::MappedFile;
pub use range_reader::{ByteOrder, BytesReader, RangeReader};
