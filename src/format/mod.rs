//! On-disk image formats.
//!
//! - [`container`]: the multi-page container holding a whole acquisition in
//!   one (or a few) TIFF-compatible files, with a trailer index for random
//!   access by coordinate.
//! - [`single`]: one plain TIFF file per image, used by the disk-per-image
//!   store.

pub mod container;
pub mod single;

pub use container::{ContainerReader, ContainerWriter, WriterOptions};
