//! Multi-page image container codec.
//!
//! A container is a TIFF-compatible file holding many images of one
//! acquisition, plus trailer blocks that let a reader find any image by
//! coordinate without scanning.
//!
//! # Key Concepts
//!
//! - **Header**: byte order, version, first directory offset, and three fixed
//!   pointer slots (index map, display settings, comments) at offsets 8/16/24
//!   that are filled in when the file is closed.
//!
//! - **Directory entry**: one per image, a standard TIFF IFD carrying the image
//!   tag set in a private field, followed by the uncompressed pixel strip.
//!
//! - **Index map**: coordinate to directory offset table written at close and
//!   rebuilt in full by readers before any image is served.
//!
//! - **Fillers**: grid cells never acquired are indexed at the nearest real
//!   image, so OME consumers see a complete grid.

mod filler;
mod header;
mod ifd;
mod index_map;
mod ome;
mod reader;
mod repair;
mod tags;
mod writer;

pub use filler::{missing_planes, Filler, GridExtent};
pub use header::{ContainerHeader, TrailerSlot, HEADER_SIZE, VERSION};
pub use ifd::{Directory, IfdEntry, Resolution};
pub use index_map::{IndexMap, INDEX_ENTRY_SIZE};
pub use ome::{build_ome_xml, OmePlane};
pub use reader::{ContainerReader, ImageChain};
pub use repair::{repair_index_map, RepairReport};
pub use tags::{
    FieldType, Tag, COMMENTS_HEADER, COMMENTS_OFFSET_HEADER, DISPLAY_SETTINGS_HEADER,
    DISPLAY_SETTINGS_OFFSET_HEADER, INDEX_MAP_HEADER, INDEX_MAP_OFFSET_HEADER, SUMMARY_MD_HEADER,
};
pub use writer::{
    ContainerWriter, WriterOptions, DEFAULT_MAX_FILE_SIZE, DEFAULT_TRAILER_RESERVE,
};
