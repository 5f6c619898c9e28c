//! Image values and dataset metadata.
//!
//! Everything downstream of the hardware source works in terms of these types:
//!
//! - [`Coordinate`] addresses one image; [`AxisOrder`] sorts coordinates the way
//!   a dataset lays them out on disk
//! - [`TagSet`] is the open, ordered tag mapping carried by every image
//! - [`TaggedImage`] pairs an immutable pixel buffer with its tags
//! - [`SummaryMetadata`] and [`DisplaySettings`] describe the whole dataset

mod coords;
mod metadata;
mod tagged;
mod tags;

pub use coords::{AxisOrder, Coordinate};
pub use metadata::{ChannelDisplay, DisplaySettings, SummaryMetadata};
pub use tagged::{PixelType, TaggedImage};
pub use tags::{keys, TagSet};
