//! Image cache façade.
//!
//! [`ImageCache`] sits between the pipeline sink and an image store and is the
//! one object display code talks to. It adds:
//!
//! - a [`RecentImages`] ring of raw images, shareable between façades and
//!   keyed by store identity so different stores never collide
//! - [`ChangingKeys`], the set of tag keys whose values differ between images
//! - save-as: copy the dataset into another store and switch to it

mod changing_keys;
mod image_cache;
mod recent;

pub use changing_keys::ChangingKeys;
pub use image_cache::ImageCache;
pub use recent::{RecentImages, StoreId, DEFAULT_RECENT_IMAGES};
