//! Recently used images shared between cache façades.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::image::{Coordinate, TaggedImage};
use crate::store::FrontCache;

/// Default number of images kept in a [`RecentImages`] ring.
pub const DEFAULT_RECENT_IMAGES: usize = 20;

/// Identity of one store behind a façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(u64);

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "store-{}", self.0)
    }
}

/// LRU ring of raw images keyed by store identity and coordinate.
///
/// Several façades may share one ring; each registers its store to get a
/// fresh [`StoreId`], so equal coordinates from different stores never
/// collide.
pub struct RecentImages {
    images: FrontCache<(StoreId, Coordinate)>,
    next_id: AtomicU64,
}

impl RecentImages {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECENT_IMAGES)
    }

    pub fn with_capacity(entries: usize) -> Self {
        Self {
            images: FrontCache::with_capacity(entries),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an identity for a newly attached store.
    pub fn register_store(&self) -> StoreId {
        StoreId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self, store: StoreId, coords: &Coordinate) -> Option<TaggedImage> {
        self.images.get(&(store, *coords))
    }

    pub fn insert(&self, store: StoreId, image: TaggedImage) {
        self.images.put((store, image.coords()), image);
    }

    /// Drop every image that belongs to `store`.
    pub fn forget_store(&self, store: StoreId) {
        self.images.retain(|(id, _)| *id != store);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl Default for RecentImages {
    fn default() -> Self {
        Self::new()
    }
}
