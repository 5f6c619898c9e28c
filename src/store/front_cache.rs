//! Bounded LRU cache of decoded images.
//!
//! Sits in front of a primary image mapping to serve the display's "most
//! recently touched planes" access pattern. Eviction only drops the cached
//! reference; the primary store is never affected.
//!
//! # Capacity
//!
//! The cache is bounded by entry count and, optionally, by the total pixel
//! bytes it holds. Whichever limit is hit first evicts least-recently-used
//! entries.

use std::hash::Hash;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use crate::image::{Coordinate, TaggedImage};

/// Default number of cached images.
pub const DEFAULT_FRONT_CACHE_ENTRIES: usize = 10;

// =============================================================================
// FrontCache
// =============================================================================

/// LRU cache of tagged images.
///
/// # Thread Safety
///
/// Insert-and-evict and lookup-and-refresh each happen under one lock, so a
/// sink thread calling [`FrontCache::put`] and a display thread calling
/// [`FrontCache::get`] never observe a half-updated cache.
pub struct FrontCache<K: Hash + Eq = Coordinate> {
    inner: Mutex<Inner<K>>,
    max_bytes: Option<usize>,
}

struct Inner<K: Hash + Eq> {
    cache: LruCache<K, TaggedImage>,
    bytes: usize,
}

impl<K: Hash + Eq + Clone> FrontCache<K> {
    /// Create a cache holding [`DEFAULT_FRONT_CACHE_ENTRIES`] images.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FRONT_CACHE_ENTRIES)
    }

    /// Create a cache holding at most `entries` images (at least one).
    pub fn with_capacity(entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                cache: LruCache::new(NonZeroUsize::new(entries).unwrap_or(NonZeroUsize::MIN)),
                bytes: 0,
            }),
            max_bytes: None,
        }
    }

    /// Create a cache bounded by both entry count and pixel bytes.
    pub fn with_limits(entries: usize, max_bytes: usize) -> Self {
        Self {
            max_bytes: Some(max_bytes),
            ..Self::with_capacity(entries)
        }
    }

    /// Look up an image and mark it most recently used.
    pub fn get(&self, key: &K) -> Option<TaggedImage> {
        self.inner.lock().cache.get(key).cloned()
    }

    /// Check for an image without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.lock().cache.contains(key)
    }

    /// Insert or replace an image, evicting least-recently-used entries when
    /// over capacity. Returns how many entries were evicted.
    pub fn put(&self, key: K, image: TaggedImage) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let size = image.byte_len();
        let mut evicted = 0;

        if let Some(old) = inner.cache.peek(&key) {
            inner.bytes = inner.bytes.saturating_sub(old.byte_len());
        } else if inner.cache.len() == inner.cache.cap().get() {
            if let Some((_, old)) = inner.cache.pop_lru() {
                inner.bytes = inner.bytes.saturating_sub(old.byte_len());
                evicted += 1;
            }
        }
        inner.cache.put(key, image);
        inner.bytes += size;

        if let Some(max) = self.max_bytes {
            // Keep at least the entry just inserted.
            while inner.bytes > max && inner.cache.len() > 1 {
                match inner.cache.pop_lru() {
                    Some((_, old)) => {
                        inner.bytes = inner.bytes.saturating_sub(old.byte_len());
                        evicted += 1;
                    }
                    None => break,
                }
            }
        }
        evicted
    }

    /// Remove one image.
    pub fn remove(&self, key: &K) -> Option<TaggedImage> {
        let mut inner = self.inner.lock();
        let removed = inner.cache.pop(key);
        if let Some(image) = &removed {
            inner.bytes = inner.bytes.saturating_sub(image.byte_len());
        }
        removed
    }

    /// Drop every image whose key fails `keep`.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let doomed: Vec<K> = inner
            .cache
            .iter()
            .filter(|(k, _)| !keep(k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            if let Some(image) = inner.cache.pop(&key) {
                inner.bytes = inner.bytes.saturating_sub(image.byte_len());
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.cache.clear();
        inner.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().cache.is_empty()
    }

    /// Total pixel bytes currently cached.
    pub fn size(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.inner.lock().cache.cap().get()
    }
}

impl<K: Hash + Eq + Clone> Default for FrontCache<K> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
