//! In-memory image store.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::image::{Coordinate, DisplaySettings, SummaryMetadata, TaggedImage};

use super::front_cache::FrontCache;
use super::{check_geometry, check_summary_change, sorted_keys, ImageStore};

/// Holds every image of an acquisition in memory.
///
/// An optional [`FrontCache`] can sit in front of the primary mapping, and an
/// optional byte budget turns unbounded growth into
/// [`StoreError::OutOfMemory`], which the pipeline sink treats as fatal.
pub struct RamStore {
    state: RwLock<RamState>,
    front: Option<FrontCache>,
    budget: Option<u64>,
}

struct RamState {
    summary: SummaryMetadata,
    display: DisplaySettings,
    images: HashMap<Coordinate, TaggedImage>,
    bytes: u64,
    finished: bool,
    closed: bool,
}

impl RamStore {
    pub fn new(summary: SummaryMetadata) -> Self {
        Self {
            state: RwLock::new(RamState {
                display: DisplaySettings::defaults_for(&summary),
                summary,
                images: HashMap::new(),
                bytes: 0,
                finished: false,
                closed: false,
            }),
            front: None,
            budget: None,
        }
    }

    /// Put an LRU front cache of `entries` images in front of the store.
    pub fn with_front_cache(mut self, entries: usize) -> Self {
        self.front = Some(FrontCache::with_capacity(entries));
        self
    }

    /// Refuse images once stored pixels would exceed `bytes`.
    pub fn with_budget(mut self, bytes: u64) -> Self {
        self.budget = Some(bytes);
        self
    }

    /// Pixel bytes currently held.
    pub fn stored_bytes(&self) -> u64 {
        self.state.read().bytes
    }

    pub fn front_cache(&self) -> Option<&FrontCache> {
        self.front.as_ref()
    }
}

impl ImageStore for RamStore {
    fn put_image(&self, image: &TaggedImage) -> Result<String, StoreError> {
        let coords = image.coords();
        let mut state = self.state.write();
        if state.closed {
            return Err(StoreError::Closed);
        }
        if state.finished {
            return Err(StoreError::Finished);
        }
        check_geometry(&state.summary, image)?;

        let size = image.byte_len() as u64;
        let replaced = state.images.get(&coords).map_or(0, |old| old.byte_len() as u64);
        let after = state.bytes - replaced + size;
        if let Some(budget) = self.budget {
            if after > budget {
                warn!(%coords, budget, stored = state.bytes, "RAM store budget exhausted");
                return Err(StoreError::OutOfMemory {
                    coords,
                    requested: size,
                    available: budget.saturating_sub(state.bytes - replaced),
                });
            }
        }

        state.images.insert(coords, image.clone());
        state.bytes = after;
        if let Some(front) = &self.front {
            front.put(coords, image.clone());
        }
        Ok(image.label())
    }

    fn get_image(&self, coords: &Coordinate) -> Result<Option<TaggedImage>, StoreError> {
        if let Some(hit) = self.front.as_ref().and_then(|f| f.get(coords)) {
            return Ok(Some(hit));
        }
        let state = self.state.read();
        let found = state.images.get(coords).cloned();
        if let (Some(front), Some(image)) = (&self.front, &found) {
            front.put(*coords, image.clone());
        }
        Ok(found)
    }

    fn image_keys(&self) -> Vec<Coordinate> {
        let state = self.state.read();
        sorted_keys(&state.summary, state.images.keys().copied())
    }

    fn summary_metadata(&self) -> SummaryMetadata {
        self.state.read().summary.clone()
    }

    fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), StoreError> {
        let mut state = self.state.write();
        check_summary_change(&state.summary, &summary, !state.images.is_empty())?;
        state.summary = summary;
        Ok(())
    }

    fn display_settings(&self) -> DisplaySettings {
        self.state.read().display.clone()
    }

    fn set_display_settings(&self, display: DisplaySettings) -> Result<(), StoreError> {
        self.state.write().display = display;
        Ok(())
    }

    fn finished(&self) -> Result<(), StoreError> {
        let mut state = self.state.write();
        if !state.finished {
            state.finished = true;
            debug!(images = state.images.len(), bytes = state.bytes, "RAM store finished");
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.state.read().finished
    }

    fn close(&self) -> Result<(), StoreError> {
        let mut state = self.state.write();
        state.images.clear();
        state.bytes = 0;
        state.finished = true;
        state.closed = true;
        if let Some(front) = &self.front {
            front.clear();
        }
        Ok(())
    }

    fn image_count(&self) -> usize {
        self.state.read().images.len()
    }
}

impl std::fmt::Debug for RamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("RamStore")
            .field("images", &state.images.len())
            .field("bytes", &state.bytes)
            .field("finished", &state.finished)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
