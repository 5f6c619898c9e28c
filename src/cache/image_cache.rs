//! Façade shared by the pipeline sink, the display and save-as.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::image::{Coordinate, DisplaySettings, SummaryMetadata, TaggedImage};
use crate::store::ImageStore;

use super::changing_keys::ChangingKeys;
use super::recent::{RecentImages, StoreId};

/// Wraps an [`ImageStore`] with a shared recency ring and changing-key
/// tracking.
///
/// The façade is itself an [`ImageStore`], so the sink can write through it
/// while the display reads through it. [`ImageCache::save_as`] moves the
/// façade onto a different store without callers noticing.
pub struct ImageCache {
    current: RwLock<(StoreId, Arc<dyn ImageStore>)>,
    recent: Arc<RecentImages>,
    changing: Mutex<ChangingKeys>,
}

impl ImageCache {
    /// Wrap `store` with a private recency ring.
    pub fn new(store: Arc<dyn ImageStore>) -> Self {
        Self::with_recent(store, Arc::new(RecentImages::new()))
    }

    /// Wrap `store`, sharing `recent` with other façades.
    pub fn with_recent(store: Arc<dyn ImageStore>, recent: Arc<RecentImages>) -> Self {
        let id = recent.register_store();
        Self {
            current: RwLock::new((id, store)),
            recent,
            changing: Mutex::new(ChangingKeys::new()),
        }
    }

    /// The store currently behind the façade.
    pub fn store(&self) -> Arc<dyn ImageStore> {
        self.current.read().1.clone()
    }

    pub fn store_id(&self) -> StoreId {
        self.current.read().0
    }

    /// Tag keys whose values have changed across the images seen so far.
    pub fn changing_keys(&self) -> Vec<String> {
        self.changing.lock().keys()
    }

    /// Tag keys constant across the images seen so far.
    pub fn constant_keys(&self) -> Vec<String> {
        self.changing.lock().constant_keys()
    }

    /// Scan every stored image to rebuild changing-key tracking.
    ///
    /// Used after attaching to an existing dataset.
    pub fn scan_tags(&self) -> Result<usize, StoreError> {
        let store = self.store();
        let mut changing = ChangingKeys::new();
        let mut seen = 0;
        for coords in store.image_keys() {
            if let Some(image) = store.get_image(&coords)? {
                changing.observe(image.tags());
                seen += 1;
            }
        }
        *self.changing.lock() = changing;
        Ok(seen)
    }

    /// Copy every image and the dataset metadata into `target`, finish it,
    /// and point the façade at it.
    ///
    /// The previous store is left open; callers decide when to close it.
    /// Returns the number of images copied.
    pub fn save_as(&self, target: Arc<dyn ImageStore>) -> Result<usize, StoreError> {
        let (old_id, source) = {
            let current = self.current.read();
            (current.0, current.1.clone())
        };

        target.set_summary_metadata(source.summary_metadata())?;
        target.set_display_settings(source.display_settings())?;

        let mut copied = 0;
        for coords in source.image_keys() {
            match source.get_image(&coords)? {
                Some(image) => {
                    target.put_image(&image)?;
                    copied += 1;
                }
                None => debug!(%coords, "image vanished during save-as"),
            }
        }
        target.set_comment(&source.comment())?;
        target.finished()?;

        let new_id = self.recent.register_store();
        *self.current.write() = (new_id, target);
        self.recent.forget_store(old_id);

        info!(images = copied, from = %old_id, to = %new_id, "saved dataset to new store");
        Ok(copied)
    }
}

impl ImageStore for ImageCache {
    fn put_image(&self, image: &TaggedImage) -> Result<String, StoreError> {
        let (id, store) = {
            let current = self.current.read();
            (current.0, current.1.clone())
        };
        let label = store.put_image(image)?;
        self.recent.insert(id, image.clone());
        self.changing.lock().observe(image.tags());
        Ok(label)
    }

    fn get_image(&self, coords: &Coordinate) -> Result<Option<TaggedImage>, StoreError> {
        let (id, store) = {
            let current = self.current.read();
            (current.0, current.1.clone())
        };
        if let Some(image) = self.recent.get(id, coords) {
            return Ok(Some(image));
        }
        let found = store.get_image(coords)?;
        if let Some(image) = &found {
            self.recent.insert(id, image.clone());
        }
        Ok(found)
    }

    fn image_keys(&self) -> Vec<Coordinate> {
        self.store().image_keys()
    }

    fn summary_metadata(&self) -> SummaryMetadata {
        self.store().summary_metadata()
    }

    fn set_summary_metadata(&self, summary: SummaryMetadata) -> Result<(), StoreError> {
        self.store().set_summary_metadata(summary)
    }

    fn display_settings(&self) -> DisplaySettings {
        self.store().display_settings()
    }

    fn set_display_settings(&self, display: DisplaySettings) -> Result<(), StoreError> {
        self.store().set_display_settings(display)
    }

    fn finished(&self) -> Result<(), StoreError> {
        self.store().finished()
    }

    fn is_finished(&self) -> bool {
        self.store().is_finished()
    }

    fn close(&self) -> Result<(), StoreError> {
        let (id, store) = {
            let current = self.current.read();
            (current.0, current.1.clone())
        };
        self.recent.forget_store(id);
        store.close()
    }

    fn is_read_only(&self) -> bool {
        self.store().is_read_only()
    }

    fn image_count(&self) -> usize {
        self.store().image_count()
    }
}

impl std::fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCache")
            .field("store", &self.store_id())
            .field("recent", &self.recent.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
