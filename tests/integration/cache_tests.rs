//! Image cache façade integration tests.
//!
//! Tests for:
//! - Recent images shared between façades
//! - Changing-key tracking
//! - Save-as into another store kind

use std::sync::Arc;

use acq_pipeline::{
    keys, Coordinate, ImageCache, ImageStore, MultipageOptions, MultipageStore, RamStore,
    RecentImages,
};

use super::test_utils::{assert_same_image, grid, make_image, summary};

#[test]
fn test_recent_images_do_not_collide_between_stores() {
    let recent = Arc::new(RecentImages::with_capacity(8));
    let first = ImageCache::with_recent(Arc::new(RamStore::new(summary(1, 1, 2, 1))), recent.clone());
    let second = ImageCache::with_recent(Arc::new(RamStore::new(summary(1, 1, 2, 1))), recent.clone());
    assert_ne!(first.store_id(), second.store_id());

    let coords = Coordinate::default();
    first.put_image(&make_image(coords)).unwrap();
    assert_eq!(recent.len(), 1);
    assert!(second.get_image(&coords).unwrap().is_none());

    first.close().unwrap();
    assert!(recent.is_empty());
}

#[test]
fn test_changing_keys_follow_puts() {
    let cache = ImageCache::new(Arc::new(RamStore::new(summary(2, 1, 3, 1))));
    for c in grid(1, 1, 3, 1) {
        cache.put_image(&make_image(c)).unwrap();
    }

    let changing = cache.changing_keys();
    assert!(changing.contains(&keys::FRAME_INDEX.to_string()));
    assert!(changing.contains(&keys::EXPOSURE_MS.to_string()));
    assert!(!changing.contains(&"Camera".to_string()));
    assert!(cache.constant_keys().contains(&"Camera".to_string()));
}

#[test]
fn test_scan_tags_rebuilds_tracking() {
    let store = Arc::new(RamStore::new(summary(2, 1, 1, 1)));
    for c in grid(2, 1, 1, 1) {
        store.put_image(&make_image(c)).unwrap();
    }

    let cache = ImageCache::new(store);
    assert!(cache.changing_keys().is_empty());
    assert_eq!(cache.scan_tags().unwrap(), 2);
    assert!(cache.changing_keys().contains(&keys::CHANNEL.to_string()));
}

#[test]
fn test_save_as_moves_facade_to_new_store() {
    let coords = grid(2, 2, 1, 1);
    let ram = Arc::new(RamStore::new(summary(2, 2, 1, 1)));
    let cache = ImageCache::new(ram.clone());
    for c in &coords {
        cache.put_image(&make_image(*c)).unwrap();
    }
    cache.set_comment("saved").unwrap();
    let old_id = cache.store_id();

    let dir = tempfile::tempdir().unwrap();
    let target = Arc::new(
        MultipageStore::create(dir.path(), summary(2, 2, 1, 1), MultipageOptions::default()).unwrap(),
    );
    assert_eq!(cache.save_as(target.clone()).unwrap(), coords.len());
    assert_ne!(cache.store_id(), old_id);
    assert!(target.is_finished());

    // Reads now go to the new store; the old one is untouched.
    assert_eq!(ram.image_count(), coords.len());
    for c in &coords {
        assert_same_image(&cache.get_image(c).unwrap().unwrap(), &make_image(*c));
    }

    let reopened = MultipageStore::open(dir.path()).unwrap();
    assert_eq!(reopened.image_keys(), coords);
    assert_eq!(reopened.comment(), "saved");
}
