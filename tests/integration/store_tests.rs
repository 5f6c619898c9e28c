//! Image store integration tests.
//!
//! Tests for:
//! - Identical behavior of the RAM, disk-per-image and multi-page stores
//! - Front cache eviction in front of the RAM store
//! - Recovery of interrupted disk datasets
//! - Container rollover and dataset auto-detection

use std::sync::Arc;

use acq_pipeline::format::container::WriterOptions;
use acq_pipeline::store::{FrontCache, SIDECAR_FILE_NAME};
use acq_pipeline::{
    open_dataset, Coordinate, DiskStore, ImageStore, MultipageOptions, MultipageStore, RamStore,
    StoreError,
};

use super::test_utils::{assert_same_image, grid, make_image, summary};

fn small_files() -> MultipageOptions {
    MultipageOptions {
        writer: WriterOptions {
            max_file_size: 3000,
            trailer_reserve: 0,
            ..WriterOptions::default()
        },
        ..MultipageOptions::default()
    }
}

/// Put every image of a 2x2x2 grid into `store`, check reads, finish it.
fn exercise_store(store: &dyn ImageStore) -> Vec<Coordinate> {
    let coords = grid(2, 2, 2, 1);
    for c in coords.iter().rev() {
        assert_eq!(store.put_image(&make_image(*c)).unwrap(), c.label());
    }

    // Keys come back in axis order regardless of arrival order.
    assert_eq!(store.image_keys(), coords);
    for c in &coords {
        assert_same_image(&store.get_image(c).unwrap().unwrap(), &make_image(*c));
    }
    assert!(store.get_image(&Coordinate::new(0, 0, 9, 0)).unwrap().is_none());

    store.set_comment("all stores agree").unwrap();
    store.finished().unwrap();
    store.finished().unwrap();
    assert!(store.is_finished());
    assert!(matches!(
        store.put_image(&make_image(coords[0])),
        Err(StoreError::Finished) | Err(StoreError::ReadOnly)
    ));
    coords
}

// =============================================================================
// Shared Behavior
// =============================================================================

#[test]
fn test_ram_store_contract() {
    let store = RamStore::new(summary(2, 2, 2, 1));
    exercise_store(&store);
    assert_eq!(store.comment(), "all stores agree");
}

#[test]
fn test_disk_store_contract_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = DiskStore::create(dir.path(), summary(2, 2, 2, 1)).unwrap();
    let coords = exercise_store(&store);
    store.close().unwrap();

    let reopened = DiskStore::open(dir.path()).unwrap();
    assert!(reopened.is_read_only());
    assert_eq!(reopened.comment(), "all stores agree");
    assert_eq!(reopened.image_keys(), coords);
    for c in &coords {
        assert_same_image(&reopened.get_image(c).unwrap().unwrap(), &make_image(*c));
    }
}

#[test]
fn test_multipage_store_contract_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let store = MultipageStore::create(dir.path(), summary(2, 2, 2, 1), MultipageOptions::default()).unwrap();
    let coords = exercise_store(&store);
    store.close().unwrap();

    let reopened = MultipageStore::open(dir.path()).unwrap();
    assert!(reopened.is_read_only());
    assert_eq!(reopened.comment(), "all stores agree");
    assert_eq!(reopened.image_keys(), coords);
    for c in &coords {
        assert_same_image(&reopened.get_image(c).unwrap().unwrap(), &make_image(*c));
    }
}

// =============================================================================
// Front Cache
// =============================================================================

#[test]
fn test_front_cache_evicts_least_recently_used() {
    let cache: FrontCache = FrontCache::with_capacity(3);
    let coords = grid(1, 1, 4, 1);
    for c in &coords[..3] {
        cache.put(*c, make_image(*c));
    }
    cache.get(&coords[0]);
    assert_eq!(cache.put(coords[3], make_image(coords[3])), 1);

    assert!(cache.contains(&coords[0]));
    assert!(!cache.contains(&coords[1]));
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_ram_front_cache_never_loses_images() {
    let store = RamStore::new(summary(1, 1, 10, 1)).with_front_cache(2);
    let coords = grid(1, 1, 10, 1);
    for c in &coords {
        store.put_image(&make_image(*c)).unwrap();
    }
    assert_eq!(store.front_cache().unwrap().len(), 2);
    for c in &coords {
        assert_same_image(&store.get_image(c).unwrap().unwrap(), &make_image(*c));
    }
}

// =============================================================================
// Interrupted Disk Datasets
// =============================================================================

#[test]
fn test_truncated_sidecar_is_recovered() {
    let dir = tempfile::tempdir().unwrap();
    let coords = grid(1, 3, 1, 1);
    {
        let store = DiskStore::create(dir.path(), summary(1, 3, 1, 1)).unwrap();
        for c in &coords {
            store.put_image(&make_image(*c)).unwrap();
        }
        // Dropped without finished(): the sidecar never gets its closing brace.
    }

    let text = std::fs::read_to_string(dir.path().join(SIDECAR_FILE_NAME)).unwrap();
    assert!(serde_json::from_str::<serde_json::Value>(&text).is_err());

    let reopened = DiskStore::open(dir.path()).unwrap();
    assert_eq!(reopened.image_keys(), coords);
    for c in &coords {
        assert_same_image(&reopened.get_image(c).unwrap().unwrap(), &make_image(*c));
    }
}

#[test]
fn test_disk_positions_reopen_together() {
    let dir = tempfile::tempdir().unwrap();
    let coords = grid(1, 1, 2, 3);
    let store = DiskStore::create(dir.path(), summary(1, 1, 2, 3)).unwrap();
    for c in &coords {
        store.put_image(&make_image(*c)).unwrap();
    }
    store.finished().unwrap();

    for p in 0..3 {
        assert!(dir.path().join(format!("Pos{}", p)).join(SIDECAR_FILE_NAME).is_file());
    }
    let reopened = DiskStore::open(dir.path()).unwrap();
    assert_eq!(reopened.image_count(), coords.len());
}

// =============================================================================
// Multipage Rollover
// =============================================================================

#[test]
fn test_rollover_keeps_every_image_addressable() {
    let dir = tempfile::tempdir().unwrap();
    let coords = grid(1, 20, 1, 1);
    let store = MultipageStore::create(dir.path(), summary(1, 20, 1, 1), small_files()).unwrap();
    for c in &coords {
        store.put_image(&make_image(*c)).unwrap();
        // Readable while the acquisition is still running.
        assert_same_image(&store.get_image(c).unwrap().unwrap(), &make_image(*c));
    }
    store.finished().unwrap();
    assert!(store.files().len() > 1);

    let reopened = open_dataset(dir.path()).unwrap();
    assert_eq!(reopened.image_keys(), coords);
    for c in &coords {
        assert_same_image(&reopened.get_image(c).unwrap().unwrap(), &make_image(*c));
    }
}

#[test]
fn test_multipage_sparse_grid_hides_fillers() {
    let dir = tempfile::tempdir().unwrap();
    let store = MultipageStore::create(dir.path(), summary(2, 2, 1, 1), MultipageOptions::default()).unwrap();
    let written = [Coordinate::new(0, 0, 0, 0), Coordinate::new(0, 1, 0, 0), Coordinate::new(1, 0, 0, 0)];
    for c in &written {
        store.put_image(&make_image(*c)).unwrap();
    }
    store.finished().unwrap();

    let reopened = MultipageStore::open(dir.path()).unwrap();
    assert_eq!(reopened.image_count(), 3);
    assert!(reopened.is_filler(&Coordinate::new(1, 1, 0, 0)));
    assert!(!reopened.image_keys().contains(&Coordinate::new(1, 1, 0, 0)));
}

/// Every cell of the `channels x slices x frames x positions` product of
/// `written` reads back an image; real cells return their own pixels.
fn assert_complete_grid(store: &dyn ImageStore, written: &[Coordinate], dims: (u32, u32, u32, u32)) {
    let (channels, slices, frames, positions) = dims;
    for cell in grid(channels, slices, frames, positions) {
        let image = store.get_image(&cell).unwrap();
        assert!(image.is_some(), "no image for {}", cell);
        if written.contains(&cell) {
            assert_same_image(&image.unwrap(), &make_image(cell));
        }
    }
    assert_eq!(store.image_count(), written.len());
}

#[test]
fn test_sparse_grid_complete_across_frames_and_positions() {
    // Position 1 missed frames 0 and 2; channel 1 only has slice 0 at frame 1.
    let written = vec![
        Coordinate::new(0, 0, 0, 0),
        Coordinate::new(0, 1, 0, 0),
        Coordinate::new(0, 0, 1, 0),
        Coordinate::new(0, 1, 1, 0),
        Coordinate::new(1, 0, 1, 0),
        Coordinate::new(0, 0, 2, 0),
        Coordinate::new(0, 1, 2, 0),
        Coordinate::new(0, 0, 1, 1),
    ];
    for split_by_position in [true, false] {
        let dir = tempfile::tempdir().unwrap();
        let options = MultipageOptions {
            split_by_position,
            ..MultipageOptions::default()
        };
        let store = MultipageStore::create(dir.path(), summary(2, 2, 3, 2), options).unwrap();
        for c in &written {
            store.put_image(&make_image(*c)).unwrap();
        }
        store.finished().unwrap();
        assert_complete_grid(&store, &written, (2, 2, 3, 2));

        let reopened = MultipageStore::open(dir.path()).unwrap();
        assert_complete_grid(&reopened, &written, (2, 2, 3, 2));
        assert!(reopened.is_filler(&Coordinate::new(0, 0, 0, 1)));
        assert!(reopened.is_filler(&Coordinate::new(1, 1, 2, 1)));
        assert!(!reopened.image_keys().contains(&Coordinate::new(0, 0, 2, 1)));
    }
}

#[test]
fn test_sparse_grid_complete_after_rollover() {
    let written: Vec<Coordinate> = grid(1, 12, 2, 1)
        .into_iter()
        .filter(|c| c.frame == 0 || c.slice < 3)
        .collect();
    let dir = tempfile::tempdir().unwrap();
    let store = MultipageStore::create(dir.path(), summary(1, 12, 2, 1), small_files()).unwrap();
    for c in &written {
        store.put_image(&make_image(*c)).unwrap();
    }
    store.finished().unwrap();
    assert!(store.files().len() > 1);

    let reopened = open_dataset(dir.path()).unwrap();
    assert_complete_grid(reopened.as_ref(), &written, (1, 12, 2, 1));
}

// =============================================================================
// Auto-detection
// =============================================================================

#[test]
fn test_open_dataset_detects_store_kind() {
    let disk_dir = tempfile::tempdir().unwrap();
    let disk = DiskStore::create(disk_dir.path(), summary(1, 1, 1, 1)).unwrap();
    disk.put_image(&make_image(Coordinate::default())).unwrap();
    disk.finished().unwrap();

    let multi_dir = tempfile::tempdir().unwrap();
    let multi = MultipageStore::create(multi_dir.path(), summary(1, 1, 1, 1), MultipageOptions::default()).unwrap();
    multi.put_image(&make_image(Coordinate::default())).unwrap();
    multi.finished().unwrap();

    let stores: Vec<Arc<dyn ImageStore>> = vec![
        open_dataset(disk_dir.path()).unwrap(),
        open_dataset(multi_dir.path()).unwrap(),
        open_dataset(&multi.files()[0]).unwrap(),
    ];
    for store in stores {
        assert!(store.is_read_only());
        assert_eq!(store.image_count(), 1);
        assert!(matches!(
            store.put_image(&make_image(Coordinate::default())),
            Err(StoreError::ReadOnly)
        ));
    }

    let empty = tempfile::tempdir().unwrap();
    assert!(matches!(
        open_dataset(empty.path()),
        Err(StoreError::UnknownDataset(_))
    ));
}
