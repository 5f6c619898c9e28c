//! Container format integration tests.
//!
//! Tests for:
//! - Writing and reading back both byte orders
//! - Header and index map offsets with the top bit set
//! - Repair of interrupted files
//! - Missing-plane fillers

use std::fs::OpenOptions;

use acq_pipeline::format::container::{
    repair_index_map, ContainerHeader, ContainerReader, ContainerWriter, IndexMap, TrailerSlot,
    WriterOptions, INDEX_MAP_OFFSET_HEADER,
};
use acq_pipeline::{AxisOrder, ByteOrder, ContainerError, Coordinate, DisplaySettings};

use super::test_utils::{assert_same_image, grid, make_image, summary};

fn options(byte_order: ByteOrder) -> WriterOptions {
    WriterOptions {
        byte_order,
        ..WriterOptions::default()
    }
}

// =============================================================================
// Round Trip
// =============================================================================

#[test]
fn test_round_trip_both_byte_orders() {
    for byte_order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.ome.tif");
        let summary = summary(2, 2, 1, 1);
        let coords = grid(2, 2, 1, 1);

        let mut writer = ContainerWriter::create(&path, &summary, options(byte_order)).unwrap();
        for c in &coords {
            writer.write_image(&make_image(*c), false).unwrap();
        }
        writer
            .close(&DisplaySettings::defaults_for(&summary), "round trip")
            .unwrap();

        let reader = ContainerReader::open(&path).unwrap();
        assert_eq!(reader.byte_order(), byte_order);
        assert_eq!(reader.summary(), &summary);
        assert_eq!(reader.comment(), "round trip");
        assert_eq!(reader.coordinates(), coords);
        for c in &coords {
            assert_same_image(&reader.read_image(c).unwrap().unwrap(), &make_image(*c));
        }
        assert!(reader.read_image(&Coordinate::new(0, 0, 5, 0)).unwrap().is_none());
    }
}

#[test]
fn test_sequential_read_follows_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.ome.tif");
    let summary = summary(1, 3, 1, 1);
    let coords = grid(1, 3, 1, 1);

    let mut writer = ContainerWriter::create(&path, &summary, WriterOptions::default()).unwrap();
    for (i, c) in coords.iter().enumerate() {
        writer.write_image(&make_image(*c), i == coords.len() - 1).unwrap();
    }
    assert!(writer.is_finished());
    writer.close(&DisplaySettings::default(), "").unwrap();

    let reader = ContainerReader::open(&path).unwrap();
    let mut offset = reader.header().first_ifd_offset;
    let mut seen = Vec::new();
    while let Some((image, next)) = reader.read_next_image(offset).unwrap() {
        seen.push(image.coords());
        offset = next;
    }
    assert_eq!(seen, coords);
}

// =============================================================================
// Offsets
// =============================================================================

#[test]
fn test_header_slot_with_top_bit_set() {
    let summary = summary(1, 1, 1, 1);
    for order in [ByteOrder::LittleEndian, ByteOrder::BigEndian] {
        let (mut bytes, _) = ContainerHeader::encode(order, summary.to_json().unwrap().as_bytes());
        let slot = TrailerSlot::encode(order, INDEX_MAP_OFFSET_HEADER, 0x9000_0010);
        bytes[8..16].copy_from_slice(&slot);

        let header = ContainerHeader::parse(&bytes, 0xA000_0000).unwrap();
        assert_eq!(header.index_map.tag, INDEX_MAP_OFFSET_HEADER);
        assert_eq!(header.index_map.offset, 0x9000_0010);
    }
}

#[test]
fn test_index_map_with_top_bit_offsets() {
    let mut index = IndexMap::new();
    index.insert(Coordinate::new(0, 0, 0, 0), 0x8000_0000);
    index.insert(Coordinate::new(1, 0, 0, 0), 0xFFFF_FFF0);

    let order = ByteOrder::BigEndian;
    let block = index.encode(order, AxisOrder::default());
    let count = IndexMap::decode_prefix(&block, order, 0).unwrap();
    assert_eq!(count, 2);

    let decoded = IndexMap::decode_entries(&block[8..], order, u32::MAX as u64 + 1).unwrap();
    assert_eq!(decoded, index);

    // An offset past the end of the file is rejected.
    assert!(matches!(
        IndexMap::decode_entries(&block[8..], order, 0x8000_0000),
        Err(ContainerError::InvalidOffset { .. })
    ));
}

// =============================================================================
// Repair
// =============================================================================

fn write_interrupted(path: &std::path::Path, images: u32) -> Vec<Coordinate> {
    let summary = summary(1, images, 1, 1);
    let coords = grid(1, images, 1, 1);
    let mut writer = ContainerWriter::create(path, &summary, WriterOptions::default()).unwrap();
    for c in &coords {
        writer.write_image(&make_image(*c), false).unwrap();
    }
    writer.flush().unwrap();
    // Dropped without close: no index map, no trailer.
    coords
}

#[test]
fn test_repair_interrupted_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("interrupted.ome.tif");
    let coords = write_interrupted(&path, 3);

    assert!(ContainerReader::open(&path).is_err());

    let report = repair_index_map(&path).unwrap();
    assert_eq!(report.images, 3);
    assert!(report.broken_at.is_none());

    let reader = ContainerReader::open(&path).unwrap();
    assert_eq!(reader.coordinates(), coords);
    for c in &coords {
        assert_same_image(&reader.read_image(c).unwrap().unwrap(), &make_image(*c));
    }
}

#[test]
fn test_repair_drops_torn_last_image() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("torn.ome.tif");
    let coords = write_interrupted(&path, 3);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    let len = file.metadata().unwrap().len();
    file.set_len(len - 10).unwrap();
    drop(file);

    let report = repair_index_map(&path).unwrap();
    assert_eq!(report.images, 2);
    assert!(report.broken_at.is_some());

    let reader = ContainerReader::open(&path).unwrap();
    assert_eq!(reader.coordinates(), coords[..2].to_vec());
    assert!(reader.read_image(&coords[2]).unwrap().is_none());
}

#[test]
fn test_repair_rejects_non_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("garbage.tif");
    std::fs::write(&path, vec![0x42u8; 128]).unwrap();

    assert!(matches!(
        repair_index_map(&path),
        Err(ContainerError::InvalidMagic(_))
    ));
}

// =============================================================================
// Fillers
// =============================================================================

#[test]
fn test_sparse_grid_gets_fillers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sparse.ome.tif");
    let summary = summary(1, 3, 1, 1);
    let written = [Coordinate::new(0, 0, 0, 0), Coordinate::new(0, 2, 0, 0)];

    let mut writer = ContainerWriter::create(&path, &summary, WriterOptions::default()).unwrap();
    for c in &written {
        writer.write_image(&make_image(*c), false).unwrap();
    }
    assert_eq!(writer.fill_missing_planes().unwrap(), 1);
    writer.close(&DisplaySettings::default(), "").unwrap();

    let reader = ContainerReader::open(&path).unwrap();
    let missing = Coordinate::new(0, 1, 0, 0);
    assert_eq!(reader.coordinates(), written.to_vec());
    assert!(reader.contains(&missing));
    assert!(reader.is_filler(&missing));
    assert!(!reader.is_filler(&written[0]));

    // The nearest earlier slice stands in, unchanged.
    let stand_in = reader.read_image(&missing).unwrap().unwrap();
    assert_eq!(stand_in.coords(), written[0]);
}
