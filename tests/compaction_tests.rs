//! Tests for compaction behavior
//!
//! These tests verify:
//! - Dirty suffixes fold down to one record per key on rewrite
//! - Tombstoned keys vanish from the rewritten file entirely
//! - Oversized output splits into several segments at the size target
//! - Undersized neighbors merge back together
//! - Background partition splits past the split threshold
//! - The read-optimized/write-optimized hysteresis

use std::fs;
use std::thread;
use std::time::Duration;

use stratakv::{Adder, Config, I64Codec, Store};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// Path of the segment anchoring the key space (always present)
fn anchor_segment(dir: &std::path::Path) -> std::path::PathBuf {
    dir.join(i64::MIN.to_string())
}

fn segment_files(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.parse::<i64>().is_ok())
        })
        .collect();
    files.sort();
    files
}

// =============================================================================
// Rewrite Tests
// =============================================================================

#[test]
fn test_rewrite_folds_duplicates_to_one_record() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open_path(tmp.path(), I64Codec, Adder).unwrap();

    for _ in 0..100 {
        store.write(42, Some(1)).unwrap();
    }
    store.optimize_for_reading().unwrap();

    assert_eq!(store.read(42).unwrap(), Some(100));
    // one record: 8-byte key + 8-byte value
    assert_eq!(fs::metadata(anchor_segment(tmp.path())).unwrap().len(), 16);
    assert_eq!(store.segment_count(), 1);
}

#[test]
fn test_tombstones_vanish_after_rewrite() {
    let tmp = TempDir::new().unwrap();
    let store = Store::open_path(tmp.path(), I64Codec, Adder).unwrap();

    for key in 0..10 {
        store.write(key, Some(key)).unwrap();
    }
    for key in 0..10 {
        store.write(key, None).unwrap();
    }
    store.optimize_for_reading().unwrap();

    assert_eq!(fs::metadata(anchor_segment(tmp.path())).unwrap().len(), 0);
    assert_eq!(store.exact_size().unwrap(), 0);
    assert_eq!(store.approximate_size().unwrap(), 0);
}

// =============================================================================
// Split / Merge Tests
// =============================================================================

#[test]
fn test_oversized_output_splits_into_segments() {
    let tmp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(tmp.path())
        .read_target_size(256)
        .write_target_size(64 * 1024)
        .build();
    let store = Store::open(config, I64Codec, Adder).unwrap();

    // 100 records of 16 bytes against a 256-byte target
    store
        .write_many((0..100).map(|key| (key, Some(key))))
        .unwrap();
    store.optimize_for_reading().unwrap();

    assert!(store.segment_count() >= 4, "got {}", store.segment_count());
    assert_eq!(segment_files(tmp.path()).len(), store.segment_count());

    // one partition: the scan is ordered across its segments
    let entries: Vec<(i64, i64)> = store
        .iter_all()
        .unwrap()
        .collect::<stratakv::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(entries.len(), 100);
    assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));

    for key in [0, 17, 63, 99] {
        assert_eq!(store.read(key).unwrap(), Some(key));
    }
}

#[test]
fn test_undersized_neighbors_merge_after_deletes() {
    let tmp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(tmp.path())
        .read_target_size(256)
        .write_target_size(64 * 1024)
        .build();
    let store = Store::open(config, I64Codec, Adder).unwrap();

    store
        .write_many((0..100).map(|key| (key, Some(key))))
        .unwrap();
    store.optimize_for_reading().unwrap();
    let split_count = store.segment_count();
    assert!(split_count >= 4);

    // hollow out most of the key space, then compact until stable
    for key in 10..100 {
        store.write(key, None).unwrap();
    }
    store.optimize_for_reading().unwrap();
    store.optimize_for_reading().unwrap();

    assert!(store.segment_count() < split_count);
    assert!(store.segment_count() <= 2, "got {}", store.segment_count());
    assert_eq!(store.exact_size().unwrap(), 10);
    for key in 0..10 {
        assert_eq!(store.read(key).unwrap(), Some(key));
    }
}

#[test]
fn test_background_partition_split() {
    let tmp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(tmp.path())
        .read_target_size(256)
        .write_target_size(1024)
        .partition_split_size(2048)
        .tick_interval(Duration::from_millis(25))
        .build();
    let store = Store::open(config, I64Codec, Adder).unwrap();

    // 300 records = 4800 bytes, over twice the split threshold
    store
        .write_many((0..300).map(|key| (key, Some(key))))
        .unwrap();
    store.optimize_for_reading().unwrap();

    // give the background thread a few ticks to split
    thread::sleep(Duration::from_millis(500));

    assert!(store.partition_count() >= 2, "got {}", store.partition_count());
    for key in 0..300 {
        assert_eq!(store.read(key).unwrap(), Some(key));
    }
    let entries: Vec<(i64, i64)> = store
        .iter_all()
        .unwrap()
        .collect::<stratakv::Result<Vec<_>>>()
        .unwrap();
    assert_eq!(entries.len(), 300);
}

// =============================================================================
// Hysteresis Tests
// =============================================================================

#[test]
fn test_cleaning_waits_for_read_after_write_burst() {
    let tmp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(tmp.path())
        .read_target_size(256)
        .write_target_size(64 * 1024)
        .write_idle_window(Duration::from_millis(100))
        .lazy_clean_probability(0.0)
        .tick_interval(Duration::from_millis(25))
        .build();
    let store = Store::open(config, I64Codec, Adder).unwrap();

    for key in 0..100 {
        store.write(key, Some(key)).unwrap();
    }
    let dirty = store.dirty_bytes();
    assert!(dirty > 0);

    // writes stopped, but no read happened since: stay write-optimized
    thread::sleep(Duration::from_millis(300));
    assert_eq!(store.dirty_bytes(), dirty);

    // one read after the idle window flips the compactor to eager mode
    assert_eq!(store.read(0).unwrap(), Some(0));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(store.dirty_bytes(), 0);
    assert!(store.segment_count() >= 4, "got {}", store.segment_count());
}
