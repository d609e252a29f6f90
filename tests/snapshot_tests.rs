//! Tests for the snapshot store
//!
//! These tests verify:
//! - Write/load round-trip
//! - Atomic replacement (no tmp file left behind)
//! - Corrupt or missing snapshots treated as absent
//! - The simulated-failure debug switch

use std::collections::BTreeMap;

use meridiankv::snapshot::SnapshotStore;
use meridiankv::store::Record;
use tempfile::TempDir;

fn record(value: &str, timestamp: u64) -> Record {
    Record {
        value: value.to_string(),
        timestamp,
        origin: 0,
        tombstone: false,
    }
}

fn sample_map() -> BTreeMap<String, Record> {
    let mut map = BTreeMap::new();
    map.insert("alpha".to_string(), record("1", 10));
    map.insert("beta".to_string(), record("2", 20));
    map.insert(
        "gone".to_string(),
        Record {
            value: String::new(),
            timestamp: 30,
            origin: 1,
            tombstone: true,
        },
    );
    map
}

#[test]
fn test_write_load_roundtrip() {
    let temp = TempDir::new().unwrap();
    let store = SnapshotStore::new(temp.path().join("snapshot.bin"), 0.0);

    let map = sample_map();
    let persisted = store.write(&map, 7, false).unwrap();
    assert!(persisted);

    let (loaded, seq) = store.load().unwrap();
    assert_eq!(seq, 7);
    assert_eq!(loaded, map);
}

#[test]
fn test_missing_snapshot_loads_empty() {
    let temp = TempDir::new().unwrap();
    let store = SnapshotStore::new(temp.path().join("snapshot.bin"), 0.0);

    let (map, seq) = store.load().unwrap();
    assert!(map.is_empty());
    assert_eq!(seq, 0);
}

#[test]
fn test_no_tmp_file_left_behind() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("snapshot.bin");
    let store = SnapshotStore::new(path.clone(), 0.0);

    store.write(&sample_map(), 3, false).unwrap();
    assert!(path.exists());
    assert!(!path.with_extension("tmp").exists());
}

#[test]
fn test_corrupt_snapshot_treated_as_absent() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("snapshot.bin");
    let store = SnapshotStore::new(path.clone(), 0.0);

    store.write(&sample_map(), 5, false).unwrap();

    // Flip a payload byte; the checksum no longer matches.
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let (map, seq) = store.load().unwrap();
    assert!(map.is_empty());
    assert_eq!(seq, 0);
}

#[test]
fn test_truncated_snapshot_treated_as_absent() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("snapshot.bin");
    let store = SnapshotStore::new(path.clone(), 0.0);

    store.write(&sample_map(), 5, false).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..6]).unwrap();

    let (map, seq) = store.load().unwrap();
    assert!(map.is_empty());
    assert_eq!(seq, 0);
}

#[test]
fn test_newer_snapshot_replaces_older() {
    let temp = TempDir::new().unwrap();
    let store = SnapshotStore::new(temp.path().join("snapshot.bin"), 0.0);

    store.write(&sample_map(), 5, false).unwrap();

    let mut newer = BTreeMap::new();
    newer.insert("only".to_string(), record("latest", 99));
    store.write(&newer, 12, false).unwrap();

    let (loaded, seq) = store.load().unwrap();
    assert_eq!(seq, 12);
    assert_eq!(loaded, newer);
}

#[test]
fn test_simulated_failure_certain_chance_persists_nothing() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("snapshot.bin");
    let store = SnapshotStore::new(path.clone(), 1.0);

    let persisted = store.write(&sample_map(), 4, true).unwrap();
    assert!(!persisted);
    assert!(!path.exists());
}

#[test]
fn test_simulated_failure_switch_off_is_reliable() {
    let temp = TempDir::new().unwrap();
    let store = SnapshotStore::new(temp.path().join("snapshot.bin"), 1.0);

    // The fault only arms when the caller passes simulate_fail.
    for seq in 1..=10 {
        assert!(store.write(&sample_map(), seq, false).unwrap());
    }
    let (_, seq) = store.load().unwrap();
    assert_eq!(seq, 10);
}
