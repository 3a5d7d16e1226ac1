//! Tests for Store
//!
//! These tests verify:
//! - Basic get/set/delete operations
//! - Name and value validation
//! - Idempotent writes
//! - Independent partitions
//! - Every write granularity
//! - Shared access from several threads

use std::sync::Arc;
use std::thread;

use norkv::format::{RecordStatus, SectorDirty, SectorStore};
use norkv::{
    Config, NorKvError, PartitionId, PartitionTable, SharedStore, SimFlash, SimOptions, Store,
    WriteGranularity,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store(sectors: u32) -> (Store<SimFlash>, PartitionId) {
    let flash = SimFlash::new(SimOptions {
        sectors,
        ..Default::default()
    });
    let table = PartitionTable::new().with("nvs", 0, sectors * 4096);
    let store = Store::open(flash, Config::default(), &table).unwrap();
    let pid = store.partition("nvs").unwrap();
    (store, pid)
}

fn setup_store_with_granularity(g: WriteGranularity) -> (Store<SimFlash>, PartitionId) {
    let flash = SimFlash::new(SimOptions {
        sectors: 3,
        granularity: g,
        ..Default::default()
    });
    let config = Config::builder().write_granularity(g).build();
    let table = PartitionTable::new().with("nvs", 0, 3 * 4096);
    let store = Store::open(flash, config, &table).unwrap();
    let pid = store.partition("nvs").unwrap();
    (store, pid)
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_set_and_get() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "ssid", b"MyWifi").unwrap();

    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"MyWifi".to_vec()));
}

#[test]
fn test_get_nonexistent_key() {
    let (store, pid) = setup_store(2);

    assert_eq!(store.get(pid, "missing").unwrap(), None);
}

#[test]
fn test_overwrite_supersedes_old_record() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "ssid", b"MyWifi").unwrap();
    store.set(pid, "ssid", b"OtherWifi").unwrap();

    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"OtherWifi".to_vec()));

    let dump = store.dump(pid).unwrap();
    let sector = &dump.sectors[0];
    assert_eq!(sector.store, SectorStore::Using);
    assert_eq!(sector.dirty, SectorDirty::Dirty);
    assert_eq!(sector.records.len(), 2);
    assert_eq!(sector.records[0].status, RecordStatus::Deleted);
    assert_eq!(sector.records[1].status, RecordStatus::Written);
    assert_eq!(sector.records[1].name, "ssid");
}

#[test]
fn test_delete() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "ssid", b"MyWifi").unwrap();
    store.delete(pid, "ssid").unwrap();

    assert_eq!(store.get(pid, "ssid").unwrap(), None);
}

#[test]
fn test_delete_nonexistent_key() {
    let (mut store, pid) = setup_store(2);

    let result = store.delete(pid, "missing");
    assert!(matches!(result, Err(NorKvError::KeyNotFound)));
}

#[test]
fn test_set_after_delete() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "ssid", b"first").unwrap();
    store.delete(pid, "ssid").unwrap();
    store.set(pid, "ssid", b"second").unwrap();

    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"second".to_vec()));
}

#[test]
fn test_empty_value() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "flag", b"").unwrap();

    assert_eq!(store.get(pid, "flag").unwrap(), Some(Vec::new()));
}

#[test]
fn test_binary_value() {
    let (mut store, pid) = setup_store(2);
    let value: Vec<u8> = (0..=255).collect();

    store.set(pid, "calib", &value).unwrap();

    assert_eq!(store.get(pid, "calib").unwrap(), Some(value));
}

#[test]
fn test_entries_in_address_order() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "a", b"1").unwrap();
    store.set(pid, "b", b"2").unwrap();
    store.set(pid, "a", b"3").unwrap();

    let entries = store.entries(pid).unwrap();
    assert_eq!(
        entries,
        vec![
            ("b".to_string(), b"2".to_vec()),
            ("a".to_string(), b"3".to_vec()),
        ]
    );
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_empty_name_rejected() {
    let (mut store, pid) = setup_store(2);

    assert!(matches!(store.set(pid, "", b"x"), Err(NorKvError::EmptyName)));
    assert!(matches!(store.get(pid, ""), Err(NorKvError::EmptyName)));
}

#[test]
fn test_long_name_rejected() {
    let (mut store, pid) = setup_store(2);
    let name = "n".repeat(33);

    let result = store.set(pid, &name, b"x");
    assert!(matches!(result, Err(NorKvError::NameTooLong { len: 33 })));

    let name = "n".repeat(32);
    store.set(pid, &name, b"x").unwrap();
    assert_eq!(store.get(pid, &name).unwrap(), Some(b"x".to_vec()));
}

#[test]
fn test_value_larger_than_sector_rejected() {
    let (mut store, pid) = setup_store(2);

    let result = store.set(pid, "blob", &vec![0u8; 4096]);
    assert!(matches!(result, Err(NorKvError::ValueTooLarge { len: 4096 })));
}

#[test]
fn test_uninitialized_partition() {
    let (_, pid) = setup_store(2);
    let flash = SimFlash::new(SimOptions::default());
    let store = Store::new(flash, Config::default()).unwrap();

    assert!(matches!(store.get(pid, "ssid"), Err(NorKvError::StoreNotInitialized)));
    assert!(matches!(store.partition("nvs"), Err(NorKvError::UnknownPartition(_))));
}

#[test]
fn test_config_must_match_flash() {
    let flash = SimFlash::new(SimOptions::default());
    let config = Config::builder().sector_size(8192).build();

    let result = Store::new(flash, config);
    assert!(matches!(result, Err(NorKvError::Config(_))));
}

#[test]
fn test_sector_too_small_for_a_record_rejected() {
    let flash = SimFlash::new(SimOptions {
        sector_size: 16,
        sectors: 4,
        ..Default::default()
    });
    let config = Config::builder().sector_size(16).build();

    let result = Store::new(flash, config);
    assert!(matches!(result, Err(NorKvError::Config(_))));
}

// =============================================================================
// Idempotence Tests
// =============================================================================

#[test]
fn test_identical_set_writes_nothing() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "ssid", b"MyWifi").unwrap();
    let writes = store.flash().write_count();

    store.set(pid, "ssid", b"MyWifi").unwrap();

    assert_eq!(store.flash().write_count(), writes);
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"MyWifi".to_vec()));
}

#[test]
fn test_same_length_different_value_is_written() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "ssid", b"aaaa").unwrap();
    let writes = store.flash().write_count();

    store.set(pid, "ssid", b"aaab").unwrap();

    assert!(store.flash().write_count() > writes);
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"aaab".to_vec()));
}

// =============================================================================
// Partition Tests
// =============================================================================

#[test]
fn test_partitions_are_independent() {
    let flash = SimFlash::new(SimOptions {
        sectors: 4,
        ..Default::default()
    });
    let table = PartitionTable::new()
        .with("wifi", 0, 8192)
        .with("calib", 8192, 8192);
    let mut store = Store::open(flash, Config::default(), &table).unwrap();
    let wifi = store.partition("wifi").unwrap();
    let calib = store.partition("calib").unwrap();

    store.set(wifi, "key", b"wifi").unwrap();
    store.set(calib, "key", b"calib").unwrap();
    store.delete(wifi, "key").unwrap();

    assert_eq!(store.get(wifi, "key").unwrap(), None);
    assert_eq!(store.get(calib, "key").unwrap(), Some(b"calib".to_vec()));
}

#[test]
fn test_handles_are_stale_after_reinit() {
    let flash = SimFlash::new(SimOptions {
        sectors: 4,
        ..Default::default()
    });
    let both = PartitionTable::new().with("a", 0, 8192).with("b", 8192, 8192);
    let mut store = Store::open(flash, Config::default(), &both).unwrap();
    let old_a = store.partition("a").unwrap();
    let old_b = store.partition("b").unwrap();

    store
        .init(&PartitionTable::new().with("b", 8192, 8192))
        .unwrap();
    let b = store.partition("b").unwrap();

    let result = store.set(old_a, "k", b"through a stale handle");
    assert!(matches!(result, Err(NorKvError::StoreNotInitialized)));
    assert!(matches!(store.get(old_b, "k"), Err(NorKvError::StoreNotInitialized)));
    assert!(matches!(store.partition("a"), Err(NorKvError::UnknownPartition(_))));
    assert_eq!(store.get(b, "k").unwrap(), None);

    store.set(b, "k", b"fresh").unwrap();
    assert_eq!(store.get(b, "k").unwrap(), Some(b"fresh".to_vec()));
}

#[test]
fn test_reset_to_defaults() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "user", b"custom").unwrap();
    store
        .reset_to_defaults(pid, &[("ssid", b"default".as_slice()), ("channel", b"6".as_slice())])
        .unwrap();

    assert_eq!(store.get(pid, "user").unwrap(), None);
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"default".to_vec()));
    assert_eq!(store.get(pid, "channel").unwrap(), Some(b"6".to_vec()));
}

#[test]
fn test_stats_of_fresh_partition() {
    let (mut store, pid) = setup_store(3);

    let stats = store.stats(pid).unwrap();
    assert_eq!((stats.empty, stats.using, stats.full), (3, 0, 0));
    assert_eq!(stats.used_bytes, 0);

    store.set(pid, "ssid", b"MyWifi").unwrap();
    let stats = store.stats(pid).unwrap();
    assert_eq!((stats.empty, stats.using), (2, 1));
    // header 19 + name 4 + value 6
    assert_eq!(stats.used_bytes, 29);
}

// =============================================================================
// Granularity Tests
// =============================================================================

#[test]
fn test_every_write_granularity() {
    for g in [
        WriteGranularity::Bit1,
        WriteGranularity::Bit8,
        WriteGranularity::Bit32,
        WriteGranularity::Bit64,
    ] {
        let (mut store, pid) = setup_store_with_granularity(g);

        store.set(pid, "ssid", b"MyWifi").unwrap();
        store.set(pid, "ssid", b"OtherWifi").unwrap();
        store.set(pid, "pass", b"secret").unwrap();
        store.delete(pid, "pass").unwrap();
        store.gc_collect(pid).unwrap();

        assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"OtherWifi".to_vec()), "{:?}", g);
        assert_eq!(store.get(pid, "pass").unwrap(), None, "{:?}", g);
    }
}

// =============================================================================
// Shared Access Tests
// =============================================================================

#[test]
fn test_shared_store_from_threads() {
    let (store, pid) = setup_store(4);
    let shared = Arc::new(SharedStore::new(store));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                for i in 0..10 {
                    let key = format!("t{}k{}", t, i);
                    shared.set(pid, &key, key.as_bytes()).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        for i in 0..10 {
            let key = format!("t{}k{}", t, i);
            assert_eq!(shared.get(pid, &key).unwrap(), Some(key.clone().into_bytes()));
        }
    }
}
