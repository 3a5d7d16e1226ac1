//! Tests for the collector
//!
//! These tests verify:
//! - GC keeps every live key/value pair
//! - Collected sectors return to Empty
//! - Automatic GC under sustained overwrites
//! - StoreFull at the capacity boundary and recovery from it

use norkv::format::{SectorDirty, SectorStore};
use norkv::{Config, NorKvError, PartitionId, PartitionTable, SimFlash, SimOptions, Store};

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

fn sorted_entries(store: &Store<SimFlash>, pid: PartitionId) -> Vec<(String, Vec<u8>)> {
    let mut entries = store.entries(pid).unwrap();
    entries.sort();
    entries
}

// =============================================================================
// Liveness Tests
// =============================================================================

#[test]
fn test_gc_preserves_live_entries() {
    let (mut store, pid) = setup_store(4);

    for i in 0..10 {
        store.set(pid, &format!("key{}", i), &[i as u8; 40]).unwrap();
    }
    store.set(pid, "key3", b"replaced").unwrap();
    store.delete(pid, "key7").unwrap();

    let before = sorted_entries(&store, pid);
    let erases = store.flash().erase_count(0);

    let report = store.gc_collect(pid).unwrap();

    assert_eq!(report.sectors_collected, 1);
    assert_eq!(report.records_moved, 9);
    assert_eq!(sorted_entries(&store, pid), before);
    assert_eq!(store.flash().erase_count(0), erases + 1);

    let dump = store.dump(pid).unwrap();
    assert_eq!(dump.sectors[0].store, SectorStore::Empty);
    assert_eq!(dump.sectors[0].dirty, SectorDirty::Clean);
    assert!(dump.sectors[0].records.is_empty());
}

#[test]
fn test_gc_on_clean_store_does_nothing() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "ssid", b"MyWifi").unwrap();
    let writes = store.flash().write_count();

    let report = store.gc_collect(pid).unwrap();

    assert_eq!(report.sectors_collected, 0);
    assert_eq!(store.flash().write_count(), writes);
}

// =============================================================================
// Automatic GC Tests
// =============================================================================

#[test]
fn test_repeated_overwrites_trigger_gc() {
    let (mut store, pid) = setup_store(2);

    store.set(pid, "ssid", b"MyWifi").unwrap();
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"MyWifi".to_vec()));

    store.set(pid, "ssid", b"OtherWifi").unwrap();
    let dump = store.dump(pid).unwrap();
    assert_eq!(dump.sectors[0].dirty, SectorDirty::Dirty);

    let mut last = Vec::new();
    for i in 0..200u32 {
        last = vec![(i % 251) as u8; 64];
        last[..4].copy_from_slice(&i.to_le_bytes());
        store.set(pid, "ssid", &last).unwrap();
    }

    assert_eq!(store.get(pid, "ssid").unwrap(), Some(last));
    assert!(store.flash().erase_count(0) + store.flash().erase_count(4096) > 2);

    let stats = store.stats(pid).unwrap();
    assert_eq!(stats.empty, 1);
    assert_eq!(store.entries(pid).unwrap().len(), 1);
}

#[test]
fn test_overwrites_at_reserve_do_not_erase() {
    let (mut store, pid) = setup_store(2);
    let erases = |store: &Store<SimFlash>| {
        store.flash().erase_count(0) + store.flash().erase_count(4096)
    };
    let before = erases(&store);

    for i in 0..10u8 {
        store.set(pid, "ssid", &[i; 8]).unwrap();
    }

    let stats = store.stats(pid).unwrap();
    assert_eq!(stats.empty, 1);
    assert_eq!(stats.dirty, 1);
    assert_eq!(erases(&store), before);
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(vec![9; 8]));
}

// =============================================================================
// Capacity Tests
// =============================================================================

/// Fills the only usable sector with distinct keys until the store refuses
fn fill(store: &mut Store<SimFlash>, pid: PartitionId) -> usize {
    for i in 0.. {
        match store.set(pid, &format!("k{:03}", i), &[i as u8; 64]) {
            Ok(()) => {}
            Err(NorKvError::StoreFull) => return i,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    unreachable!()
}

#[test]
fn test_store_full_until_gc_frees_space() {
    let (mut store, pid) = setup_store(2);

    let stored = fill(&mut store, pid);
    assert!(stored > 40);

    // Still full, and nothing was lost
    let extra = [0x5a; 64];
    assert!(matches!(store.set(pid, "extra", &extra), Err(NorKvError::StoreFull)));
    for i in 0..stored {
        assert_eq!(
            store.get(pid, &format!("k{:03}", i)).unwrap(),
            Some(vec![i as u8; 64])
        );
    }
    assert_eq!(store.stats(pid).unwrap().empty, 1);

    store.delete(pid, "k000").unwrap();
    store.set(pid, "extra", &extra).unwrap();

    assert_eq!(store.get(pid, "extra").unwrap(), Some(extra.to_vec()));
    assert_eq!(store.get(pid, "k000").unwrap(), None);
    for i in 1..stored {
        assert_eq!(
            store.get(pid, &format!("k{:03}", i)).unwrap(),
            Some(vec![i as u8; 64])
        );
    }
}

#[test]
fn test_failed_set_keeps_previous_value() {
    let (mut store, pid) = setup_store(2);

    let stored = fill(&mut store, pid);
    let key = format!("k{:03}", stored - 1);

    let result = store.set(pid, &key, &[0xee; 64]);

    assert!(matches!(result, Err(NorKvError::StoreFull)));
    assert_eq!(store.get(pid, &key).unwrap(), Some(vec![(stored - 1) as u8; 64]));
}
