//! Tests for crash recovery
//!
//! These tests verify:
//! - First boot formatting and reopen
//! - Power cuts at every byte of a set, a delete and a GC pass
//! - Resolution of half-written and half-deleted records
//! - Corrupt sector headers and records

use norkv::format::{RecordStatus, SectorStore};
use norkv::{
    Config, NorKvError, PartitionId, PartitionTable, RecoveryReport, SimFlash, SimOptions, Store,
};

// =============================================================================
// Helper Functions
// =============================================================================

const SECTORS: u32 = 2;

fn table() -> PartitionTable {
    PartitionTable::new().with("nvs", 0, SECTORS * 4096)
}

fn blank_flash() -> SimFlash {
    SimFlash::new(SimOptions {
        sectors: SECTORS,
        ..Default::default()
    })
}

fn open(flash: SimFlash) -> (Store<SimFlash>, PartitionId, RecoveryReport) {
    let mut store = Store::new(flash, Config::default()).unwrap();
    let mut reports = store.init(&table()).unwrap();
    let pid = store.partition("nvs").unwrap();
    (store, pid, reports.remove(0))
}

/// Cut power, restore it and run recovery. Returns whether the cut fired.
fn crash_and_reopen(
    store: Store<SimFlash>,
) -> (Store<SimFlash>, PartitionId, RecoveryReport, bool) {
    let mut flash = store.into_flash();
    let cut = flash.power_cycle();
    let (store, pid, report) = open(flash);
    (store, pid, report, cut)
}

fn store_with_old_value() -> (Store<SimFlash>, PartitionId) {
    let (mut store, pid, _) = open(blank_flash());
    store.set(pid, "ssid", b"old-value").unwrap();
    store.set(pid, "other", b"untouched").unwrap();
    (store, pid)
}

// =============================================================================
// Startup Tests
// =============================================================================

#[test]
fn test_first_boot_formats_partition() {
    let (store, _, report) = open(blank_flash());

    assert!(report.fresh);
    assert_eq!(report.sectors_formatted, 2);

    let (_, _, report) = open(store.into_flash());
    assert!(!report.fresh);
    assert_eq!(report.sectors_formatted, 0);
}

#[test]
fn test_values_survive_reopen() {
    let (mut store, pid, _) = open(blank_flash());
    store.set(pid, "ssid", b"MyWifi").unwrap();
    store.set(pid, "pass", b"secret").unwrap();
    store.delete(pid, "pass").unwrap();

    let (store, pid, report) = open(store.into_flash());

    assert_eq!(report.records_discarded, 0);
    assert_eq!(report.records_relocated, 0);
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"MyWifi".to_vec()));
    assert_eq!(store.get(pid, "pass").unwrap(), None);
}

// =============================================================================
// Power Cut Tests
// =============================================================================

#[test]
fn test_power_cut_at_every_byte_of_set() {
    for budget in 0.. {
        let (mut store, pid) = store_with_old_value();
        store.flash_mut().arm_power_cut(budget);

        let result = store.set(pid, "ssid", b"new-value!");
        let (store, pid, _, cut) = crash_and_reopen(store);

        let value = store.get(pid, "ssid").unwrap();
        assert_eq!(store.get(pid, "other").unwrap(), Some(b"untouched".to_vec()));
        if !cut {
            assert!(result.is_ok());
            assert_eq!(value, Some(b"new-value!".to_vec()));
            assert!(budget > 20);
            break;
        }

        assert!(result.is_err(), "budget {}", budget);
        assert!(
            value == Some(b"old-value".to_vec()) || value == Some(b"new-value!".to_vec()),
            "budget {}: {:?}",
            budget,
            value
        );
    }
}

#[test]
fn test_power_cut_at_every_byte_of_delete() {
    for budget in 0.. {
        let (mut store, pid) = store_with_old_value();
        store.flash_mut().arm_power_cut(budget);

        let result = store.delete(pid, "ssid");
        let (store, pid, _, cut) = crash_and_reopen(store);

        let value = store.get(pid, "ssid").unwrap();
        if !cut {
            assert!(result.is_ok());
            assert_eq!(value, None);
            break;
        }
        assert!(value == Some(b"old-value".to_vec()) || value.is_none());
    }
}

#[test]
fn test_power_cut_at_every_byte_of_gc() {
    let populate = || {
        let (mut store, pid, _) = open(blank_flash());
        for i in 0..5u8 {
            store.set(pid, &format!("k{}", i), &[i; 24]).unwrap();
        }
        store.set(pid, "k1", b"second version").unwrap();
        store.delete(pid, "k3").unwrap();
        (store, pid)
    };

    let (store, pid) = populate();
    let mut expected = store.entries(pid).unwrap();
    expected.sort();
    assert_eq!(expected.len(), 4);

    let mut saw_resume = false;
    for budget in 0.. {
        let (mut store, pid) = populate();
        store.flash_mut().arm_power_cut(budget);

        let result = store.gc_collect(pid);
        let (store, pid, report, cut) = crash_and_reopen(store);
        saw_resume |= report.gc_passes > 0;

        let mut entries = store.entries(pid).unwrap();
        entries.sort();
        assert_eq!(entries, expected, "budget {}", budget);

        if !cut {
            assert!(result.is_ok());
            break;
        }
    }
    assert!(saw_resume);
}

// =============================================================================
// Record Resolution Tests
// =============================================================================

/// Bytes the set of `ssid` programs on `store_with_old_value()`
fn set_cost() -> usize {
    let (mut store, pid) = store_with_old_value();
    let before = store.flash().bytes_written();
    store.set(pid, "ssid", b"new-value!").unwrap();
    store.flash().bytes_written() - before
}

#[test]
fn test_crash_before_old_copy_deleted_keeps_new_value() {
    // The last two bytes of a set retire the old copy and mark its sector dirty
    let budget = set_cost() - 2;
    let (mut store, pid) = store_with_old_value();
    store.flash_mut().arm_power_cut(budget);
    assert!(store.set(pid, "ssid", b"new-value!").is_err());

    let (store, pid, report, cut) = crash_and_reopen(store);

    assert!(cut);
    assert_eq!(report.records_relocated, 0);
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"new-value!".to_vec()));

    let dump = store.dump(pid).unwrap();
    let ssid: Vec<_> = dump.sectors[0]
        .records
        .iter()
        .filter(|r| r.status == RecordStatus::Written && r.name == "ssid")
        .collect();
    assert_eq!(ssid.len(), 1);
}

#[test]
fn test_crash_after_old_copy_superseded_keeps_old_value() {
    // One byte marks the old copy PreDelete, the new header never starts
    let (mut store, pid) = store_with_old_value();
    store.flash_mut().arm_power_cut(1);
    assert!(store.set(pid, "ssid", b"new-value!").is_err());

    let (store, pid, report, cut) = crash_and_reopen(store);

    assert!(cut);
    assert_eq!(report.records_relocated, 1);
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"old-value".to_vec()));
}

#[test]
fn test_crash_in_new_header_discards_it() {
    // PreDelete byte, then part of the new header
    let (mut store, pid) = store_with_old_value();
    store.flash_mut().arm_power_cut(1 + 5);
    assert!(store.set(pid, "ssid", b"new-value!").is_err());

    let (mut store, pid, report, cut) = crash_and_reopen(store);

    assert!(cut);
    assert_eq!(report.records_discarded, 1);
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"old-value".to_vec()));

    // The store keeps working after the damaged record
    store.set(pid, "ssid", b"retry").unwrap();
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"retry".to_vec()));
    let (store, pid, report) = open(store.into_flash());
    assert_eq!(report.records_discarded, 0);
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"retry".to_vec()));
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_bad_magic_on_anchor_sector_fails_init() {
    let (store, _, _) = open(blank_flash());
    let magic_at = store.layout().magic_offset();
    let mut flash = store.into_flash();
    flash.corrupt(magic_at, &0xdead_beef_u32.to_le_bytes());

    let mut store = Store::new(flash, Config::default()).unwrap();
    let result = store.init(&table());

    assert!(matches!(result, Err(NorKvError::StoreInitFailed(_))));
}

#[test]
fn test_bad_magic_on_other_sector_is_skipped() {
    let flash = SimFlash::new(SimOptions {
        sectors: 3,
        ..Default::default()
    });
    let table = PartitionTable::new().with("nvs", 0, 3 * 4096);
    let store = Store::open(flash, Config::default(), &table).unwrap();
    let magic_at = store.layout().magic_offset();
    let mut flash = store.into_flash();
    flash.corrupt(4096 + magic_at, &0xdead_beef_u32.to_le_bytes());

    let mut store = Store::new(flash, Config::default()).unwrap();
    let report = store.init(&table).unwrap().remove(0);
    let pid = store.partition("nvs").unwrap();

    assert_eq!(report.sectors_skipped, 1);
    assert_eq!(store.stats(pid).unwrap().corrupt, 1);
    store.set(pid, "ssid", b"MyWifi").unwrap();
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"MyWifi".to_vec()));
}

#[test]
fn test_corrupt_value_reads_as_missing() {
    let (mut store, pid, _) = open(blank_flash());
    store.set(pid, "ssid", b"MyWifi").unwrap();

    let layout = *store.layout();
    let value_at = layout.sector_header_len + layout.record_header_len + 4;
    let mut flash = store.into_flash();
    flash.corrupt(value_at, b"X");

    let (mut store, pid, _) = open(flash);
    assert_eq!(store.get(pid, "ssid").unwrap(), None);

    store.set(pid, "ssid", b"Fresh").unwrap();
    assert_eq!(store.get(pid, "ssid").unwrap(), Some(b"Fresh".to_vec()));
}

#[test]
fn test_interrupted_gc_is_resumed() {
    let (mut store, pid, _) = open(blank_flash());
    store.set(pid, "a", b"1").unwrap();
    store.set(pid, "b", b"2").unwrap();
    store.delete(pid, "a").unwrap();

    // Advance sector 0 from Dirty to CollectingNow by hand
    let layout = *store.layout();
    let mut flash = store.into_flash();
    let slot = layout.dirty_table_offset() + 2;
    flash.corrupt(slot, &[0x00]);

    let (store, pid, report) = open(flash);

    assert_eq!(report.gc_passes, 1);
    assert_eq!(store.get(pid, "b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(store.get(pid, "a").unwrap(), None);
    let dump = store.dump(pid).unwrap();
    assert_eq!(dump.sectors[0].store, SectorStore::Empty);
}

/// Three sectors: two full of live records, both left mid-compaction.
///
/// Moving the first fills the spare sector, which requests a second pass.
fn image_needing_two_passes() -> (SimFlash, PartitionTable) {
    let flash = SimFlash::new(SimOptions {
        sectors: 3,
        ..Default::default()
    });
    let table = PartitionTable::new().with("nvs", 0, 3 * 4096);
    let mut store = Store::open(flash, Config::default(), &table).unwrap();
    let pid = store.partition("nvs").unwrap();

    // Four 1010-byte records leave a sector below the full threshold
    for i in 0..8u8 {
        store.set(pid, &format!("k{:03}", i), &[i; 987]).unwrap();
    }
    let stats = store.stats(pid).unwrap();
    assert_eq!((stats.full, stats.empty), (2, 1));

    let slots = store.layout().dirty_table_offset() + 1;
    let mut flash = store.into_flash();
    for sector in [0, 4096] {
        flash.corrupt(sector + slots, &[0x00, 0x00]);
    }
    (flash, table)
}

#[test]
fn test_recovery_fails_when_gc_does_not_settle() {
    let (flash, table) = image_needing_two_passes();
    let config = Config::builder().max_recovery_passes(1).build();

    let mut store = Store::new(flash, config).unwrap();
    let result = store.init(&table);

    assert!(matches!(result, Err(NorKvError::StoreInitFailed(_))));
}

#[test]
fn test_recovery_runs_follow_up_gc_pass() {
    let (flash, table) = image_needing_two_passes();

    let mut store = Store::new(flash, Config::default()).unwrap();
    let report = store.init(&table).unwrap().remove(0);
    let pid = store.partition("nvs").unwrap();

    assert_eq!(report.gc_passes, 2);
    assert_eq!(store.entries(pid).unwrap().len(), 8);
    assert_eq!(store.get(pid, "k005").unwrap(), Some(vec![5; 987]));
    assert_eq!(store.stats(pid).unwrap().collecting, 0);
}
