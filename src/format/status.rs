//! Status tables.
//!
//! A status table stores an ordinal state using only bit-clearing writes, so
//! a state can advance without erasing the sector. The table has one slot per
//! state; state `n` is encoded by clearing slots `0..n`. A slot is one bit
//! with 1-bit granularity and one write unit otherwise. State 0 is the erased
//! table, which is why a freshly erased sector or record needs no write.

use crate::config::WriteGranularity;

/// An ordinal state stored in a status table.
pub trait Status: Copy + Sized {
    /// Number of states, including the erased state 0
    const STATES: usize;

    fn index(self) -> usize;

    fn from_index(index: usize) -> Self;
}

/// Byte length of a table holding `states` states
pub fn table_len(g: WriteGranularity, states: usize) -> usize {
    (states * g.bits() as usize + 7) / 8
}

/// Encodes `index` into a full table.
pub fn encode(g: WriteGranularity, states: usize, index: usize) -> Vec<u8> {
    let mut table = vec![0xff; table_len(g, states)];
    for slot in 0..index.min(states) {
        clear_slot(g, &mut table, slot);
    }
    table
}

/// Decodes a table. The highest cleared slot wins, so skipped slots of an
/// earlier state do not matter.
pub fn decode(g: WriteGranularity, table: &[u8], states: usize) -> usize {
    (0..states)
        .rev()
        .find(|&slot| slot_is_cleared(g, table, slot))
        .map_or(0, |slot| (slot + 1).min(states - 1))
}

/// Minimal write advancing a table to `index`.
///
/// Returns the byte offset inside the table and the bytes to program, or
/// `None` for state 0 which is the erased table.
pub fn advance_write(g: WriteGranularity, states: usize, index: usize) -> Option<(usize, Vec<u8>)> {
    if index == 0 {
        return None;
    }
    let slot = index - 1;
    match g {
        WriteGranularity::Bit1 => {
            let table = encode(g, states, index);
            let byte = slot / 8;
            Some((byte, vec![table[byte]]))
        }
        _ => {
            let width = g.align_bytes() as usize;
            Some((slot * width, vec![0x00; width]))
        }
    }
}

fn clear_slot(g: WriteGranularity, table: &mut [u8], slot: usize) {
    match g {
        WriteGranularity::Bit1 => table[slot / 8] &= !(0x80 >> (slot % 8)),
        _ => {
            let width = g.align_bytes() as usize;
            table[slot * width..(slot + 1) * width].fill(0x00);
        }
    }
}

fn slot_is_cleared(g: WriteGranularity, table: &[u8], slot: usize) -> bool {
    match g {
        WriteGranularity::Bit1 => table[slot / 8] & (0x80 >> (slot % 8)) == 0,
        _ => table[slot * g.align_bytes() as usize] == 0x00,
    }
}

// =============================================================================
// State Machines
// =============================================================================

/// Sector store status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectorStore {
    Unused,
    Empty,
    Using,
    Full,
}

/// Sector dirty status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SectorDirty {
    Unused,
    Clean,
    Dirty,
    CollectingNow,
}

/// Record status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecordStatus {
    Unused,
    PreWrite,
    Written,
    PreDelete,
    Deleted,
    HeaderError,
}

macro_rules! impl_status {
    ($ty:ident, [$($variant:ident),+]) => {
        impl Status for $ty {
            const STATES: usize = [$($ty::$variant),+].len();

            fn index(self) -> usize {
                self as usize
            }

            fn from_index(index: usize) -> Self {
                const ALL: &[$ty] = &[$($ty::$variant),+];
                ALL[index.min(ALL.len() - 1)]
            }
        }
    };
}

impl_status!(SectorStore, [Unused, Empty, Using, Full]);
impl_status!(SectorDirty, [Unused, Clean, Dirty, CollectingNow]);
impl_status!(RecordStatus, [Unused, PreWrite, Written, PreDelete, Deleted, HeaderError]);

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecordStatus::Unused => "unused",
            RecordStatus::PreWrite => "pre-write",
            RecordStatus::Written => "written",
            RecordStatus::PreDelete => "pre-delete",
            RecordStatus::Deleted => "deleted",
            RecordStatus::HeaderError => "header-error",
        };
        f.write_str(name)
    }
}
