//! Format Module
//!
//! Bit-exact on-flash layout of sectors and records.
//!
//! ## Sector Header
//! ```text
//! ┌──────────────┬──────────────┬───────────┬──────────────┬──────────────┐
//! │ Store status │ Dirty status │ Magic (4) │ Combined (4) │ Reserved (4) │
//! │    table     │    table     │           │              │              │
//! └──────────────┴──────────────┴───────────┴──────────────┴──────────────┘
//! ```
//!
//! ## Record
//! ```text
//! ┌──────────────┬───────────┬─────────┬─────────────┬──────────────┬──────┬───────┐
//! │ Status table │ Total (4) │ CRC (4) │ NameLen (1) │ ValueLen (4) │ Name │ Value │
//! └──────────────┴───────────┴─────────┴─────────────┴──────────────┴──────┴───────┘
//! ```
//!
//! Headers, names and values are each padded with `0xFF` to the write
//! granularity. Multi-byte integers are little-endian.

pub mod record;
pub mod sector;
pub mod status;

use crate::config::{Config, WriteGranularity};

pub use record::{RecordCrc, RecordHeader, RecordMeta};
pub use sector::{SectorCheck, SectorHeader, SectorMeta};
pub use status::{RecordStatus, SectorDirty, SectorStore, Status};

// =============================================================================
// Format Constants
// =============================================================================

/// Longest record name in bytes
pub const NAME_MAX: usize = 32;

/// Magic of every formatted sector
pub const SECTOR_MAGIC: u32 = 0x314B_564E; // "NVK1"

/// Magic written to the sector at flash address 0 (legacy-compatible)
pub const ANCHOR_MAGIC: u32 = 0x304B_564E; // "NVK0"

/// `combined` value of a sector that is not chained to its successors
pub const NOT_COMBINED: u32 = 0xFFFF_FFFF;

/// Fixed offset of the first record in a bootstrap partition sector
pub const BOOTSTRAP_RECORD_OFFSET: u32 = 128;

/// Bytes of the record header following the status table
const RECORD_FIELDS_LEN: u32 = 4 + 4 + 1 + 4;

/// Bytes of the sector header following the status tables
const SECTOR_FIELDS_LEN: u32 = 4 + 4 + 4;

// =============================================================================
// Layout
// =============================================================================

/// Sizes and offsets derived once from the configuration
#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub granularity: WriteGranularity,
    pub sector_size: u32,

    /// Length of the sector store-status table
    pub store_table_len: u32,

    /// Length of the sector dirty-status table
    pub dirty_table_len: u32,

    /// Aligned sector header length
    pub sector_header_len: u32,

    /// Length of the record status table
    pub record_table_len: u32,

    /// Aligned record header length
    pub record_header_len: u32,

    /// Sectors with less free space than this are full
    pub full_threshold: u32,

    pub crc_chunk_size: usize,
}

impl Layout {
    pub fn new(config: &Config) -> Self {
        let g = config.write_granularity;
        let align = |n: u32| align_up(n, g.align_bytes());
        let store_table_len = status::table_len(g, SectorStore::STATES) as u32;
        let dirty_table_len = status::table_len(g, SectorDirty::STATES) as u32;
        let record_table_len = status::table_len(g, RecordStatus::STATES) as u32;
        let record_header_len = align(record_table_len + RECORD_FIELDS_LEN);
        Self {
            granularity: g,
            sector_size: config.sector_size,
            store_table_len,
            dirty_table_len,
            sector_header_len: align(store_table_len + dirty_table_len + SECTOR_FIELDS_LEN),
            record_table_len,
            record_header_len,
            full_threshold: config
                .full_threshold
                .unwrap_or(record_header_len + NAME_MAX as u32),
            crc_chunk_size: config.crc_chunk_size,
        }
    }

    /// Rounds `n` up to the write granularity
    pub fn align(&self, n: u32) -> u32 {
        align_up(n, self.granularity.align_bytes())
    }

    /// Total on-flash length of a record, `None` if it overflows
    pub fn record_len(&self, name_len: usize, value_len: usize) -> Option<u32> {
        let align = self.granularity.align_bytes() as u64;
        let up = |n: usize| (n as u64).checked_add(align - 1).map(|n| n / align * align);
        let total = (self.record_header_len as u64)
            .checked_add(up(name_len)?)?
            .checked_add(up(value_len)?)?;
        u32::try_from(total).ok()
    }

    /// Offset of the dirty-status table inside a sector header
    pub fn dirty_table_offset(&self) -> u32 {
        self.store_table_len
    }

    /// Offset of the magic word inside a sector header
    pub fn magic_offset(&self) -> u32 {
        self.store_table_len + self.dirty_table_len
    }

    /// Offset of the length/CRC fields inside a record header
    pub fn record_fields_offset(&self) -> u32 {
        self.record_table_len
    }

    /// Magic a sector at `addr` is formatted with
    pub fn magic_for(&self, addr: u32) -> u32 {
        if addr == 0 {
            ANCHOR_MAGIC
        } else {
            SECTOR_MAGIC
        }
    }

    /// Copy of `bytes` padded with `0xFF` to the write granularity
    pub fn padded(&self, bytes: &[u8]) -> Vec<u8> {
        let mut out = bytes.to_vec();
        out.resize(self.align(bytes.len() as u32) as usize, 0xff);
        out
    }
}

fn align_up(n: u32, align: u32) -> u32 {
    (n + align - 1) / align * align
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}
