//! Sector header encoding.

use super::status::{self, SectorDirty, SectorStore, Status};
use super::{read_u32, Layout, ANCHOR_MAGIC, NOT_COMBINED, SECTOR_MAGIC};

/// Decoded sector header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorHeader {
    pub store: SectorStore,
    pub dirty: SectorDirty,
    pub magic: u32,
    pub combined: u32,
}

/// Outcome of validating a sector header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorCheck {
    /// Formatted sector
    Valid(SectorHeader),

    /// Header never written, or formatting was interrupted
    Blank,

    /// Header written with an unknown magic
    BadMagic(u32),
}

/// A sector's header plus the free space found by walking its records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorMeta {
    pub addr: u32,
    pub store: SectorStore,
    pub dirty: SectorDirty,
    pub combined: u32,

    /// Bytes still available for new records
    pub remaining: u32,

    /// Address of the first unused byte
    pub next_free: u32,
}

impl SectorMeta {
    /// Number of sectors this one spans, counting its chain
    pub fn chain_len(&self) -> u32 {
        match self.combined {
            NOT_COMBINED | 0 => 1,
            n => n,
        }
    }
}

impl SectorHeader {
    /// Header of a freshly formatted sector
    pub fn formatted(magic: u32) -> Self {
        Self {
            store: SectorStore::Empty,
            dirty: SectorDirty::Clean,
            magic,
            combined: NOT_COMBINED,
        }
    }

    /// Encodes the full, padded header
    pub fn encode(&self, layout: &Layout) -> Vec<u8> {
        let g = layout.granularity;
        let mut bytes = status::encode(g, SectorStore::STATES, self.store.index());
        bytes.extend(status::encode(g, SectorDirty::STATES, self.dirty.index()));
        bytes.extend_from_slice(&self.magic.to_le_bytes());
        bytes.extend_from_slice(&self.combined.to_le_bytes());
        bytes.extend_from_slice(&[0xff; 4]);
        bytes.resize(layout.sector_header_len as usize, 0xff);
        bytes
    }

    /// The two writes that format a sector: magic and fields first, then
    /// the status tables. Each part is aligned to the write granularity.
    pub fn format_writes(&self, layout: &Layout) -> [(u32, Vec<u8>); 2] {
        let mut bytes = self.encode(layout);
        let fields = bytes.split_off(layout.magic_offset() as usize);
        [(layout.magic_offset(), fields), (0, bytes)]
    }

    /// Validates and decodes a raw header read from `addr`.
    ///
    /// A header whose status tables were never completed is `Blank`, as is a
    /// bad magic next to an erased store table: both are interrupted formats.
    /// The sector at flash address 0 also accepts the legacy anchor magic.
    pub fn decode(layout: &Layout, addr: u32, bytes: &[u8]) -> SectorCheck {
        if bytes.iter().all(|&b| b == 0xff) {
            return SectorCheck::Blank;
        }

        let g = layout.granularity;
        let dirty_at = layout.dirty_table_offset() as usize;
        let magic_at = layout.magic_offset() as usize;
        let store = SectorStore::from_index(status::decode(
            g,
            &bytes[..dirty_at],
            SectorStore::STATES,
        ));
        let dirty = SectorDirty::from_index(status::decode(
            g,
            &bytes[dirty_at..magic_at],
            SectorDirty::STATES,
        ));

        let magic = read_u32(bytes, magic_at);
        let accepted = magic == SECTOR_MAGIC || (addr == 0 && magic == ANCHOR_MAGIC);
        if !accepted {
            return match store {
                SectorStore::Unused => SectorCheck::Blank,
                _ => SectorCheck::BadMagic(magic),
            };
        }
        if store == SectorStore::Unused || dirty == SectorDirty::Unused {
            return SectorCheck::Blank;
        }

        SectorCheck::Valid(SectorHeader {
            store,
            dirty,
            magic,
            combined: read_u32(bytes, magic_at + 4),
        })
    }
}
