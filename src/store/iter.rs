//! Sector and record traversal.
//!
//! Cursors hold only addresses, so callers can mutate the store between
//! steps. The closure-based walkers are for read-only scans.

use tracing::{debug, warn};

use super::Store;
use crate::error::Result;
use crate::flash::Flash;
use crate::format::{
    RecordCrc, RecordHeader, RecordMeta, RecordStatus, SectorCheck, SectorDirty, SectorHeader,
    SectorMeta, SectorStore,
};
use crate::partition::Region;

/// Whether a walk goes on after a visitor returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Stop,
}

/// Which sectors a sector walk visits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorFilter {
    /// Every formatted sector
    All,

    /// Sectors holding at least one record (`Using` or `Full`)
    Occupied,

    /// Sectors waiting for or under compaction
    Dirty,
}

impl SectorFilter {
    pub fn matches(self, sector: &SectorMeta) -> bool {
        match self {
            SectorFilter::All => true,
            SectorFilter::Occupied => {
                matches!(sector.store, SectorStore::Using | SectorStore::Full)
            }
            SectorFilter::Dirty => {
                matches!(sector.dirty, SectorDirty::Dirty | SectorDirty::CollectingNow)
            }
        }
    }
}

/// Walks the formatted sectors of a region, skipping unusable ones
pub(crate) struct SectorCursor {
    region: Region,
    next: Option<u32>,
}

impl SectorCursor {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            next: Some(region.base),
        }
    }

    pub fn next<F: Flash>(&mut self, store: &Store<F>) -> Result<Option<SectorMeta>> {
        while let Some(addr) = self.next.filter(|&addr| addr < self.region.end()) {
            match store.load_sector(self.region, addr)? {
                Some(sector) => {
                    self.next = addr.checked_add(sector.chain_len().saturating_mul(self.region.sector_size));
                    return Ok(Some(sector));
                }
                None => self.next = addr.checked_add(self.region.sector_size),
            }
        }
        self.next = None;
        Ok(None)
    }
}

/// Walks the records of one sector in address order
pub(crate) struct RecordCursor {
    region: Region,
    sector: SectorMeta,
    next: Option<u32>,
    verify: bool,
    started: bool,
}

impl RecordCursor {
    /// With `verify`, committed records have their checksum checked and
    /// their name loaded.
    pub fn new(region: Region, sector: SectorMeta, verify: bool) -> Self {
        Self {
            region,
            sector,
            next: None,
            verify,
            started: false,
        }
    }

    pub fn next<F: Flash>(&mut self, store: &Store<F>) -> Result<Option<RecordMeta>> {
        if !self.started {
            self.started = true;
            self.next = store.next_record_address(self.region, &self.sector, None);
        }
        let Some(addr) = self.next else {
            return Ok(None);
        };

        let end = sector_end(self.region, &self.sector);
        let record = store.read_record(self.region, end, addr, self.verify)?;
        if record.status() == RecordStatus::Unused {
            self.next = None;
            return Ok(None);
        }
        self.next = store.next_record_address(self.region, &self.sector, Some(&record));
        Ok(Some(record))
    }
}

/// One past the last byte of a sector chain, clamped to its region
fn sector_end(region: Region, sector: &SectorMeta) -> u32 {
    let span = sector.chain_len() as u64 * region.sector_size as u64;
    (sector.addr as u64 + span).min(region.end() as u64) as u32
}

impl<F: Flash> Store<F> {
    /// Visit every sector of `region` matching `filter`
    pub(crate) fn for_each_sector(
        &self,
        region: Region,
        filter: SectorFilter,
        mut visit: impl FnMut(&Self, &SectorMeta) -> Result<Visit>,
    ) -> Result<()> {
        let mut sectors = SectorCursor::new(region);
        while let Some(sector) = sectors.next(self)? {
            if filter.matches(&sector) && visit(self, &sector)? == Visit::Stop {
                break;
            }
        }
        Ok(())
    }

    /// Visit every record of a sector
    pub(crate) fn for_each_record(
        &self,
        region: Region,
        sector: &SectorMeta,
        verify: bool,
        mut visit: impl FnMut(&Self, &RecordMeta) -> Result<Visit>,
    ) -> Result<()> {
        let mut records = RecordCursor::new(region, *sector, verify);
        while let Some(record) = records.next(self)? {
            if visit(self, &record)? == Visit::Stop {
                break;
            }
        }
        Ok(())
    }

    /// Read and validate the header of the sector at `addr`
    pub(crate) fn read_sector_header(&self, addr: u32) -> Result<SectorCheck> {
        let mut raw = vec![0u8; self.layout.sector_header_len as usize];
        self.read_raw(addr, &mut raw)?;
        Ok(SectorHeader::decode(&self.layout, addr, &raw))
    }

    /// Load a formatted sector, walking its records to find the free space.
    ///
    /// Returns `None` for blank or corrupt sectors.
    pub(crate) fn load_sector(&self, region: Region, addr: u32) -> Result<Option<SectorMeta>> {
        let header = match self.read_sector_header(addr)? {
            SectorCheck::Valid(header) => header,
            other => {
                debug!(sector = format_args!("{:#010x}", addr), check = ?other, "skipping sector");
                return Ok(None);
            }
        };

        let mut sector = SectorMeta {
            addr,
            store: header.store,
            dirty: header.dirty,
            combined: header.combined,
            remaining: 0,
            next_free: region.first_record(addr),
        };

        let mut records = RecordCursor::new(region, sector, false);
        while let Some(record) = records.next(self)? {
            sector.next_free = record.addr + record.total_len();
        }
        sector.remaining = sector_end(region, &sector).saturating_sub(sector.next_free);
        Ok(Some(sector))
    }

    /// Address of the record following `prev`, or of the first record of
    /// the sector. `None` once the walk would leave the sector.
    pub(crate) fn next_record_address(
        &self,
        region: Region,
        sector: &SectorMeta,
        prev: Option<&RecordMeta>,
    ) -> Option<u32> {
        let next = match prev {
            // Records are only written after a sector left the Empty state
            None if sector.store == SectorStore::Empty => return None,
            None => region.first_record(sector.addr),
            Some(record) => {
                if record.status() == RecordStatus::Unused || record.total_len() == 0 {
                    return None;
                }
                record.addr.checked_add(record.total_len())?
            }
        };
        let header_end = next as u64 + self.layout.record_header_len as u64;
        (header_end <= sector_end(region, sector) as u64).then_some(next)
    }

    /// Read the record at `addr`
    ///
    /// A length field that is erased, misaligned, or points past the sector
    /// turns the record into a stub the length of a bare header.
    pub(crate) fn read_record(
        &self,
        region: Region,
        sector_end: u32,
        addr: u32,
        verify: bool,
    ) -> Result<RecordMeta> {
        let header_len = self.layout.record_header_len;
        let mut raw = vec![0u8; header_len as usize];
        self.read_raw(addr, &mut raw)?;

        let header = RecordHeader::decode(&self.layout, &raw);
        let mut record = RecordMeta {
            addr,
            header,
            crc_ok: false,
            stub: false,
            name: Vec::new(),
        };
        if header.status == RecordStatus::Unused {
            return Ok(record);
        }

        let len = header.total_len;
        let unusable = len == u32::MAX
            || len < header_len
            || len > region.len
            || len != self.layout.align(len)
            || addr as u64 + len as u64 > sector_end as u64;
        if unusable {
            warn!(addr = format_args!("{:#010x}", addr), len, "record length unusable");
            record.stub = true;
            record.header.total_len = header_len;
            return Ok(record);
        }

        if verify && matches!(header.status, RecordStatus::Written | RecordStatus::PreDelete) {
            self.verify_record(&mut record)?;
        }
        Ok(record)
    }

    /// Check a record's checksum, streaming its payload in chunks
    fn verify_record(&self, record: &mut RecordMeta) -> Result<()> {
        if !record.lengths_consistent(&self.layout) {
            debug!(addr = format_args!("{:#010x}", record.addr), "record lengths disagree");
            return Ok(());
        }

        let h = record.header;
        let mut crc = RecordCrc::new(h.name_len, h.value_len);

        let mut name = vec![0u8; self.layout.align(h.name_len as u32) as usize];
        self.read_raw(record.name_addr(&self.layout), &mut name)?;
        crc.update(&name);

        let mut addr = record.value_addr(&self.layout);
        let mut left = self.layout.align(h.value_len) as usize;
        let mut chunk = vec![0u8; self.layout.crc_chunk_size];
        while left > 0 {
            let n = left.min(chunk.len());
            self.read_raw(addr, &mut chunk[..n])?;
            crc.update(&chunk[..n]);
            addr += n as u32;
            left -= n;
        }

        if crc.finish() == h.crc32 {
            name.truncate(h.name_len as usize);
            record.name = name;
            record.crc_ok = true;
        } else {
            warn!(addr = format_args!("{:#010x}", record.addr), "record checksum mismatch");
        }
        Ok(())
    }
}
