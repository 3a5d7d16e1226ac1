//! Space allocation.
//!
//! New records go into a sector that is already in use when one has room.
//! Empty sectors are opened only while more than the reserved number remain,
//! or once a GC pass has been requested and needs them as a destination.

use tracing::{debug, info};

use super::{SectorFilter, Store, Visit};
use crate::error::Result;
use crate::flash::Flash;
use crate::format::{SectorDirty, SectorMeta, SectorStore};
use crate::partition::{PartitionId, Region};

/// Sector usage of a partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectorStats {
    pub empty: usize,
    pub using: usize,
    pub full: usize,

    /// Sectors holding deleted records
    pub dirty: usize,

    /// Sectors left mid-compaction
    pub collecting: usize,

    /// Sectors with an unreadable header
    pub corrupt: usize,

    /// Bytes occupied by records, live or not
    pub used_bytes: u64,

    /// Bytes still available for records
    pub free_bytes: u64,
}

impl<F: Flash> Store<F> {
    /// Sector usage of a partition
    pub fn stats(&self, pid: PartitionId) -> Result<SectorStats> {
        let region = self.ready(pid)?;
        self.sector_stats(region)
    }

    pub(crate) fn sector_stats(&self, region: Region) -> Result<SectorStats> {
        let mut stats = SectorStats::default();
        let mut seen = 0;
        self.for_each_sector(region, SectorFilter::All, |_, sector| {
            seen += sector.chain_len() as usize;
            match sector.store {
                SectorStore::Empty => stats.empty += 1,
                SectorStore::Using => stats.using += 1,
                SectorStore::Full => stats.full += 1,
                SectorStore::Unused => {}
            }
            match sector.dirty {
                SectorDirty::Dirty => stats.dirty += 1,
                SectorDirty::CollectingNow => stats.collecting += 1,
                _ => {}
            }
            stats.used_bytes += (sector.next_free - region.first_record(sector.addr)) as u64;
            stats.free_bytes += sector.remaining as u64;
            Ok(Visit::Continue)
        })?;
        stats.corrupt = (region.sector_count() as usize).saturating_sub(seen);
        Ok(stats)
    }

    /// Find room for `needed` bytes
    ///
    /// Search order:
    /// 1. `Using` sectors with strictly more than `needed` bytes free, if
    ///    clean, or dirty while no GC is pending
    /// 2. An `Empty` sector, if more than the reserved number are left or
    ///    a GC is pending
    ///
    /// On failure a GC pass is requested and `None` returned.
    pub(crate) fn find_space(&mut self, pid: PartitionId, region: Region, needed: u32) -> Result<Option<u32>> {
        let gc_pending = self.gc_pending(pid);

        let mut empty = 0usize;
        let mut first_empty: Option<SectorMeta> = None;
        let mut found = None;
        self.for_each_sector(region, SectorFilter::All, |_, sector| {
            match sector.store {
                SectorStore::Empty => {
                    empty += 1;
                    first_empty.get_or_insert(*sector);
                }
                SectorStore::Using if found.is_none() && sector.remaining > needed => {
                    let usable = match sector.dirty {
                        SectorDirty::Clean => true,
                        SectorDirty::Dirty => !gc_pending,
                        _ => false,
                    };
                    if usable {
                        found = Some(sector.next_free);
                    }
                }
                _ => {}
            }
            Ok(Visit::Continue)
        })?;

        if found.is_some() {
            return Ok(found);
        }

        if let Some(sector) = first_empty {
            let allowed = empty > self.config.reserved_empty_sectors || gc_pending;
            if allowed && sector.remaining > needed {
                return Ok(Some(sector.next_free));
            }
        }

        debug!(
            partition = %self.partition_name(pid),
            needed,
            empty,
            "no space, requesting gc"
        );
        self.partitions[pid.index].gc_request = true;
        Ok(None)
    }

    /// Find room for a record, compacting once if the first search fails.
    ///
    /// Returns the address (if any) and whether a GC pass ran, in which case
    /// records may have moved.
    pub(crate) fn reserve(
        &mut self,
        pid: PartitionId,
        region: Region,
        needed: u32,
    ) -> Result<(Option<u32>, bool)> {
        if let Some(addr) = self.find_space(pid, region, needed)? {
            return Ok((Some(addr), false));
        }

        info!(partition = %self.partition_name(pid), needed, "compacting to make room");
        self.collect(pid, region)?;

        let addr = self.find_space(pid, region, needed)?;
        if addr.is_none() {
            // Nothing left to reclaim
            self.partitions[pid.index].gc_request = false;
        }
        Ok((addr, true))
    }
}
