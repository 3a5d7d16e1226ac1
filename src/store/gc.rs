//! Garbage collection.
//!
//! ```text
//!   Clean ──► Dirty ──► CollectingNow ──► (relocate live records)
//!                                     ──► erase + format ──► Empty/Clean
//! ```
//!
//! A sector stays `CollectingNow` until it is erased, so an interrupted pass
//! is found and resumed by recovery.

use tracing::{debug, info, warn};

use super::iter::{RecordCursor, SectorCursor};
use super::Store;
use crate::error::{NorKvError, Result};
use crate::flash::Flash;
use crate::format::{RecordMeta, RecordStatus, SectorDirty, SectorMeta};
use crate::partition::{PartitionId, Region};

/// Outcome of a GC pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Sectors erased and returned to `Empty`
    pub sectors_collected: usize,

    /// Live records copied out of collected sectors
    pub records_moved: usize,

    /// Unconfirmed deletes dropped because a committed copy exists
    pub records_dropped: usize,
}

impl<F: Flash> Store<F> {
    /// Run a GC pass over a partition now
    pub fn gc_collect(&mut self, pid: PartitionId) -> Result<GcReport> {
        let region = self.ready(pid)?;
        self.collect(pid, region)
    }

    /// Collect every dirty sector of a region
    ///
    /// While the pass runs the allocator may use reserved empty sectors.
    /// Requests raised during the pass (a destination filling up) stay
    /// pending afterwards.
    pub(crate) fn collect(&mut self, pid: PartitionId, region: Region) -> Result<GcReport> {
        {
            let state = &mut self.partitions[pid.index];
            state.gc_request = false;
            state.collecting = true;
        }

        let result = self.collect_dirty(pid, region);
        self.partitions[pid.index].collecting = false;

        match &result {
            Ok(report) if report.sectors_collected > 0 => info!(
                partition = %self.partition_name(pid),
                sectors = report.sectors_collected,
                moved = report.records_moved,
                "gc pass complete"
            ),
            Ok(_) => debug!(partition = %self.partition_name(pid), "gc pass found nothing to collect"),
            Err(e) => warn!(partition = %self.partition_name(pid), error = %e, "gc pass aborted"),
        }
        result
    }

    fn collect_dirty(&mut self, pid: PartitionId, region: Region) -> Result<GcReport> {
        let mut report = GcReport::default();
        let mut sectors = SectorCursor::new(region);
        while let Some(sector) = sectors.next(self)? {
            if matches!(sector.dirty, SectorDirty::Dirty | SectorDirty::CollectingNow) {
                self.collect_sector(pid, region, &sector, &mut report)?;
            }
        }
        Ok(report)
    }

    /// Move the live records out of one sector and erase it
    fn collect_sector(
        &mut self,
        pid: PartitionId,
        region: Region,
        sector: &SectorMeta,
        report: &mut GcReport,
    ) -> Result<()> {
        if sector.dirty != SectorDirty::CollectingNow {
            self.set_sector_dirty(sector.addr, SectorDirty::CollectingNow)?;
        }

        let mut records = RecordCursor::new(region, *sector, true);
        while let Some(record) = records.next(self)? {
            if !record.is_live() {
                continue;
            }
            if self.relocate(pid, region, &record)? {
                report.records_moved += 1;
            } else {
                report.records_dropped += 1;
            }
        }

        self.format_sector(sector.addr)?;
        report.sectors_collected += 1;
        Ok(())
    }

    /// Copy a live record to fresh space and retire the original
    ///
    /// A `PreDelete` record whose key has a committed copy elsewhere is only
    /// retired. Without one it is moved like a committed record: keeping a
    /// possible duplicate beats losing the value.
    ///
    /// Returns whether the record was copied.
    pub(crate) fn relocate(&mut self, pid: PartitionId, region: Region, record: &RecordMeta) -> Result<bool> {
        if record.status() == RecordStatus::PreDelete
            && self.has_written_copy(region, &record.name, record.addr)?
        {
            self.retire_record(region, record)?;
            return Ok(false);
        }

        if record.status() == RecordStatus::Written {
            self.set_record_status(record.addr, RecordStatus::PreDelete)?;
        }

        let addr = self
            .find_space(pid, region, record.total_len())?
            .ok_or(NorKvError::StoreFull)?;

        let layout = self.layout;
        let mut name = vec![0u8; layout.align(record.header.name_len as u32) as usize];
        self.read_raw(record.name_addr(&layout), &mut name)?;
        let mut value = vec![0u8; layout.align(record.header.value_len) as usize];
        self.read_raw(record.value_addr(&layout), &mut value)?;

        self.commit_record(pid, region, addr, record.header, &name, &value)?;
        self.retire_record(region, record)?;
        debug!(
            from = format_args!("{:#010x}", record.addr),
            to = format_args!("{:#010x}", addr),
            "record relocated"
        );
        Ok(true)
    }

    /// Compaction after a set or delete
    ///
    /// Runs when a pass is pending, or when fewer empty sectors than the
    /// reserve remain and something is reclaimable. A pass that runs out of
    /// room is left for later; the write that triggered it has succeeded.
    ///
    /// The trigger is strictly below the reserve. A partition sitting at the
    /// reserve is the normal steady state (two sectors with one spare), and
    /// compacting there would erase a sector on every overwrite.
    pub(crate) fn settle(&mut self, pid: PartitionId, region: Region) -> Result<()> {
        if !self.partitions[pid.index].gc_request {
            let stats = self.sector_stats(region)?;
            let starved = stats.empty < self.config.reserved_empty_sectors;
            if !(starved && stats.dirty + stats.collecting > 0) {
                return Ok(());
            }
        }

        match self.collect(pid, region) {
            Err(NorKvError::StoreFull) => Ok(()),
            other => other.map(|_| ()),
        }
    }
}
