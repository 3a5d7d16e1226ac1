//! Crash recovery.
//!
//! Rebuilds a consistent partition from whatever a power cut left behind.
//!
//! ## Recovery Process
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ 1. Check every sector header                            │
//! │    blank → format, bad magic → skip (fatal at addr 0)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ 2. Resume compaction of CollectingNow sectors           │
//! ├─────────────────────────────────────────────────────────┤
//! │ 3. Repair records                                       │
//! │    PreWrite / bad length → HeaderError                  │
//! │    PreDelete → Deleted if a committed copy exists,      │
//! │                relocated otherwise                      │
//! └─────────────────────────────────────────────────────────┘
//! ```

use tracing::{error, info, warn};

use super::{SectorFilter, Store, Visit};
use crate::error::{NorKvError, Result};
use crate::flash::Flash;
use crate::format::{RecordMeta, RecordStatus, SectorCheck, SectorDirty};
use crate::partition::{PartitionId, Region};

/// What recovery found and fixed in one partition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub partition: String,

    /// No sector was formatted before: first boot
    pub fresh: bool,

    pub sectors_formatted: usize,

    /// Sectors with a foreign header, left alone
    pub sectors_skipped: usize,

    /// GC passes run to finish interrupted compaction
    pub gc_passes: usize,

    /// Half-deleted records moved to keep their value
    pub records_relocated: usize,

    /// Half-written records discarded
    pub records_discarded: usize,
}

/// A record recovery has to fix
enum Repair {
    Discard(RecordMeta),
    Resolve(RecordMeta),
}

impl<F: Flash> Store<F> {
    /// Recover a registered partition and mark it ready
    pub(crate) fn recover(&mut self, pid: PartitionId) -> Result<RecoveryReport> {
        let region = self.partitions[pid.index].region;
        let mut report = RecoveryReport {
            partition: self.partition_name(pid).to_string(),
            ..Default::default()
        };

        self.check_sectors(region, &mut report)?;
        self.resume_collection(pid, region, &mut report)?;
        self.repair_records(pid, region, &mut report)?;

        self.partitions[pid.index].ready = true;
        info!(
            partition = %report.partition,
            fresh = report.fresh,
            formatted = report.sectors_formatted,
            skipped = report.sectors_skipped,
            gc_passes = report.gc_passes,
            relocated = report.records_relocated,
            discarded = report.records_discarded,
            "partition recovered"
        );
        Ok(report)
    }

    /// Step 1: validate sector headers and format the blank ones
    fn check_sectors(&mut self, region: Region, report: &mut RecoveryReport) -> Result<()> {
        let mut blank = Vec::new();
        let mut valid = 0;

        for i in 0..region.sector_count() {
            let addr = region.base + i * region.sector_size;
            match self.read_sector_header(addr)? {
                SectorCheck::Valid(_) => valid += 1,
                SectorCheck::Blank => blank.push(addr),
                SectorCheck::BadMagic(magic) if addr == 0 => {
                    error!(magic = format_args!("{:#010x}", magic), "anchor sector has a foreign header");
                    return Err(NorKvError::StoreInitFailed(format!(
                        "bad magic {:#010x} in the sector at address 0",
                        magic
                    )));
                }
                SectorCheck::BadMagic(magic) => {
                    warn!(
                        sector = format_args!("{:#010x}", addr),
                        magic = format_args!("{:#010x}", magic),
                        "sector has a foreign header, skipping"
                    );
                    report.sectors_skipped += 1;
                }
            }
        }

        report.fresh = valid == 0 && report.sectors_skipped == 0;
        if report.fresh {
            info!(partition = %report.partition, "no formatted sector found, formatting partition");
        }
        for addr in blank {
            self.format_sector(addr)?;
            report.sectors_formatted += 1;
        }
        Ok(())
    }

    /// Step 2: finish interrupted compaction, bounded
    fn resume_collection(&mut self, pid: PartitionId, region: Region, report: &mut RecoveryReport) -> Result<()> {
        loop {
            let mut interrupted = 0;
            self.for_each_sector(region, SectorFilter::Dirty, |_, sector| {
                if sector.dirty == SectorDirty::CollectingNow {
                    interrupted += 1;
                }
                Ok(Visit::Continue)
            })?;
            if interrupted == 0 && !self.partitions[pid.index].gc_request {
                return Ok(());
            }

            self.bounded_pass(pid, region, report)?;
        }
    }

    fn bounded_pass(&mut self, pid: PartitionId, region: Region, report: &mut RecoveryReport) -> Result<()> {
        if report.gc_passes >= self.config.max_recovery_passes {
            return Err(NorKvError::StoreInitFailed(format!(
                "gc did not settle after {} passes",
                report.gc_passes
            )));
        }
        report.gc_passes += 1;
        self.collect(pid, region)
            .map_err(|e| NorKvError::StoreInitFailed(format!("resuming gc: {}", e)))?;
        Ok(())
    }

    /// Step 3: fix records one at a time until none needs attention.
    ///
    /// Every fix advances a status on flash, so the loop terminates.
    fn repair_records(&mut self, pid: PartitionId, region: Region, report: &mut RecoveryReport) -> Result<()> {
        while let Some(repair) = self.next_repair(region)? {
            match repair {
                Repair::Discard(record) => {
                    warn!(
                        addr = format_args!("{:#010x}", record.addr),
                        status = %record.header.status,
                        "discarding unfinished record"
                    );
                    self.set_record_status(record.addr, RecordStatus::HeaderError)?;
                    self.mark_dirty(region.sector_of(record.addr))?;
                    report.records_discarded += 1;
                }
                Repair::Resolve(record) => match self.relocate(pid, region, &record) {
                    Ok(true) => {
                        warn!(
                            addr = format_args!("{:#010x}", record.addr),
                            key = %record.name_lossy(),
                            "unconfirmed delete has no newer copy, relocated"
                        );
                        report.records_relocated += 1;
                    }
                    Ok(false) => {}
                    // A GC request is pending now; the pass below makes room
                    Err(NorKvError::StoreFull) => {}
                    Err(e) => return Err(e),
                },
            }

            if self.partitions[pid.index].gc_request {
                self.bounded_pass(pid, region, report)?;
            }
        }
        Ok(())
    }

    /// The next record to fix. Discards come first: they make sectors
    /// dirty, which gives relocations room.
    fn next_repair(&self, region: Region) -> Result<Option<Repair>> {
        let mut resolve = None;
        let mut discard = None;
        self.for_each_sector(region, SectorFilter::Occupied, |store, sector| {
            store.for_each_record(region, sector, true, |_, record| {
                let stored = record.header.status;
                if stored == RecordStatus::PreWrite
                    || (record.stub && stored != RecordStatus::HeaderError)
                {
                    discard = Some(record.clone());
                    return Ok(Visit::Stop);
                }
                if resolve.is_none() && record.is_live() && stored == RecordStatus::PreDelete {
                    resolve = Some(record.clone());
                }
                Ok(Visit::Continue)
            })?;
            Ok(if discard.is_some() { Visit::Stop } else { Visit::Continue })
        })?;
        Ok(discard.map(Repair::Discard).or(resolve.map(Repair::Resolve)))
    }
}
