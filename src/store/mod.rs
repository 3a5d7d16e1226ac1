//! Store Module
//!
//! The record store engine that coordinates all components.
//!
//! ## Responsibilities
//! - Register partitions and run crash recovery on each before use
//! - Serve get/set/delete with write-before-supersede ordering
//! - Allocate record space and trigger compaction when sectors run out
//!
//! ## Write Protocol
//! ```text
//!   set(k, v):
//!     reserve space ──► old: Written → PreDelete
//!                   ──► new: PreWrite → name → value → Written
//!                   ──► old: PreDelete → Deleted (sector Clean → Dirty)
//!                   ──► GC if requested
//! ```
//! At every point at least one complete copy of the value is on flash, and
//! recovery can tell which one is current.

mod alloc;
mod dump;
mod gc;
mod iter;
mod recovery;

use tracing::{debug, info};

use crate::config::Config;
use crate::error::{NorKvError, Result};
use crate::flash::Flash;
use crate::format::status::{self, Status};
use crate::format::{
    Layout, RecordCrc, RecordHeader, RecordMeta, RecordStatus, SectorCheck, SectorDirty,
    SectorHeader, SectorStore, NAME_MAX,
};
use crate::partition::{Partition, PartitionId, PartitionTable, Region};

pub use alloc::SectorStats;
pub use dump::{Dump, RecordSummary, SectorSummary};
pub use gc::GcReport;
pub(crate) use iter::{SectorFilter, Visit};
pub use recovery::RecoveryReport;

/// The record store engine
///
/// ## Concurrency Model
///
/// Every operation is synchronous and needs exclusive access (`&mut self`)
/// or, for reads, shared access. The store does no locking of its own; wrap
/// it in [`SharedStore`](crate::SharedStore) to serialize access from
/// several threads.
pub struct Store<F: Flash> {
    /// The flash device
    flash: F,

    /// Store configuration
    config: Config,

    /// Sizes and offsets derived from the configuration
    layout: Layout,

    /// Registered partitions, indexed by `PartitionId`
    partitions: Vec<PartitionState>,

    /// Bumped by every `init`; handles from an older one are stale
    generation: u32,
}

/// Per-partition runtime state
struct PartitionState {
    partition: Partition,
    region: Region,

    /// `init` generation that registered the partition
    generation: u32,

    /// A GC pass has been requested and not run yet
    gc_request: bool,

    /// A GC pass is running; the allocator may use reserved sectors
    collecting: bool,

    /// Recovery has completed
    ready: bool,

    /// Holds the partition table rather than user data
    bootstrap: bool,
}

impl<F: Flash> Store<F> {
    /// Create a store over a flash device
    ///
    /// No partition is usable until [`Store::init`] (or
    /// [`Store::discover`]) has registered and recovered it.
    pub fn new(flash: F, config: Config) -> Result<Self> {
        config.validate()?;

        if flash.sector_size() != config.sector_size {
            return Err(NorKvError::Config(format!(
                "flash erase unit is {} bytes, config says {}",
                flash.sector_size(),
                config.sector_size
            )));
        }
        if flash.capacity() % config.sector_size != 0 {
            return Err(NorKvError::Config(format!(
                "flash capacity {} is not a whole number of sectors",
                flash.capacity()
            )));
        }

        let layout = Layout::new(&config);
        Ok(Self {
            flash,
            config,
            layout,
            partitions: Vec::new(),
            generation: 0,
        })
    }

    /// Create a store and initialize it with a partition table
    pub fn open(flash: F, config: Config, table: &PartitionTable) -> Result<Self> {
        let mut store = Self::new(flash, config)?;
        store.init(table)?;
        Ok(store)
    }

    /// Register the partitions of `table` and recover each of them
    ///
    /// On startup, per partition:
    /// 1. Validate sector headers, formatting blank ones
    /// 2. Resume any interrupted compaction
    /// 3. Repair records left half-written or half-deleted
    ///
    /// Any failure is fatal and reported as `StoreInitFailed`.
    pub fn init(&mut self, table: &PartitionTable) -> Result<Vec<RecoveryReport>> {
        table.validate(&self.config, self.flash.capacity())?;

        // Re-initializing replaces every user partition and invalidates
        // their handles
        self.generation = self.generation.wrapping_add(1);
        self.partitions.retain(|p| p.bootstrap);
        for state in &mut self.partitions {
            state.generation = self.generation;
        }

        let mut reports = Vec::with_capacity(table.len());
        for partition in table.iter() {
            let id = self.register(partition.clone(), self.layout.sector_header_len, false);
            reports.push(self.recover_or_fail(id)?);
        }
        Ok(reports)
    }

    /// Look up a registered partition by name
    pub fn partition(&self, name: &str) -> Result<PartitionId> {
        self.partitions
            .iter()
            .position(|p| !p.bootstrap && p.partition.name == name)
            .map(|index| self.id_at(index))
            .ok_or_else(|| NorKvError::UnknownPartition(name.to_string()))
    }

    /// Registered user partitions
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.partitions
            .iter()
            .filter(|p| !p.bootstrap)
            .map(|p| &p.partition)
    }

    // =========================================================================
    // Key/Value Operations
    // =========================================================================

    /// Get a value by key
    ///
    /// Returns `Ok(None)` if no intact copy of the key exists. Records that
    /// fail their checksum are skipped, never returned.
    pub fn get(&self, pid: PartitionId, key: &str) -> Result<Option<Vec<u8>>> {
        let region = self.ready(pid)?;
        check_name(key)?;

        match self.find_record(region, key.as_bytes())? {
            Some(record) => Ok(Some(self.read_value(&record)?)),
            None => Ok(None),
        }
    }

    /// Set a key to a value
    ///
    /// Steps:
    /// 1. Skip the write entirely if the stored value is identical
    /// 2. Reserve space (compacting once if needed), else `StoreFull`
    /// 3. Mark the current copy `PreDelete`
    /// 4. Write the new record and commit it
    /// 5. Mark the old copy `Deleted` and its sector dirty
    /// 6. Run a GC pass if one was requested
    pub fn set(&mut self, pid: PartitionId, key: &str, value: &[u8]) -> Result<()> {
        let region = self.ready(pid)?;
        check_name(key)?;

        let name = key.as_bytes();
        let total_len = self
            .layout
            .record_len(name.len(), value.len())
            .filter(|&len| len < region.sector_capacity())
            .ok_or(NorKvError::ValueTooLarge { len: value.len() })?;

        // Step 1: idempotent write
        let mut old = self.find_record(region, name)?;
        if let Some(record) = &old {
            if record.status() == RecordStatus::Written
                && record.header.value_len as usize == value.len()
                && self.value_equals(record, value)?
            {
                debug!(key, "value unchanged, skipping write");
                return Ok(());
            }
        }

        // Step 2: reserve space; a GC pass may move the old copy
        let (addr, collected) = self.reserve(pid, region, total_len)?;
        let addr = addr.ok_or(NorKvError::StoreFull)?;
        if collected {
            old = self.find_record(region, name)?;
        }

        // Step 3: supersede the old copy, it stays readable until step 5
        if let Some(record) = &old {
            if record.status() == RecordStatus::Written {
                self.set_record_status(record.addr, RecordStatus::PreDelete)?;
            }
        }

        // Step 4: write and commit the new copy
        let header = RecordHeader {
            status: RecordStatus::PreWrite,
            total_len,
            crc32: RecordCrc::of(&self.layout, name, value),
            name_len: name.len() as u8,
            value_len: value.len() as u32,
        };
        let padded_name = self.layout.padded(name);
        let padded_value = self.layout.padded(value);
        self.commit_record(pid, region, addr, header, &padded_name, &padded_value)?;
        debug!(key, addr = format_args!("{:#010x}", addr), len = total_len, "record written");

        // Step 5: retire the old copy
        if let Some(record) = &old {
            self.retire_record(region, record)?;
        }

        // Step 6: compaction
        self.settle(pid, region)
    }

    /// Delete a key
    ///
    /// Returns `KeyNotFound` if the key has no intact copy.
    pub fn delete(&mut self, pid: PartitionId, key: &str) -> Result<()> {
        let region = self.ready(pid)?;
        check_name(key)?;

        let record = self
            .find_record(region, key.as_bytes())?
            .ok_or(NorKvError::KeyNotFound)?;

        if record.status() == RecordStatus::Written {
            self.set_record_status(record.addr, RecordStatus::PreDelete)?;
        }
        self.retire_record(region, &record)?;
        debug!(key, addr = format_args!("{:#010x}", record.addr), "record deleted");

        self.settle(pid, region)
    }

    /// Erase a partition and fill it with a default set of values
    pub fn reset_to_defaults(&mut self, pid: PartitionId, defaults: &[(&str, &[u8])]) -> Result<()> {
        let region = self.state(pid)?.region;

        for (key, _) in defaults {
            check_name(key)?;
        }

        for i in 0..region.sector_count() {
            self.format_sector(region.base + i * region.sector_size)?;
        }

        let state = &mut self.partitions[pid.index];
        state.gc_request = false;
        state.collecting = false;
        state.ready = true;
        info!(
            partition = %state.partition.name,
            defaults = defaults.len(),
            "partition reset to defaults"
        );

        for (key, value) in defaults {
            self.set(pid, key, value)?;
        }
        Ok(())
    }

    /// Every live key/value pair, in address order
    pub fn entries(&self, pid: PartitionId) -> Result<Vec<(String, Vec<u8>)>> {
        let region = self.ready(pid)?;

        // Written copies win over unconfirmed (PreDelete) ones
        let mut found: Vec<(RecordMeta, bool)> = Vec::new();
        self.for_each_sector(region, SectorFilter::Occupied, |store, sector| {
            store.for_each_record(region, sector, true, |_, record| {
                if record.is_live() {
                    let written = record.status() == RecordStatus::Written;
                    match found.iter_mut().find(|(r, _)| r.name == record.name) {
                        Some(slot) if written || !slot.1 => *slot = (record.clone(), written),
                        Some(_) => {}
                        None => found.push((record.clone(), written)),
                    }
                }
                Ok(Visit::Continue)
            })?;
            Ok(Visit::Continue)
        })?;

        found
            .into_iter()
            .map(|(record, _)| Ok((record.name_lossy(), self.read_value(&record)?)))
            .collect()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// The flash device
    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// The flash device, mutably (for fault injection in tests)
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give the flash device back
    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the derived on-flash layout
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    // =========================================================================
    // Partition Registry
    // =========================================================================

    pub(crate) fn register(
        &mut self,
        partition: Partition,
        first_record_offset: u32,
        bootstrap: bool,
    ) -> PartitionId {
        let region = Region {
            base: partition.base,
            len: partition.len,
            sector_size: self.config.sector_size,
            first_record_offset,
        };
        self.partitions.push(PartitionState {
            partition,
            region,
            generation: self.generation,
            gc_request: false,
            collecting: false,
            ready: false,
            bootstrap,
        });
        self.id_at(self.partitions.len() - 1)
    }

    fn id_at(&self, index: usize) -> PartitionId {
        PartitionId {
            index,
            generation: self.partitions[index].generation,
        }
    }

    /// The registered bootstrap partition, if any
    pub(crate) fn bootstrap_id(&self) -> Option<PartitionId> {
        self.partitions
            .iter()
            .position(|p| p.bootstrap && p.ready)
            .map(|index| self.id_at(index))
    }

    pub(crate) fn recover_or_fail(&mut self, pid: PartitionId) -> Result<RecoveryReport> {
        match self.recover(pid) {
            Ok(report) => Ok(report),
            Err(err @ NorKvError::StoreInitFailed(_)) => Err(err),
            Err(err) => Err(NorKvError::StoreInitFailed(format!(
                "partition {:?}: {}",
                self.partitions[pid.index].partition.name, err
            ))),
        }
    }

    fn state(&self, pid: PartitionId) -> Result<&PartitionState> {
        self.partitions
            .get(pid.index)
            .filter(|state| state.generation == pid.generation)
            .ok_or(NorKvError::StoreNotInitialized)
    }

    /// Region of a partition that finished recovery
    fn ready(&self, pid: PartitionId) -> Result<Region> {
        let state = self.state(pid)?;
        if !state.ready {
            return Err(NorKvError::StoreNotInitialized);
        }
        Ok(state.region)
    }

    fn partition_name(&self, pid: PartitionId) -> &str {
        &self.partitions[pid.index].partition.name
    }

    /// Whether the allocator may dip into reserved sectors
    fn gc_pending(&self, pid: PartitionId) -> bool {
        let state = &self.partitions[pid.index];
        state.gc_request || state.collecting
    }

    // =========================================================================
    // Flash Access
    // =========================================================================

    fn read_raw(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        self.flash
            .read(addr, buf)
            .map_err(|source| NorKvError::FlashRead { addr, source })
    }

    fn write_raw(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        self.flash
            .write(addr, data)
            .map_err(|source| NorKvError::FlashWrite { addr, source })
    }

    /// Advance a status table at `table_addr` to `state`.
    ///
    /// States only move forward; callers never pass a state lower than the
    /// one on flash.
    fn advance_status<S: Status>(&mut self, table_addr: u32, state: S) -> Result<()> {
        match status::advance_write(self.layout.granularity, S::STATES, state.index()) {
            Some((offset, bytes)) => self.write_raw(table_addr + offset as u32, &bytes),
            None => Ok(()),
        }
    }

    fn set_record_status(&mut self, addr: u32, status: RecordStatus) -> Result<()> {
        self.advance_status(addr, status)
    }

    fn set_sector_store(&mut self, sector: u32, store: SectorStore) -> Result<()> {
        debug!(sector = format_args!("{:#010x}", sector), ?store, "sector store status");
        self.advance_status(sector, store)
    }

    fn set_sector_dirty(&mut self, sector: u32, dirty: SectorDirty) -> Result<()> {
        debug!(sector = format_args!("{:#010x}", sector), ?dirty, "sector dirty status");
        self.advance_status(sector + self.layout.dirty_table_offset(), dirty)
    }

    /// Erase a sector and write a fresh `Empty`/`Clean` header
    fn format_sector(&mut self, sector: u32) -> Result<()> {
        self.flash
            .erase(sector, self.config.sector_size)
            .map_err(|source| NorKvError::FlashErase {
                addr: sector,
                source,
            })?;
        let header = SectorHeader::formatted(self.layout.magic_for(sector));
        for (offset, bytes) in header.format_writes(&self.layout) {
            self.write_raw(sector + offset, &bytes)?;
        }
        debug!(sector = format_args!("{:#010x}", sector), "sector formatted");
        Ok(())
    }

    // =========================================================================
    // Record Helpers
    // =========================================================================

    /// Find the current copy of a record
    ///
    /// The last `Written` copy in address order wins. If there is none, a
    /// `PreDelete` copy (superseded by a write that never completed) is
    /// returned instead.
    fn find_record(&self, region: Region, name: &[u8]) -> Result<Option<RecordMeta>> {
        let mut written = None;
        let mut pending = None;
        self.for_each_sector(region, SectorFilter::Occupied, |store, sector| {
            store.for_each_record(region, sector, true, |_, record| {
                if record.crc_ok && record.name == name {
                    match record.status() {
                        RecordStatus::Written => written = Some(record.clone()),
                        RecordStatus::PreDelete => pending = Some(record.clone()),
                        _ => {}
                    }
                }
                Ok(Visit::Continue)
            })?;
            Ok(Visit::Continue)
        })?;
        Ok(written.or(pending))
    }

    /// Whether a committed copy of `name` exists anywhere but `except`
    fn has_written_copy(&self, region: Region, name: &[u8], except: u32) -> Result<bool> {
        let mut found = false;
        self.for_each_sector(region, SectorFilter::Occupied, |store, sector| {
            store.for_each_record(region, sector, true, |_, record| {
                found = record.addr != except
                    && record.crc_ok
                    && record.status() == RecordStatus::Written
                    && record.name == name;
                Ok(if found { Visit::Stop } else { Visit::Continue })
            })?;
            Ok(if found { Visit::Stop } else { Visit::Continue })
        })?;
        Ok(found)
    }

    fn read_value(&self, record: &RecordMeta) -> Result<Vec<u8>> {
        let mut value = vec![0u8; record.header.value_len as usize];
        self.read_raw(record.value_addr(&self.layout), &mut value)?;
        Ok(value)
    }

    /// Compare a stored value against `value` without loading it whole
    fn value_equals(&self, record: &RecordMeta, value: &[u8]) -> Result<bool> {
        let mut addr = record.value_addr(&self.layout);
        let mut buf = vec![0u8; self.layout.crc_chunk_size];
        for chunk in value.chunks(self.layout.crc_chunk_size) {
            let stored = &mut buf[..chunk.len()];
            self.read_raw(addr, stored)?;
            if stored != chunk {
                return Ok(false);
            }
            addr += chunk.len() as u32;
        }
        Ok(true)
    }

    /// Write a record at `addr` and commit it
    ///
    /// The header goes first with status `PreWrite` and final lengths and
    /// checksum, then the padded name and value, then the `Written` status.
    /// A power cut anywhere before the last step leaves a `PreWrite` record
    /// that recovery discards.
    fn commit_record(
        &mut self,
        pid: PartitionId,
        region: Region,
        addr: u32,
        mut header: RecordHeader,
        padded_name: &[u8],
        padded_value: &[u8],
    ) -> Result<()> {
        let sector = region.sector_of(addr);
        if let SectorCheck::Valid(h) = self.read_sector_header(sector)? {
            if h.store == SectorStore::Empty {
                self.set_sector_store(sector, SectorStore::Using)?;
            }
        }

        header.status = RecordStatus::PreWrite;
        self.write_raw(addr, &header.encode(&self.layout))?;

        let name_addr = addr + self.layout.record_header_len;
        if !padded_name.is_empty() {
            self.write_raw(name_addr, padded_name)?;
        }
        if !padded_value.is_empty() {
            self.write_raw(name_addr + padded_name.len() as u32, padded_value)?;
        }

        self.set_record_status(addr, RecordStatus::Written)?;
        self.update_fill(pid, region, sector)
    }

    /// Mark a superseded record `Deleted` and its sector dirty
    fn retire_record(&mut self, region: Region, record: &RecordMeta) -> Result<()> {
        self.set_record_status(record.addr, RecordStatus::Deleted)?;
        self.mark_dirty(region.sector_of(record.addr))
    }

    fn mark_dirty(&mut self, sector: u32) -> Result<()> {
        if let SectorCheck::Valid(h) = self.read_sector_header(sector)? {
            if h.dirty == SectorDirty::Clean {
                self.set_sector_dirty(sector, SectorDirty::Dirty)?;
            }
        }
        Ok(())
    }

    /// Mark a sector full once it crossed the threshold, requesting GC
    fn update_fill(&mut self, pid: PartitionId, region: Region, sector: u32) -> Result<()> {
        let Some(meta) = self.load_sector(region, sector)? else {
            return Ok(());
        };
        if meta.store == SectorStore::Using && meta.remaining < self.layout.full_threshold {
            self.set_sector_store(sector, SectorStore::Full)?;
            self.partitions[pid.index].gc_request = true;
        }
        Ok(())
    }
}

fn check_name(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(NorKvError::EmptyName);
    }
    if key.len() > NAME_MAX {
        return Err(NorKvError::NameTooLong { len: key.len() });
    }
    Ok(())
}
