//! Partitions
//!
//! A partition is a named, sector-aligned byte range of the flash that is
//! managed as one independent store. Partitions are registered once in
//! [`Store::init`](crate::Store::init) and addressed afterwards through a
//! [`PartitionId`] handle.

use crate::config::Config;
use crate::error::{NorKvError, Result};

/// Longest partition name in bytes
pub const PARTITION_NAME_MAX: usize = 16;

/// Handle to a registered partition
///
/// Handles belong to the `init` that registered them. Once the store is
/// initialized again they are rejected with `StoreNotInitialized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionId {
    pub(crate) index: usize,
    pub(crate) generation: u32,
}

/// A named flash range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    pub base: u32,
    pub len: u32,
}

impl Partition {
    pub fn new(name: impl Into<String>, base: u32, len: u32) -> Self {
        Self {
            name: name.into(),
            base,
            len,
        }
    }

    pub fn end(&self) -> u64 {
        self.base as u64 + self.len as u64
    }

    fn overlaps(&self, base: u32, len: u32) -> bool {
        (self.base as u64) < base as u64 + len as u64 && (base as u64) < self.end()
    }
}

/// Set of partitions handed to [`Store::init`](crate::Store::init)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a partition (builder style)
    pub fn with(mut self, name: impl Into<String>, base: u32, len: u32) -> Self {
        self.push(Partition::new(name, base, len));
        self
    }

    pub fn push(&mut self, partition: Partition) {
        self.partitions.push(partition);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    pub fn get(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Checks names, alignment, bounds and overlaps
    pub fn validate(&self, config: &Config, capacity: u32) -> Result<()> {
        for (i, p) in self.partitions.iter().enumerate() {
            validate_partition(p, config, capacity)?;
            if self.partitions[..i].iter().any(|q| q.name == p.name) {
                return Err(NorKvError::InvalidPartition(format!(
                    "duplicate partition name {:?}",
                    p.name
                )));
            }
            if let Some(q) = self.partitions[..i].iter().find(|q| q.overlaps(p.base, p.len)) {
                return Err(NorKvError::InvalidPartition(format!(
                    "partition {:?} overlaps {:?}",
                    p.name, q.name
                )));
            }
            if let Some(region) = config.bootstrap {
                if p.overlaps(region.base, region.len) {
                    return Err(NorKvError::InvalidPartition(format!(
                        "partition {:?} overlaps the bootstrap region",
                        p.name
                    )));
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<Partition> for PartitionTable {
    fn from_iter<I: IntoIterator<Item = Partition>>(iter: I) -> Self {
        Self {
            partitions: iter.into_iter().collect(),
        }
    }
}

pub(crate) fn validate_partition(p: &Partition, config: &Config, capacity: u32) -> Result<()> {
    let invalid = |why: &str| Err(NorKvError::InvalidPartition(format!("{:?}: {}", p.name, why)));
    if p.name.is_empty() {
        return invalid("empty name");
    }
    if p.name.len() > PARTITION_NAME_MAX {
        return invalid("name longer than 16 bytes");
    }
    if p.len == 0 || p.base % config.sector_size != 0 || p.len % config.sector_size != 0 {
        return invalid("not aligned to the sector size");
    }
    if p.end() > capacity as u64 {
        return invalid("extends past the end of the flash");
    }
    if (p.len / config.sector_size) as usize <= config.reserved_empty_sectors {
        return invalid("needs more sectors than the GC reserve");
    }
    Ok(())
}

// =============================================================================
// Region Arithmetic
// =============================================================================

/// Address range of a registered partition, as the engine walks it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Region {
    pub base: u32,
    pub len: u32,
    pub sector_size: u32,

    /// Offset of the first record from the start of each sector
    pub first_record_offset: u32,
}

impl Region {
    pub fn end(&self) -> u32 {
        self.base + self.len
    }

    pub fn sector_count(&self) -> u32 {
        self.len / self.sector_size
    }

    /// Start of the sector holding `addr`
    pub fn sector_of(&self, addr: u32) -> u32 {
        self.base + (addr - self.base) / self.sector_size * self.sector_size
    }

    pub fn first_record(&self, sector: u32) -> u32 {
        sector + self.first_record_offset
    }

    /// Space available to records in an empty sector
    pub fn sector_capacity(&self) -> u32 {
        self.sector_size - self.first_record_offset
    }
}
