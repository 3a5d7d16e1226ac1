//! Configuration for norkv
//!
//! Centralized configuration with sensible defaults. The geometry values
//! (sector size, write granularity) must match the flash device the store
//! is opened on; everything else tunes the allocator, collector and recovery.

use crate::error::{NorKvError, Result};
use crate::format::{Layout, BOOTSTRAP_RECORD_OFFSET};

/// Main configuration for a norkv store
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Flash Geometry
    // -------------------------------------------------------------------------
    /// Erase unit in bytes. Every partition is a whole number of sectors.
    pub sector_size: u32,

    /// Smallest unit the flash can program in one operation
    pub write_granularity: WriteGranularity,

    // -------------------------------------------------------------------------
    // Allocation / GC Configuration
    // -------------------------------------------------------------------------
    /// Number of empty sectors the allocator keeps back for compaction
    pub reserved_empty_sectors: usize,

    /// A sector whose free space drops below this is marked full.
    /// `None` means record header size + maximum name length.
    pub full_threshold: Option<u32>,

    // -------------------------------------------------------------------------
    // Integrity / Recovery Configuration
    // -------------------------------------------------------------------------
    /// Chunk size used when streaming record payloads through CRC32
    pub crc_chunk_size: usize,

    /// Upper bound on GC passes recovery may run before giving up
    pub max_recovery_passes: usize,

    // -------------------------------------------------------------------------
    // Bootstrap Configuration
    // -------------------------------------------------------------------------
    /// Reserved region holding the partition table, if any
    pub bootstrap: Option<BootstrapRegion>,
}

/// Flash write granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGranularity {
    /// Single bits can be programmed
    Bit1,

    /// Bytes
    Bit8,

    /// 32-bit words
    Bit32,

    /// 64-bit double words
    Bit64,
}

impl WriteGranularity {
    /// Granularity in bits
    pub fn bits(self) -> u32 {
        match self {
            WriteGranularity::Bit1 => 1,
            WriteGranularity::Bit8 => 8,
            WriteGranularity::Bit32 => 32,
            WriteGranularity::Bit64 => 64,
        }
    }

    /// Alignment in bytes every write must respect
    pub fn align_bytes(self) -> u32 {
        (self.bits() + 7) / 8
    }

    /// Parse from a bit count (1, 8, 32 or 64)
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            1 => Some(WriteGranularity::Bit1),
            8 => Some(WriteGranularity::Bit8),
            32 => Some(WriteGranularity::Bit32),
            64 => Some(WriteGranularity::Bit64),
            _ => None,
        }
    }
}

/// Location of the bootstrap partition table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapRegion {
    pub base: u32,
    pub len: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sector_size: 4096,
            write_granularity: WriteGranularity::Bit8,
            reserved_empty_sectors: 1,
            full_threshold: None,
            crc_chunk_size: 32,
            max_recovery_passes: 8,
            bootstrap: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the configuration for values the store cannot work with
    pub fn validate(&self) -> Result<()> {
        let align = self.write_granularity.align_bytes();
        if self.sector_size == 0 || self.sector_size % align != 0 {
            return Err(NorKvError::Config(format!(
                "sector size {} is not a multiple of the write alignment {}",
                self.sector_size, align
            )));
        }
        if self.crc_chunk_size == 0 {
            return Err(NorKvError::Config("crc chunk size must be non-zero".to_string()));
        }
        if self.max_recovery_passes == 0 {
            return Err(NorKvError::Config(
                "max recovery passes must be non-zero".to_string(),
            ));
        }

        // A sector must hold its header and at least one smallest record
        let layout = Layout::new(self);
        let first_record = match self.bootstrap {
            Some(_) => BOOTSTRAP_RECORD_OFFSET.max(layout.sector_header_len),
            None => layout.sector_header_len,
        };
        let smallest =
            first_record as u64 + layout.record_header_len as u64 + layout.align(1) as u64;
        if smallest >= self.sector_size as u64 {
            return Err(NorKvError::Config(format!(
                "sector size {} cannot hold a {}-byte header and a {}-byte record",
                self.sector_size,
                first_record,
                smallest - first_record as u64
            )));
        }

        if let Some(region) = self.bootstrap {
            if region.len == 0
                || region.base % self.sector_size != 0
                || region.len % self.sector_size != 0
            {
                return Err(NorKvError::Config(format!(
                    "bootstrap region {:#x}+{:#x} is not sector aligned",
                    region.base, region.len
                )));
            }
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the sector (erase unit) size in bytes
    pub fn sector_size(mut self, size: u32) -> Self {
        self.config.sector_size = size;
        self
    }

    /// Set the flash write granularity
    pub fn write_granularity(mut self, granularity: WriteGranularity) -> Self {
        self.config.write_granularity = granularity;
        self
    }

    /// Set the number of empty sectors reserved for GC
    pub fn reserved_empty_sectors(mut self, count: usize) -> Self {
        self.config.reserved_empty_sectors = count;
        self
    }

    /// Set the free-space threshold below which a sector is full
    pub fn full_threshold(mut self, bytes: u32) -> Self {
        self.config.full_threshold = Some(bytes);
        self
    }

    /// Set the CRC streaming chunk size
    pub fn crc_chunk_size(mut self, size: usize) -> Self {
        self.config.crc_chunk_size = size;
        self
    }

    /// Set the recovery GC pass bound
    pub fn max_recovery_passes(mut self, passes: usize) -> Self {
        self.config.max_recovery_passes = passes;
        self
    }

    /// Reserve a bootstrap region for the partition table
    pub fn bootstrap(mut self, base: u32, len: u32) -> Self {
        self.config.bootstrap = Some(BootstrapRegion { base, len });
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
