//! Simulated NOR flash.
//!
//! [`SimFlash`] keeps the device content in memory. It checks the NOR
//! programming rules, counts operations, and can cut the power in the middle
//! of a write to exercise crash recovery.

use super::{checked_range, Flash, FlashError, FlashResult};
use crate::config::WriteGranularity;

/// Geometry and checking options of a simulated device
#[derive(Debug, Clone, Copy)]
pub struct SimOptions {
    /// Erase unit in bytes
    pub sector_size: u32,

    /// Number of sectors in the device
    pub sectors: u32,

    /// Alignment enforced on writes
    pub granularity: WriteGranularity,

    /// Reject writes that would flip a bit from 0 to 1
    pub strict: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            sector_size: 4096,
            sectors: 2,
            granularity: WriteGranularity::Bit8,
            strict: true,
        }
    }
}

/// In-memory NOR flash
#[derive(Clone)]
pub struct SimFlash {
    /// Content of the device
    data: Vec<u8>,

    options: SimOptions,

    /// Number of successful or interrupted write operations
    writes: usize,

    /// Number of bytes programmed
    bytes_written: usize,

    /// Erase count of each sector
    erases: Vec<usize>,

    power: Power,
}

/// Power-cut state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Power {
    /// Operations behave normally
    On,

    /// The next `budget` bytes (or erases) go through, then power is cut
    Armed { budget: usize },

    /// Power was cut, every mutation fails until the next power cycle
    Off,
}

impl SimFlash {
    /// Creates an erased device
    ///
    /// # Panics
    ///
    /// Panics if the sector size is not a multiple of the write alignment.
    pub fn new(options: SimOptions) -> Self {
        assert!(options.sector_size % options.granularity.align_bytes() == 0);
        let len = options.sector_size as usize * options.sectors as usize;
        Self {
            data: vec![0xff; len],
            options,
            writes: 0,
            bytes_written: 0,
            erases: vec![0; options.sectors as usize],
            power: Power::On,
        }
    }

    /// Lets `budget` more bytes be programmed, then cuts the power.
    ///
    /// The write crossing the budget only programs its leading bytes and
    /// fails with [`FlashError::PowerLoss`]. An erase consumes one unit of
    /// budget and either happens completely or not at all.
    pub fn arm_power_cut(&mut self, budget: usize) {
        self.power = Power::Armed { budget };
    }

    /// Restores power. Returns whether an armed cut actually triggered.
    pub fn power_cycle(&mut self) -> bool {
        let triggered = self.power == Power::Off;
        self.power = Power::On;
        triggered
    }

    /// Whether the power is currently cut
    pub fn is_powered_off(&self) -> bool {
        self.power == Power::Off
    }

    /// Number of write operations issued so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Number of bytes programmed so far
    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Number of times the sector starting at `addr` was erased
    pub fn erase_count(&self, addr: u32) -> usize {
        self.erases[(addr / self.options.sector_size) as usize]
    }

    /// Raw device content, for inspection in tests
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Overwrites raw content without any NOR checks, for corruption tests
    pub fn corrupt(&mut self, addr: u32, bytes: &[u8]) {
        let start = addr as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
    }

    fn is_aligned(&self, x: usize) -> bool {
        x % self.options.granularity.align_bytes() as usize == 0
    }

    /// Consumes budget for an operation of `len` units.
    ///
    /// Returns how many units may be applied; fewer than `len` means the
    /// power is cut during this operation.
    fn consume(&mut self, len: usize) -> FlashResult<usize> {
        match self.power {
            Power::On => Ok(len),
            Power::Off => Err(FlashError::PowerLoss),
            Power::Armed { budget } if budget >= len => {
                self.power = Power::Armed {
                    budget: budget - len,
                };
                Ok(len)
            }
            Power::Armed { budget } => {
                self.power = Power::Off;
                Ok(budget)
            }
        }
    }
}

impl Flash for SimFlash {
    fn sector_size(&self) -> u32 {
        self.options.sector_size
    }

    fn capacity(&self) -> u32 {
        self.data.len() as u32
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> FlashResult<()> {
        let range = checked_range(self.capacity(), addr, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> FlashResult<()> {
        if !self.is_aligned(addr as usize) || !self.is_aligned(data.len()) {
            return Err(FlashError::NotAligned {
                addr,
                len: data.len(),
            });
        }
        let range = checked_range(self.capacity(), addr, data.len())?;
        if self.options.strict {
            for (offset, (&old, &new)) in self.data[range.clone()].iter().zip(data).enumerate() {
                if old & new != new {
                    return Err(FlashError::NotErased {
                        addr: addr + offset as u32,
                    });
                }
            }
        }
        let allowed = self.consume(data.len())?;
        self.writes += 1;
        self.bytes_written += allowed;
        for (byte, &new) in self.data[range].iter_mut().zip(&data[..allowed]) {
            *byte &= new;
        }
        if allowed < data.len() {
            return Err(FlashError::PowerLoss);
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> FlashResult<()> {
        if addr % self.options.sector_size != 0 || len != self.options.sector_size {
            return Err(FlashError::NotAligned {
                addr,
                len: len as usize,
            });
        }
        let range = checked_range(self.capacity(), addr, len as usize)?;
        if self.consume(1)? == 0 {
            return Err(FlashError::PowerLoss);
        }
        self.erases[(addr / self.options.sector_size) as usize] += 1;
        self.data[range].fill(0xff);
        Ok(())
    }
}
