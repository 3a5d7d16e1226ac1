//! Flash Module
//!
//! The raw NOR flash primitives the store is built on.
//!
//! ## NOR Semantics
//! - Erased flash reads as `0xFF`
//! - Programming can only clear bits (1 → 0)
//! - Setting a bit back to 1 requires erasing its whole sector
//!
//! ## Implementations
//! - [`SimFlash`]: in-memory device with power-cut injection, used by tests
//! - [`FileFlash`]: a flash image file, used by the CLI

mod file;
mod sim;

use thiserror::Error;

pub use file::FileFlash;
pub use sim::{SimFlash, SimOptions};

/// Errors reported by a flash device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlashError {
    /// Access outside the device
    #[error("range {addr:#010x}+{len} is out of bounds")]
    OutOfBounds { addr: u32, len: usize },

    /// Access not aligned to the write granularity or erase unit
    #[error("range {addr:#010x}+{len} is not aligned")]
    NotAligned { addr: u32, len: usize },

    /// A program operation tried to flip a bit from 0 to 1
    #[error("byte at {addr:#010x} must be erased before it can be written")]
    NotErased { addr: u32 },

    /// Power was lost while the operation was running
    #[error("power lost")]
    PowerLoss,

    /// Device specific failure
    #[error("device error: {0}")]
    Device(String),
}

pub type FlashResult<T> = std::result::Result<T, FlashError>;

/// Abstracts a NOR flash device
///
/// Addresses are absolute byte offsets into the device. The store only ever
/// erases exactly one sector at a time, and only writes ranges aligned to the
/// configured write granularity.
pub trait Flash {
    /// Size of the erase unit in bytes
    fn sector_size(&self) -> u32;

    /// Total device size in bytes
    fn capacity(&self) -> u32;

    /// Reads `buf.len()` bytes starting at `addr`
    fn read(&self, addr: u32, buf: &mut [u8]) -> FlashResult<()>;

    /// Programs `data` starting at `addr`
    fn write(&mut self, addr: u32, data: &[u8]) -> FlashResult<()>;

    /// Erases `len` bytes starting at `addr`, which must be one sector
    fn erase(&mut self, addr: u32, len: u32) -> FlashResult<()>;
}

impl<F: Flash + ?Sized> Flash for &mut F {
    fn sector_size(&self) -> u32 {
        (**self).sector_size()
    }

    fn capacity(&self) -> u32 {
        (**self).capacity()
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> FlashResult<()> {
        (**self).read(addr, buf)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> FlashResult<()> {
        (**self).write(addr, data)
    }

    fn erase(&mut self, addr: u32, len: u32) -> FlashResult<()> {
        (**self).erase(addr, len)
    }
}

/// Returns the device byte range of an access, if it fits the device.
pub(crate) fn checked_range(
    capacity: u32,
    addr: u32,
    len: usize,
) -> FlashResult<std::ops::Range<usize>> {
    let start = addr as usize;
    match start.checked_add(len) {
        Some(end) if end <= capacity as usize => Ok(start..end),
        _ => Err(FlashError::OutOfBounds { addr, len }),
    }
}
