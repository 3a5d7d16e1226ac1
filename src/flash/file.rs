//! Flash image file.
//!
//! Backs a [`Flash`] with a regular file so a device image can be inspected
//! and edited offline. Writes follow NOR semantics (bits only clear) and are
//! persisted immediately.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::info;

use super::{checked_range, Flash, FlashError, FlashResult};
use crate::error::Result;
use crate::NorKvError;

/// A flash device stored in a file
pub struct FileFlash {
    file: File,

    /// Mirror of the file content
    image: Vec<u8>,

    sector_size: u32,
}

impl FileFlash {
    /// Open an image file, creating an erased one of `capacity` bytes if it
    /// does not exist yet.
    pub fn open(path: &Path, sector_size: u32, capacity: u32) -> Result<Self> {
        if sector_size == 0 || capacity % sector_size != 0 {
            return Err(NorKvError::Config(format!(
                "capacity {} is not a multiple of sector size {}",
                capacity, sector_size
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut image = Vec::new();
        file.read_to_end(&mut image)?;

        if image.is_empty() {
            image = vec![0xff; capacity as usize];
            file.write_all(&image)?;
            file.sync_all()?;
            info!(path = %path.display(), capacity, "created erased flash image");
        } else if image.len() != capacity as usize {
            return Err(NorKvError::Config(format!(
                "image {} is {} bytes, expected {}",
                path.display(),
                image.len(),
                capacity
            )));
        }

        Ok(Self {
            file,
            image,
            sector_size,
        })
    }

    fn persist(&mut self, range: std::ops::Range<usize>) -> FlashResult<()> {
        let io = |e: std::io::Error| FlashError::Device(e.to_string());
        self.file.seek(SeekFrom::Start(range.start as u64)).map_err(io)?;
        self.file.write_all(&self.image[range]).map_err(io)?;
        self.file.sync_data().map_err(io)
    }
}

impl Flash for FileFlash {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn capacity(&self) -> u32 {
        self.image.len() as u32
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> FlashResult<()> {
        let range = checked_range(self.capacity(), addr, buf.len())?;
        buf.copy_from_slice(&self.image[range]);
        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> FlashResult<()> {
        let range = checked_range(self.capacity(), addr, data.len())?;
        for (byte, &new) in self.image[range.clone()].iter_mut().zip(data) {
            *byte &= new;
        }
        self.persist(range)
    }

    fn erase(&mut self, addr: u32, len: u32) -> FlashResult<()> {
        if addr % self.sector_size != 0 || len != self.sector_size {
            return Err(FlashError::NotAligned {
                addr,
                len: len as usize,
            });
        }
        let range = checked_range(self.capacity(), addr, len as usize)?;
        self.image[range.clone()].fill(0xff);
        self.persist(range)
    }
}
