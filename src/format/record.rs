//! Record header encoding and checksums.

use crc32fast::Hasher;

use super::status::{self, RecordStatus, Status};
use super::{read_u32, Layout, NAME_MAX};

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub status: RecordStatus,

    /// Header + aligned name + aligned value
    pub total_len: u32,

    /// CRC32 over name length, value length, padded name and padded value
    pub crc32: u32,

    pub name_len: u8,
    pub value_len: u32,
}

impl RecordHeader {
    /// Encodes the full, padded header
    pub fn encode(&self, layout: &Layout) -> Vec<u8> {
        let mut bytes = status::encode(
            layout.granularity,
            RecordStatus::STATES,
            self.status.index(),
        );
        bytes.extend_from_slice(&self.total_len.to_le_bytes());
        bytes.extend_from_slice(&self.crc32.to_le_bytes());
        bytes.push(self.name_len);
        bytes.extend_from_slice(&self.value_len.to_le_bytes());
        bytes.resize(layout.record_header_len as usize, 0xff);
        bytes
    }

    pub fn decode(layout: &Layout, bytes: &[u8]) -> Self {
        let fields = layout.record_fields_offset() as usize;
        Self {
            status: RecordStatus::from_index(status::decode(
                layout.granularity,
                &bytes[..fields],
                RecordStatus::STATES,
            )),
            total_len: read_u32(bytes, fields),
            crc32: read_u32(bytes, fields + 4),
            name_len: bytes[fields + 8],
            value_len: read_u32(bytes, fields + 9),
        }
    }
}

/// A record as found on flash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    /// Start address of the header
    pub addr: u32,

    pub header: RecordHeader,

    /// Whether the payload matched the stored checksum
    pub crc_ok: bool,

    /// The length field was unusable; the record is skipped as a bare
    /// header and reads as `HeaderError` whatever its stored status
    pub stub: bool,

    /// Name bytes, empty unless the checksum was verified
    pub name: Vec<u8>,
}

impl RecordMeta {
    /// Effective status. `header.status` keeps what is on flash.
    pub fn status(&self) -> RecordStatus {
        if self.stub {
            RecordStatus::HeaderError
        } else {
            self.header.status
        }
    }

    pub fn total_len(&self) -> u32 {
        self.header.total_len
    }

    pub fn name_addr(&self, layout: &Layout) -> u32 {
        self.addr + layout.record_header_len
    }

    pub fn value_addr(&self, layout: &Layout) -> u32 {
        self.name_addr(layout) + layout.align(self.header.name_len as u32)
    }

    /// Holds a value that must survive: committed, or superseded but not yet
    /// confirmed deleted.
    pub fn is_live(&self) -> bool {
        self.crc_ok && matches!(self.status(), RecordStatus::Written | RecordStatus::PreDelete)
    }

    /// Whether the length fields agree with each other
    pub fn lengths_consistent(&self, layout: &Layout) -> bool {
        let h = &self.header;
        (h.name_len as usize) <= NAME_MAX
            && layout.record_len(h.name_len as usize, h.value_len as usize) == Some(h.total_len)
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

/// Incremental record checksum
pub struct RecordCrc {
    hasher: Hasher,
}

impl RecordCrc {
    /// Starts a checksum, covering the length fields first
    pub fn new(name_len: u8, value_len: u32) -> Self {
        let mut hasher = Hasher::new();
        hasher.update(&[name_len]);
        hasher.update(&value_len.to_le_bytes());
        Self { hasher }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
    }

    pub fn finish(self) -> u32 {
        self.hasher.finalize()
    }

    /// Checksum of an in-memory name/value pair, padded the way it is stored
    pub fn of(layout: &Layout, name: &[u8], value: &[u8]) -> u32 {
        let mut crc = RecordCrc::new(name.len() as u8, value.len() as u32);
        let padded_name = layout.padded(name);
        let padded_value = layout.padded(value);
        for chunk in padded_name.chunks(layout.crc_chunk_size) {
            crc.update(chunk);
        }
        for chunk in padded_value.chunks(layout.crc_chunk_size) {
            crc.update(chunk);
        }
        crc.finish()
    }
}
