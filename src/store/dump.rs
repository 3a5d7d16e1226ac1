//! Human-readable partition dumps.

use std::fmt;

use super::{SectorFilter, Store, Visit};
use crate::error::Result;
use crate::flash::Flash;
use crate::format::{RecordStatus, SectorDirty, SectorStore};
use crate::partition::PartitionId;

/// Snapshot of every sector and record in a partition
#[derive(Debug, Clone)]
pub struct Dump {
    pub partition: String,
    pub sectors: Vec<SectorSummary>,
}

#[derive(Debug, Clone)]
pub struct SectorSummary {
    pub addr: u32,
    pub store: SectorStore,
    pub dirty: SectorDirty,
    pub remaining: u32,
    pub records: Vec<RecordSummary>,
}

#[derive(Debug, Clone)]
pub struct RecordSummary {
    pub addr: u32,
    pub status: RecordStatus,
    pub total_len: u32,
    pub crc_ok: bool,
    pub name: String,
    pub value_len: u32,
}

impl<F: Flash> Store<F> {
    /// Describe the layout of a partition, records included
    pub fn dump(&self, pid: PartitionId) -> Result<Dump> {
        let region = self.ready(pid)?;
        let mut sectors = Vec::new();
        self.for_each_sector(region, SectorFilter::All, |store, sector| {
            let mut records = Vec::new();
            store.for_each_record(region, sector, true, |_, record| {
                records.push(RecordSummary {
                    addr: record.addr,
                    status: record.status(),
                    total_len: record.total_len(),
                    crc_ok: record.crc_ok,
                    name: record.name_lossy(),
                    value_len: record.header.value_len,
                });
                Ok(Visit::Continue)
            })?;
            sectors.push(SectorSummary {
                addr: sector.addr,
                store: sector.store,
                dirty: sector.dirty,
                remaining: sector.remaining,
                records,
            });
            Ok(Visit::Continue)
        })?;

        Ok(Dump {
            partition: self.partition_name(pid).to_string(),
            sectors,
        })
    }
}

impl fmt::Display for Dump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "partition {}", self.partition)?;
        for sector in &self.sectors {
            writeln!(
                f,
                "  sector {:#010x}  {:?}/{:?}  {} bytes free",
                sector.addr, sector.store, sector.dirty, sector.remaining
            )?;
            for record in &sector.records {
                let name = if record.crc_ok { record.name.as_str() } else { "?" };
                let committed = matches!(record.status, RecordStatus::Written | RecordStatus::PreDelete);
                let note = if committed && !record.crc_ok { "  crc mismatch" } else { "" };
                writeln!(
                    f,
                    "    {:#010x}  {:<12} {:>5}B  {:<32} value {}B{}",
                    record.addr,
                    record.status.to_string(),
                    record.total_len,
                    name,
                    record.value_len,
                    note
                )?;
            }
        }
        Ok(())
    }
}
