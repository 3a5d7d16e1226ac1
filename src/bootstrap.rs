//! Partition table discovery
//!
//! The bootstrap region is an ordinary store partition holding one record
//! per user partition: the partition name maps to a bincode-encoded
//! [`PartitionEntry`]. Its records start at a fixed offset in each sector
//! so the table can be found without knowing the header size.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{NorKvError, Result};
use crate::flash::Flash;
use crate::format::BOOTSTRAP_RECORD_OFFSET;
use crate::partition::{validate_partition, Partition, PartitionId, PartitionTable};
use crate::store::{RecoveryReport, Store};

/// Registry name of the bootstrap partition; never returned by lookups
const BOOTSTRAP_NAME: &str = "<bootstrap>";

/// Location of a partition as stored in the bootstrap table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionEntry {
    pub base: u32,
    pub len: u32,
}

impl<F: Flash> Store<F> {
    /// Read the partition table from the bootstrap region and initialize
    /// every partition it lists.
    pub fn discover(&mut self) -> Result<(PartitionTable, Vec<RecoveryReport>)> {
        let id = self.bootstrap()?;
        let table = self.bootstrap_table(id)?;
        info!(partitions = table.len(), "partition table loaded");

        let reports = self.init(&table)?;
        Ok((table, reports))
    }

    /// Add a partition to the bootstrap table, then register and recover it
    pub fn register_partition(&mut self, partition: Partition) -> Result<PartitionId> {
        let id = self.bootstrap()?;
        let mut table = self.bootstrap_table(id)?;
        table.push(partition.clone());
        table.validate(self.config(), self.flash().capacity())?;

        let entry = PartitionEntry {
            base: partition.base,
            len: partition.len,
        };
        self.set(id, &partition.name, &bincode::serialize(&entry)?)?;
        info!(
            partition = %partition.name,
            base = format_args!("{:#010x}", partition.base),
            len = partition.len,
            "partition registered"
        );

        let pid = self.register(partition, self.layout().sector_header_len, false);
        self.recover_or_fail(pid)?;
        Ok(pid)
    }

    /// Entries of the bootstrap table
    pub fn partition_table(&mut self) -> Result<PartitionTable> {
        let id = self.bootstrap()?;
        self.bootstrap_table(id)
    }

    /// Handle of the recovered bootstrap partition, registering it first
    fn bootstrap(&mut self) -> Result<PartitionId> {
        if let Some(id) = self.bootstrap_id() {
            return Ok(id);
        }

        let region = self
            .config()
            .bootstrap
            .ok_or_else(|| NorKvError::Config("no bootstrap region configured".to_string()))?;
        let partition = Partition::new(BOOTSTRAP_NAME, region.base, region.len);
        validate_partition(&partition, self.config(), self.flash().capacity())?;

        let id = self.register(partition, BOOTSTRAP_RECORD_OFFSET, true);
        self.recover_or_fail(id)?;
        Ok(id)
    }

    fn bootstrap_table(&self, id: PartitionId) -> Result<PartitionTable> {
        self.entries(id)?
            .into_iter()
            .map(|(name, bytes)| {
                let entry: PartitionEntry = bincode::deserialize(&bytes)?;
                Ok(Partition::new(name, entry.base, entry.len))
            })
            .collect()
    }
}
