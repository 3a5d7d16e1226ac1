//! Shared store access.
//!
//! The engine does no locking of its own. [`SharedStore`] is the one
//! coarse lock around it: every operation holds the mutex for its whole
//! duration, including any GC pass it triggers.

use parking_lot::{Mutex, MutexGuard};

use crate::error::Result;
use crate::flash::Flash;
use crate::partition::PartitionId;
use crate::store::{GcReport, SectorStats, Store};

/// A store behind a `parking_lot::Mutex`, usable from several threads
pub struct SharedStore<F: Flash> {
    inner: Mutex<Store<F>>,
}

impl<F: Flash> SharedStore<F> {
    pub fn new(store: Store<F>) -> Self {
        Self {
            inner: Mutex::new(store),
        }
    }

    pub fn partition(&self, name: &str) -> Result<PartitionId> {
        self.inner.lock().partition(name)
    }

    pub fn get(&self, pid: PartitionId, key: &str) -> Result<Option<Vec<u8>>> {
        self.inner.lock().get(pid, key)
    }

    pub fn set(&self, pid: PartitionId, key: &str, value: &[u8]) -> Result<()> {
        self.inner.lock().set(pid, key, value)
    }

    pub fn delete(&self, pid: PartitionId, key: &str) -> Result<()> {
        self.inner.lock().delete(pid, key)
    }

    pub fn gc_collect(&self, pid: PartitionId) -> Result<GcReport> {
        self.inner.lock().gc_collect(pid)
    }

    pub fn stats(&self, pid: PartitionId) -> Result<SectorStats> {
        self.inner.lock().stats(pid)
    }

    /// Hold the lock across several operations
    pub fn lock(&self) -> MutexGuard<'_, Store<F>> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> Store<F> {
        self.inner.into_inner()
    }
}
