//! # norkv
//!
//! A power-loss safe key/value record store for raw NOR flash:
//! - Append-only records with bit-clearing status tables
//! - Crash recovery of half-written and half-deleted records
//! - Sector compaction (GC) that survives interruption
//! - Several independent partitions on one device
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 SharedStore (coarse lock)                   │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   Store (per partition)                     │
//! │        get / set / delete / gc_collect / recovery           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │  Allocator  │          │  Collector  │
//!   │ (find space)│          │    (GC)     │
//!   └──────┬──────┘          └──────┬──────┘
//!          └────────────┬───────────┘
//!                       ▼
//!               ┌───────────────┐
//!               │    Format     │
//!               │ sector/record │
//!               └───────┬───────┘
//!                       ▼
//!               ┌───────────────┐
//!               │  Flash trait  │
//!               └───────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod flash;
pub mod format;
pub mod partition;
pub mod store;
pub mod bootstrap;
pub mod shared;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NorKvError, Result};
pub use config::{Config, WriteGranularity};
pub use flash::{FileFlash, Flash, FlashError, SimFlash, SimOptions};
pub use partition::{Partition, PartitionId, PartitionTable};
pub use store::{RecoveryReport, Store};
pub use bootstrap::PartitionEntry;
pub use shared::SharedStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of norkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
