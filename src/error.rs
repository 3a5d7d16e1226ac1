//! Error types for norkv
//!
//! Provides a unified error type for all store operations.

use thiserror::Error;

use crate::flash::FlashError;

/// Result type alias using NorKvError
pub type Result<T> = std::result::Result<T, NorKvError>;

/// Unified error type for norkv operations
#[derive(Debug, Error)]
pub enum NorKvError {
    // -------------------------------------------------------------------------
    // Flash Errors
    // -------------------------------------------------------------------------
    #[error("flash read failed at {addr:#010x}: {source}")]
    FlashRead { addr: u32, source: FlashError },

    #[error("flash write failed at {addr:#010x}: {source}")]
    FlashWrite { addr: u32, source: FlashError },

    #[error("flash erase failed at {addr:#010x}: {source}")]
    FlashErase { addr: u32, source: FlashError },

    // -------------------------------------------------------------------------
    // Store State Errors
    // -------------------------------------------------------------------------
    #[error("Store not initialized")]
    StoreNotInitialized,

    #[error("Store initialization failed: {0}")]
    StoreInitFailed(String),

    #[error("Store full")]
    StoreFull,

    #[error("Key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Caller Input Errors
    // -------------------------------------------------------------------------
    #[error("Record name too long: {len} bytes (max {max})", max = crate::format::NAME_MAX)]
    NameTooLong { len: usize },

    #[error("Record name is empty")]
    EmptyName,

    #[error("Value too large: {len} bytes")]
    ValueTooLarge { len: usize },

    // -------------------------------------------------------------------------
    // Partition Errors
    // -------------------------------------------------------------------------
    #[error("Unknown partition: {0}")]
    UnknownPartition(String),

    #[error("Invalid partition: {0}")]
    InvalidPartition(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // I/O and Serialization Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for NorKvError {
    fn from(err: bincode::Error) -> Self {
        NorKvError::Serialization(err.to_string())
    }
}
