//! Storage layer error types
//!
//! Defines all errors that can occur while encoding, persisting and reading
//! index blocks and event records.

use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed (open, append, map)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Data corruption detected (checksum mismatch, invalid magic, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Index block format error
    #[error("Invalid index block: {0}")]
    InvalidBlock(String),

    /// A delta does not fit the codec's field width
    #[error("Codec overflow: delta {delta} does not fit in {bits} bits")]
    CodecOverflow { delta: i64, bits: u32 },

    /// Encoded sequence is truncated or malformed
    #[error("Codec error: {0}")]
    Codec(String),

    /// Raw row could not be parsed against the schema
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// Schema definition or lookup error
    #[error("Schema error: {0}")]
    Schema(String),

    /// Record store addressing error
    #[error("Record store error: {0}")]
    RecordStore(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
