//! Storage layer error types.

use std::time::Duration;

use thiserror::Error;

use crate::storage::block::BlockId;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Block not found: {block} lies beyond the end of its file")]
    BlockNotFound { block: BlockId },

    #[error("Page size mismatch: expected {expected} bytes, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    #[error("Out of bounds: {len} bytes at offset {offset} exceed page size {size}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("Invalid UTF-8 string at offset {offset}")]
    InvalidUtf8 { offset: usize },

    #[error("Log record too large: requires {required} bytes but a log block holds {available}")]
    LogRecordTooLarge { required: usize, available: usize },

    #[error("Buffer pool exhausted: no buffer freed for {block} within {waited:?}")]
    BufferPoolTimeout { block: BlockId, waited: Duration },

    #[error("Buffer is not pinned (bound to {block:?})")]
    NotPinned { block: Option<BlockId> },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
