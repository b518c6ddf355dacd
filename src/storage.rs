//! Storage layer implementation for undodb.
//!
//! This module provides the foundation for persistent data storage using a block-based
//! architecture. Key components:
//!
//! - **BlockId**: Names a fixed-size region of a file, the unit of disk I/O
//! - **Page**: In-memory copy of a block with typed big-endian accessors
//! - **FileManager**: Reads, writes and appends blocks, one handle per file
//! - **LogManager**: Append-only write-ahead log packed into blocks of its own file
//! - **BufferPool**: Fixed set of pinned page frames shared by all transactions
//!
//! Every layer above (locking, recovery, transactions) reaches the disk only
//! through these types.

pub mod block;
pub mod buffer;
pub mod disk;
pub mod error;
pub mod page;
pub mod wal;

pub use block::BlockId;
pub use buffer::{Buffer, BufferPool, SharedBuffer};
pub use disk::FileManager;
pub use error::{StorageError, StorageResult};
pub use page::{Page, INT_SIZE};
pub use wal::{LogIterator, LogManager, Lsn};
