//! Write-ahead log.
//!
//! The log is a single file of blocks. Records are opaque byte strings packed
//! into each block from the end towards the front:
//!
//! ```text
//! offset 0          boundary                                  block size
//! +----------------+-----------+----------------+--------------+
//! | boundary (i64) |  (free)   | newest record  | ... oldest   |
//! +----------------+-----------+----------------+--------------+
//! ```
//!
//! Each record is stored as an 8-byte length followed by its bytes. Reading
//! forward from the boundary therefore yields records newest first, which is
//! the order undo-based recovery wants.

pub mod iterator;
pub mod lsn;
pub mod manager;

pub use iterator::LogIterator;
pub use lsn::Lsn;
pub use manager::LogManager;
