//! Transaction numbering.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a transaction.
///
/// Ids are positive. In the log they are written as signed 64-bit integers,
/// where `-1` is reserved for records that belong to no transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Encoding used inside log records.
    pub fn to_log_value(self) -> i64 {
        self.0 as i64
    }

    /// Decodes a log value; negative values carry no transaction.
    pub fn from_log_value(value: i64) -> Option<Self> {
        u64::try_from(value).ok().map(Self)
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx {}", self.0)
    }
}

/// Hands out transaction ids. One generator is shared by every transaction of
/// a database; numbering starts at 1 in each process.
pub struct TransactionIdGenerator {
    next_id: AtomicU64,
}

impl TransactionIdGenerator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// A generator whose first id is `first`.
    pub fn starting_at(first: u64) -> Self {
        Self {
            next_id: AtomicU64::new(first),
        }
    }

    pub fn next(&self) -> TransactionId {
        TransactionId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The most recently issued id, or `TransactionId(0)` if none was issued.
    pub fn current(&self) -> TransactionId {
        let id = self.next_id.load(Ordering::SeqCst);
        TransactionId::new(id.saturating_sub(1))
    }
}

impl Default for TransactionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
