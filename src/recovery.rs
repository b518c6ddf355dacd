//! Recovery module.
//!
//! Undo-only logging: every change records the value it overwrote, and
//! recovery walks the log backwards restoring old values of transactions that
//! never finished. Committed data is forced to disk at commit, so nothing has
//! to be redone.
//!
//! - `LogRecord`: the closed set of records written to the log
//! - `RecoveryManager`: per-transaction logging, rollback and restart recovery

pub mod log_record;
pub mod manager;

use thiserror::Error;

use crate::storage::StorageError;

pub use log_record::{LogRecord, LogRecordKind};
pub use manager::{RecoveryManager, RecoveryStats};

/// Errors raised while decoding the log.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Unknown log record type: {0}")]
    UnknownRecordType(i64),

    #[error("Invalid transaction id in log record: {0}")]
    InvalidTransactionId(i64),

    #[error("Invalid {field} in log record: {value}")]
    InvalidField { field: &'static str, value: i64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
