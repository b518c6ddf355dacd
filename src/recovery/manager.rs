use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;

use super::log_record::{LogRecord, LogRecordKind};
use crate::storage::{
    BlockId, Buffer, BufferPool, LogManager, Lsn, StorageError, StorageResult,
};
use crate::transaction::{Transaction, TransactionError, TransactionId};

/// Summary of one restart recovery pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records read before reaching a checkpoint or the start of the log.
    pub records_scanned: usize,
    /// Data records whose old value was restored.
    pub records_undone: usize,
    /// Distinct transactions with at least one undone record.
    pub transactions_undone: usize,
}

/// Logging and undo on behalf of one transaction.
///
/// Cheap to clone: it only holds shared handles and the transaction id.
#[derive(Clone)]
pub struct RecoveryManager {
    tx_id: TransactionId,
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPool>,
}

impl RecoveryManager {
    /// Writes the Start record for `tx_id`.
    pub fn new(
        tx_id: TransactionId,
        log_manager: Arc<LogManager>,
        buffer_pool: Arc<BufferPool>,
    ) -> StorageResult<Self> {
        LogRecord::Start { tx: tx_id }.write_to_log(&log_manager)?;
        Ok(Self {
            tx_id,
            log_manager,
            buffer_pool,
        })
    }

    /// Forces the transaction's pages to disk, then makes a Commit record durable.
    pub fn commit(&self) -> StorageResult<()> {
        self.buffer_pool.flush_all(self.tx_id)?;
        self.write_durably(LogRecord::Commit { tx: self.tx_id })
    }

    /// Undoes every change of this transaction, newest first, then makes a
    /// Rollback record durable.
    pub fn rollback(&self, tx: &mut Transaction) -> Result<(), TransactionError> {
        let mut undone = 0;
        for bytes in self.log_manager.iter()? {
            let record = LogRecord::from_bytes(&bytes?)?;
            if record.tx_id() != Some(self.tx_id) {
                continue;
            }
            if record.kind() == LogRecordKind::Start {
                break;
            }
            record.undo(tx)?;
            if matches!(record.kind(), LogRecordKind::SetInt | LogRecordKind::SetString) {
                undone += 1;
            }
        }
        debug!("{} undid {} changes", self.tx_id, undone);

        self.buffer_pool.flush_all(self.tx_id)?;
        self.write_durably(LogRecord::Rollback { tx: self.tx_id })?;
        Ok(())
    }

    /// Restart recovery: undoes every change made by a transaction with no
    /// Commit or Rollback record, scanning back to the most recent checkpoint.
    /// Ends by writing a durable checkpoint.
    pub fn recover(&self, tx: &mut Transaction) -> Result<RecoveryStats, TransactionError> {
        let mut stats = RecoveryStats::default();
        let mut finished = HashSet::new();
        let mut undone = HashSet::new();

        for bytes in self.log_manager.iter()? {
            let record = LogRecord::from_bytes(&bytes?)?;
            stats.records_scanned += 1;
            match record.kind() {
                LogRecordKind::Checkpoint => break,
                LogRecordKind::Commit | LogRecordKind::Rollback => {
                    finished.extend(record.tx_id());
                }
                LogRecordKind::SetInt | LogRecordKind::SetString => {
                    let Some(owner) = record.tx_id() else { continue };
                    if !finished.contains(&owner) {
                        record.undo(tx)?;
                        stats.records_undone += 1;
                        undone.insert(owner);
                    }
                }
                LogRecordKind::Start => {}
            }
        }
        stats.transactions_undone = undone.len();

        self.buffer_pool.flush_all(self.tx_id)?;
        self.write_durably(LogRecord::Checkpoint)?;
        info!(
            "Recovery scanned {} records, undid {} changes of {} transactions",
            stats.records_scanned, stats.records_undone, stats.transactions_undone
        );
        Ok(stats)
    }

    /// Logs the value about to be overwritten by an integer write.
    pub fn set_int(&self, buffer: &Buffer, offset: usize, new: i64) -> StorageResult<Lsn> {
        let old = buffer.page().get_int(offset)?;
        LogRecord::SetInt {
            tx: self.tx_id,
            block: Self::bound_block(buffer)?,
            offset,
            old,
            new,
        }
        .write_to_log(&self.log_manager)
    }

    /// Logs the value about to be overwritten by a string write.
    pub fn set_string(&self, buffer: &Buffer, offset: usize, new: &str) -> StorageResult<Lsn> {
        let old = buffer.page().get_string(offset)?;
        LogRecord::SetString {
            tx: self.tx_id,
            block: Self::bound_block(buffer)?,
            offset,
            old,
            new: new.to_string(),
        }
        .write_to_log(&self.log_manager)
    }

    fn bound_block(buffer: &Buffer) -> StorageResult<BlockId> {
        buffer
            .block()
            .cloned()
            .ok_or(StorageError::NotPinned { block: None })
    }

    fn write_durably(&self, record: LogRecord) -> StorageResult<()> {
        let lsn = record.write_to_log(&self.log_manager)?;
        self.log_manager.flush_lsn(lsn)
    }
}
