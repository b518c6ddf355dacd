//! The transaction handle.

use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;

use super::buffer_list::BufferList;
use super::id::{TransactionId, TransactionIdGenerator};
use super::state::TransactionState;
use crate::concurrency::{ConcurrencyManager, LockError, LockTable};
use crate::recovery::{RecoveryError, RecoveryManager, RecoveryStats};
use crate::storage::{
    BlockId, BufferPool, FileManager, LogManager, SharedBuffer, StorageError, INT_SIZE,
};

/// Error types for transaction operations.
#[derive(Error, Debug)]
pub enum TransactionError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Recovery(#[from] RecoveryError),

    #[error("Block {0} is not pinned by this transaction")]
    NotPinned(BlockId),
}

impl TransactionError {
    /// True for failures caused by waiting too long for a lock or a buffer.
    /// The usual response is to roll the transaction back and retry it.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Lock(LockError::Timeout { .. })
                | Self::Storage(StorageError::BufferPoolTimeout { .. })
        )
    }
}

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

/// A single unit of work over disk blocks.
///
/// Reads take shared locks and writes take exclusive locks; both are held
/// until commit or rollback. A block must be pinned before it is read or
/// written. Calling any operation after the transaction has finished panics.
///
/// Dropping a transaction that is still active rolls it back.
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    file_manager: Arc<FileManager>,
    buffer_pool: Arc<BufferPool>,
    buffers: BufferList,
    concurrency: ConcurrencyManager,
    recovery: RecoveryManager,
}

impl Transaction {
    /// Starts a transaction and writes its Start record.
    pub fn new(
        ids: &TransactionIdGenerator,
        file_manager: Arc<FileManager>,
        log_manager: Arc<LogManager>,
        buffer_pool: Arc<BufferPool>,
        lock_table: Arc<LockTable>,
    ) -> Result<Self> {
        let id = ids.next();
        let recovery = RecoveryManager::new(id, log_manager, Arc::clone(&buffer_pool))?;
        debug!("{} started", id);

        Ok(Self {
            id,
            state: TransactionState::Active,
            file_manager,
            buffers: BufferList::new(Arc::clone(&buffer_pool)),
            buffer_pool,
            concurrency: ConcurrencyManager::new(lock_table),
            recovery,
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Flushes this transaction's pages, logs a durable Commit record, then
    /// releases its locks and pins.
    pub fn commit(&mut self) -> Result<()> {
        self.assert_active("commit");
        self.recovery.commit()?;
        self.finish(TransactionState::Committed)
    }

    /// Restores every value this transaction changed, logs a durable Rollback
    /// record, then releases its locks and pins.
    pub fn rollback(&mut self) -> Result<()> {
        self.assert_active("roll back");
        let recovery = self.recovery.clone();
        recovery.rollback(self)?;
        self.finish(TransactionState::RolledBack)
    }

    /// Restart recovery: undoes the changes of every transaction that did not
    /// finish before the last shutdown. Meant to run alone, before any other
    /// transaction starts. The transaction stays active; commit it afterwards.
    pub fn recover(&mut self) -> Result<RecoveryStats> {
        self.assert_active("recover");
        self.buffer_pool.flush_all(self.id)?;
        let recovery = self.recovery.clone();
        recovery.recover(self)
    }

    pub fn pin(&mut self, block: &BlockId) -> Result<()> {
        self.assert_active("pin");
        self.buffers.pin(block)?;
        Ok(())
    }

    pub fn unpin(&mut self, block: &BlockId) -> Result<()> {
        self.assert_active("unpin");
        if self.buffers.unpin(block)? {
            Ok(())
        } else {
            Err(TransactionError::NotPinned(block.clone()))
        }
    }

    pub fn get_int(&mut self, block: &BlockId, offset: usize) -> Result<i64> {
        self.assert_active("read");
        self.concurrency.slock(block)?;
        let value = self.pinned(block)?.lock().page().get_int(offset)?;
        Ok(value)
    }

    pub fn get_string(&mut self, block: &BlockId, offset: usize) -> Result<String> {
        self.assert_active("read");
        self.concurrency.slock(block)?;
        let value = self.pinned(block)?.lock().page().get_string(offset)?;
        Ok(value)
    }

    /// Writes an integer. With `should_log` the old value is logged first so
    /// the write can be undone; unlogged writes are used by undo itself and
    /// for formatting freshly appended blocks.
    pub fn set_int(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: i64,
        should_log: bool,
    ) -> Result<()> {
        self.assert_active("write");
        self.concurrency.xlock(block)?;
        let buffer = self.pinned(block)?;

        let mut buf = buffer.lock();
        buf.page().check_bounds(offset, INT_SIZE)?;
        let lsn = if should_log {
            Some(self.recovery.set_int(&buf, offset, value)?)
        } else {
            None
        };
        buf.page_mut().set_int(offset, value)?;
        buf.set_modified(self.id, lsn);
        Ok(())
    }

    pub fn set_string(
        &mut self,
        block: &BlockId,
        offset: usize,
        value: &str,
        should_log: bool,
    ) -> Result<()> {
        self.assert_active("write");
        self.concurrency.xlock(block)?;
        let buffer = self.pinned(block)?;

        let mut buf = buffer.lock();
        buf.page().check_bounds(offset, INT_SIZE + value.len())?;
        let lsn = if should_log {
            Some(self.recovery.set_string(&buf, offset, value)?)
        } else {
            None
        };
        buf.page_mut().set_string(offset, value)?;
        buf.set_modified(self.id, lsn);
        Ok(())
    }

    /// Appends a zero-filled block to `file_name`. No lock is taken on the
    /// end of the file, so concurrent appenders each get their own block.
    pub fn append(&mut self, file_name: &str) -> Result<BlockId> {
        self.assert_active("append");
        Ok(self.file_manager.append(file_name)?)
    }

    /// Number of blocks in `file_name`.
    pub fn size(&mut self, file_name: &str) -> Result<u64> {
        self.assert_active("size");
        Ok(self.file_manager.length(file_name)?)
    }

    pub fn block_size(&self) -> usize {
        self.file_manager.block_size()
    }

    pub fn available_buffers(&self) -> usize {
        self.buffer_pool.available()
    }

    fn pinned(&self, block: &BlockId) -> Result<&SharedBuffer> {
        self.buffers
            .buffer(block)
            .ok_or_else(|| TransactionError::NotPinned(block.clone()))
    }

    fn finish(&mut self, state: TransactionState) -> Result<()> {
        self.state.finish(state);
        self.concurrency.release();
        self.buffers.unpin_all()?;
        info!("{} {}", self.id, state);
        Ok(())
    }

    fn assert_active(&self, operation: &str) {
        assert!(
            self.state.is_active(),
            "cannot {} {}: transaction is {}",
            operation,
            self.id,
            self.state
        );
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.state.is_active() {
            warn!("{} dropped while active, rolling back", self.id);
            if let Err(e) = self.rollback() {
                warn!("Rollback of dropped {} failed: {}", self.id, e);
            }
        }
    }
}
