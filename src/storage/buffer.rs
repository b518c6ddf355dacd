use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::storage::block::BlockId;
use crate::storage::disk::FileManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::Page;
use crate::storage::wal::{LogManager, Lsn};
use crate::transaction::TransactionId;

/// A page frame of the buffer pool.
///
/// A buffer is bound to at most one block at a time. While its pin count is
/// positive the binding cannot change.
pub struct Buffer {
    page: Page,
    block: Option<BlockId>,
    pins: usize,
    modified_by: Option<TransactionId>,
    lsn: Option<Lsn>,
}

/// Buffers are handed out behind their own mutex so transactions can read and
/// modify pages without holding the pool's lock.
pub type SharedBuffer = Arc<Mutex<Buffer>>;

impl Buffer {
    fn new(block_size: usize) -> Self {
        Self {
            page: Page::new(block_size),
            block: None,
            pins: 0,
            modified_by: None,
            lsn: None,
        }
    }

    pub fn page(&self) -> &Page {
        &self.page
    }

    /// Mutable access to the page contents. Callers must follow up with
    /// [`Buffer::set_modified`] so the change is eventually written back.
    pub fn page_mut(&mut self) -> &mut Page {
        &mut self.page
    }

    pub fn block(&self) -> Option<&BlockId> {
        self.block.as_ref()
    }

    pub fn pins(&self) -> usize {
        self.pins
    }

    pub fn is_pinned(&self) -> bool {
        self.pins > 0
    }

    pub fn modifying_tx(&self) -> Option<TransactionId> {
        self.modified_by
    }

    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }

    /// Marks the page dirty on behalf of `tx`. An `lsn` of `None` (an unlogged
    /// change) keeps the previously recorded LSN.
    pub fn set_modified(&mut self, tx: TransactionId, lsn: Option<Lsn>) {
        self.modified_by = Some(tx);
        if lsn.is_some() {
            self.lsn = lsn;
        }
    }
}

struct PoolState {
    available: usize,
}

/// Fixed-capacity pool of buffers shared by all transactions.
///
/// Pinning a block with no free buffer waits for an unpin, up to `max_wait`.
/// Lock order: pool state, then a buffer, then the log manager, then the file manager.
pub struct BufferPool {
    buffers: Vec<SharedBuffer>,
    state: Mutex<PoolState>,
    freed: Condvar,
    file_manager: Arc<FileManager>,
    log_manager: Arc<LogManager>,
    max_wait: Duration,
}

impl BufferPool {
    pub fn new(
        file_manager: Arc<FileManager>,
        log_manager: Arc<LogManager>,
        capacity: usize,
        max_wait: Duration,
    ) -> Self {
        let block_size = file_manager.block_size();
        Self {
            buffers: (0..capacity)
                .map(|_| Arc::new(Mutex::new(Buffer::new(block_size))))
                .collect(),
            state: Mutex::new(PoolState {
                available: capacity,
            }),
            freed: Condvar::new(),
            file_manager,
            log_manager,
            max_wait,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    /// Number of buffers with a pin count of zero.
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Pins `block` and returns the buffer holding it.
    ///
    /// A buffer already bound to the block is reused. Otherwise an unpinned
    /// buffer is flushed and loaded with the block. If every buffer is pinned
    /// the call waits; it fails with `BufferPoolTimeout` once `max_wait` passes.
    pub fn pin(&self, block: &BlockId) -> StorageResult<SharedBuffer> {
        let started = Instant::now();
        let deadline = started + self.max_wait;

        let mut state = self.state.lock();
        loop {
            if let Some(buffer) = self.try_to_pin(block, &mut state)? {
                return Ok(buffer);
            }
            if Instant::now() >= deadline {
                warn!("Gave up waiting for a buffer for {}", block);
                return Err(StorageError::BufferPoolTimeout {
                    block: block.clone(),
                    waited: started.elapsed(),
                });
            }
            debug!("All buffers pinned, waiting to pin {}", block);
            self.freed.wait_until(&mut state, deadline);
        }
    }

    /// Releases one pin. Waiters are woken when the pin count reaches zero.
    pub fn unpin(&self, buffer: &SharedBuffer) -> StorageResult<()> {
        let mut state = self.state.lock();
        let mut buf = buffer.lock();
        if !buf.is_pinned() {
            return Err(StorageError::NotPinned {
                block: buf.block.clone(),
            });
        }

        buf.pins -= 1;
        if !buf.is_pinned() {
            state.available += 1;
            self.freed.notify_all();
        }
        Ok(())
    }

    /// Writes out every buffer modified by `tx`, flushing the log first.
    pub fn flush_all(&self, tx: TransactionId) -> StorageResult<()> {
        let _state = self.state.lock();
        for buffer in &self.buffers {
            let mut buf = buffer.lock();
            if buf.modified_by == Some(tx) {
                self.flush_buffer(&mut buf)?;
            }
        }
        Ok(())
    }

    /// Writes out every modified buffer regardless of which transaction touched it.
    pub fn flush_dirty(&self) -> StorageResult<()> {
        let _state = self.state.lock();
        for buffer in &self.buffers {
            self.flush_buffer(&mut buffer.lock())?;
        }
        Ok(())
    }

    fn try_to_pin(
        &self,
        block: &BlockId,
        state: &mut PoolState,
    ) -> StorageResult<Option<SharedBuffer>> {
        if let Some(buffer) = self.find_existing(block) {
            let mut buf = buffer.lock();
            if !buf.is_pinned() {
                state.available -= 1;
            }
            buf.pins += 1;
            drop(buf);
            return Ok(Some(buffer));
        }

        let Some(buffer) = self.choose_unpinned() else {
            return Ok(None);
        };
        {
            let mut buf = buffer.lock();
            self.assign_to_block(&mut buf, block)?;
            buf.pins = 1;
        }
        state.available -= 1;
        Ok(Some(buffer))
    }

    fn find_existing(&self, block: &BlockId) -> Option<SharedBuffer> {
        self.buffers
            .iter()
            .find(|buffer| buffer.lock().block.as_ref() == Some(block))
            .cloned()
    }

    fn choose_unpinned(&self) -> Option<SharedBuffer> {
        self.buffers
            .iter()
            .find(|buffer| !buffer.lock().is_pinned())
            .cloned()
    }

    fn assign_to_block(&self, buf: &mut Buffer, block: &BlockId) -> StorageResult<()> {
        self.flush_buffer(buf)?;
        buf.block = None;
        self.file_manager.read(block, &mut buf.page)?;
        buf.block = Some(block.clone());
        buf.pins = 0;
        buf.lsn = None;
        debug!("Loaded {} into buffer", block);
        Ok(())
    }

    /// Write-ahead: the log is flushed through the buffer's LSN before the page
    /// itself is written.
    fn flush_buffer(&self, buf: &mut Buffer) -> StorageResult<()> {
        if buf.modified_by.is_none() {
            return Ok(());
        }
        if let Some(lsn) = buf.lsn {
            self.log_manager.flush_lsn(lsn)?;
        }
        if let Some(block) = &buf.block {
            self.file_manager.write(block, &buf.page)?;
        }
        buf.modified_by = None;
        Ok(())
    }
}
