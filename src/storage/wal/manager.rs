//! Log manager implementation.
//!
//! The log manager keeps the most recent log block in memory, appends records
//! to it, and writes it out when a caller needs records to be durable or when
//! the block fills up.

use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;

use super::iterator::{self, LogIterator};
use super::lsn::Lsn;
use crate::storage::block::BlockId;
use crate::storage::disk::FileManager;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::page::{Page, INT_SIZE};

/// Mutable state guarded by the log manager's mutex.
struct LogState {
    /// In-memory copy of the current (last) log block.
    page: Page,
    /// Block that `page` belongs to.
    current_block: BlockId,
    /// LSN of the most recently appended record.
    latest_lsn: Lsn,
    /// Highest LSN known to be on disk.
    last_saved_lsn: Lsn,
}

impl LogState {
    fn boundary(&self) -> StorageResult<usize> {
        Ok(self.page.get_int(0)? as usize)
    }
}

/// Appends records to the log file and makes them durable on request.
pub struct LogManager {
    file_manager: Arc<FileManager>,
    log_file: String,
    state: Mutex<LogState>,
}

impl LogManager {
    /// Opens the log stored in `log_file`. An empty log file gets a fresh
    /// first block; otherwise the last block is loaded and appends continue in it.
    pub fn new(file_manager: Arc<FileManager>, log_file: &str) -> StorageResult<Self> {
        let length = file_manager.length(log_file)?;

        let (current_block, page) = if length == 0 {
            Self::append_new_block(&file_manager, log_file)?
        } else {
            let block = BlockId::new(log_file, length - 1);
            let mut page = Page::new(file_manager.block_size());
            file_manager.read(&block, &mut page)?;
            if iterator::boundary(&page)?.is_none() {
                warn!("Log {} was never initialised, resetting it", block);
                page = Self::empty_block(file_manager.block_size())?;
                file_manager.write(&block, &page)?;
            }
            (block, page)
        };
        debug!("Log {} positioned at {}", log_file, current_block);

        Ok(Self {
            file_manager,
            log_file: log_file.to_string(),
            state: Mutex::new(LogState {
                page,
                current_block,
                latest_lsn: Lsn::NONE,
                last_saved_lsn: Lsn::NONE,
            }),
        })
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    /// Appends one record and returns its LSN. The record is not durable until
    /// a later flush covers it.
    pub fn append(&self, record: &[u8]) -> StorageResult<Lsn> {
        let block_size = self.file_manager.block_size();
        let required = record.len() + INT_SIZE;
        // Every block keeps INT_SIZE bytes for its boundary.
        if required > block_size - INT_SIZE {
            return Err(StorageError::LogRecordTooLarge {
                required,
                available: block_size - INT_SIZE,
            });
        }

        let mut state = self.state.lock();
        let mut boundary = state.boundary()?;
        if boundary < required + INT_SIZE {
            self.flush_locked(&mut state)?;
            let (block, page) = Self::append_new_block(&self.file_manager, &self.log_file)?;
            debug!("Log moved to {}", block);
            state.current_block = block;
            state.page = page;
            boundary = state.boundary()?;
        }

        let position = boundary - required;
        state.page.set_bytes(position, record)?;
        state.page.set_int(0, position as i64)?;
        state.latest_lsn = state.latest_lsn.next();
        Ok(state.latest_lsn)
    }

    /// Makes every record up to and including `lsn` durable.
    pub fn flush_lsn(&self, lsn: Lsn) -> StorageResult<()> {
        let mut state = self.state.lock();
        if lsn > state.last_saved_lsn {
            self.flush_locked(&mut state)?;
        }
        Ok(())
    }

    /// Writes the current log block regardless of what is already on disk.
    pub fn flush(&self) -> StorageResult<()> {
        self.flush_locked(&mut self.state.lock())
    }

    /// Flushes the current block and returns an iterator over all records,
    /// newest first.
    pub fn iter(&self) -> StorageResult<LogIterator> {
        let current_block = {
            let mut state = self.state.lock();
            self.flush_locked(&mut state)?;
            state.current_block.clone()
        };
        LogIterator::new(self.file_manager.clone(), current_block)
    }

    pub fn latest_lsn(&self) -> Lsn {
        self.state.lock().latest_lsn
    }

    pub fn last_saved_lsn(&self) -> Lsn {
        self.state.lock().last_saved_lsn
    }

    fn flush_locked(&self, state: &mut LogState) -> StorageResult<()> {
        self.file_manager.write(&state.current_block, &state.page)?;
        state.last_saved_lsn = state.latest_lsn;
        Ok(())
    }

    /// Extends the log by one block and writes it out empty. The caller's
    /// state is only replaced once this succeeds.
    fn append_new_block(
        file_manager: &FileManager,
        log_file: &str,
    ) -> StorageResult<(BlockId, Page)> {
        let page = Self::empty_block(file_manager.block_size())?;
        let block = file_manager.append(log_file)?;
        file_manager.write(&block, &page)?;
        Ok((block, page))
    }

    fn empty_block(block_size: usize) -> StorageResult<Page> {
        let mut page = Page::new(block_size);
        page.set_int(0, block_size as i64)?;
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    const BLOCK_SIZE: usize = 400;
    const LOG_FILE: &str = "test.log";

    fn create_test_log() -> StorageResult<(TempDir, Arc<FileManager>, LogManager)> {
        let dir = tempdir()?;
        let fm = Arc::new(FileManager::new(dir.path(), BLOCK_SIZE)?);
        let lm = LogManager::new(fm.clone(), LOG_FILE)?;
        Ok((dir, fm, lm))
    }

    fn record(i: usize) -> Vec<u8> {
        let mut page = Page::new(Page::max_length(8) + INT_SIZE);
        page.set_string(0, &format!("record{}", i)).unwrap();
        page.set_int(Page::max_length(8), i as i64 + 100).unwrap();
        page.into_bytes()
    }

    fn read_all(lm: &LogManager) -> StorageResult<Vec<Vec<u8>>> {
        lm.iter()?.collect()
    }

    #[test]
    fn test_empty_log() -> StorageResult<()> {
        let (_dir, fm, lm) = create_test_log()?;

        assert_eq!(fm.length(LOG_FILE)?, 1);
        assert!(read_all(&lm)?.is_empty());
        assert_eq!(lm.latest_lsn(), Lsn::NONE);

        Ok(())
    }

    #[test]
    fn test_lsns_increase() -> StorageResult<()> {
        let (_dir, _fm, lm) = create_test_log()?;

        for i in 1..=5 {
            assert_eq!(lm.append(&record(i as usize))?, Lsn(i));
        }
        assert_eq!(lm.latest_lsn(), Lsn(5));

        Ok(())
    }

    #[test]
    fn test_iterates_newest_first_across_blocks() -> StorageResult<()> {
        let (_dir, fm, lm) = create_test_log()?;

        for i in 1..=35 {
            lm.append(&record(i))?;
        }
        assert!(fm.length(LOG_FILE)? > 1);

        let records = read_all(&lm)?;
        assert_eq!(records.len(), 35);
        for (record_bytes, expected) in records.iter().zip((1..=35).rev()) {
            assert_eq!(record_bytes, &record(expected));
        }

        Ok(())
    }

    #[test]
    fn test_flush_respects_lsn() -> StorageResult<()> {
        let (_dir, _fm, lm) = create_test_log()?;

        let first = lm.append(&record(1))?;
        assert_eq!(lm.last_saved_lsn(), Lsn::NONE);

        lm.flush_lsn(first)?;
        assert_eq!(lm.last_saved_lsn(), first);

        let second = lm.append(&record(2))?;
        lm.flush_lsn(first)?;
        assert_eq!(lm.last_saved_lsn(), first);

        lm.flush_lsn(second)?;
        assert_eq!(lm.last_saved_lsn(), second);

        Ok(())
    }

    #[test]
    fn test_record_too_large() -> StorageResult<()> {
        let (_dir, _fm, lm) = create_test_log()?;

        let largest = vec![7u8; BLOCK_SIZE - 2 * INT_SIZE];
        lm.append(&largest)?;

        let too_large = vec![7u8; BLOCK_SIZE - 2 * INT_SIZE + 1];
        assert!(matches!(
            lm.append(&too_large),
            Err(StorageError::LogRecordTooLarge { .. })
        ));

        assert_eq!(read_all(&lm)?, vec![largest]);

        Ok(())
    }

    #[test]
    fn test_reopen_continues_last_block() -> StorageResult<()> {
        let dir = tempdir()?;

        {
            let fm = Arc::new(FileManager::new(dir.path(), BLOCK_SIZE)?);
            let lm = LogManager::new(fm, LOG_FILE)?;
            for i in 1..=3 {
                lm.append(&record(i))?;
            }
            let last = lm.latest_lsn();
            lm.flush_lsn(last)?;
        }

        let fm = Arc::new(FileManager::new(dir.path(), BLOCK_SIZE)?);
        let lm = LogManager::new(fm.clone(), LOG_FILE)?;
        assert_eq!(fm.length(LOG_FILE)?, 1);

        assert_eq!(lm.append(&record(4))?, Lsn(1));
        let records = read_all(&lm)?;
        assert_eq!(records, vec![record(4), record(3), record(2), record(1)]);

        Ok(())
    }

    #[test]
    fn test_reopen_after_interrupted_rollover() -> StorageResult<()> {
        let dir = tempdir()?;

        {
            let fm = Arc::new(FileManager::new(dir.path(), BLOCK_SIZE)?);
            let lm = LogManager::new(fm.clone(), LOG_FILE)?;
            for i in 1..=3 {
                lm.append(&record(i))?;
            }
            lm.flush()?;
            // The file grew but the new block was never written.
            fm.append(LOG_FILE)?;
        }

        let fm = Arc::new(FileManager::new(dir.path(), BLOCK_SIZE)?);
        let lm = LogManager::new(fm.clone(), LOG_FILE)?;
        assert_eq!(fm.length(LOG_FILE)?, 2);
        assert_eq!(read_all(&lm)?, vec![record(3), record(2), record(1)]);

        lm.append(&record(4))?;
        assert_eq!(fm.length(LOG_FILE)?, 2);
        assert_eq!(
            read_all(&lm)?,
            vec![record(4), record(3), record(2), record(1)]
        );

        Ok(())
    }

    #[test]
    fn test_rollover_keeps_full_block_on_disk() -> StorageResult<()> {
        let (_dir, fm, lm) = create_test_log()?;

        let mut i = 0;
        while fm.length(LOG_FILE)? == 1 {
            i += 1;
            lm.append(&record(i))?;
        }
        // Records 1..i-1 filled block 0; record i opened block 1.
        let first = LogIterator::new(fm.clone(), BlockId::new(LOG_FILE, 0))?
            .collect::<StorageResult<Vec<_>>>()?;
        assert_eq!(first, (1..i).rev().map(record).collect::<Vec<_>>());

        lm.flush()?;
        let all = read_all(&lm)?;
        assert_eq!(all.len(), i);
        assert_eq!(all[0], record(i));

        Ok(())
    }

    #[test]
    fn test_unflushed_records_are_lost() -> StorageResult<()> {
        let dir = tempdir()?;

        {
            let fm = Arc::new(FileManager::new(dir.path(), BLOCK_SIZE)?);
            let lm = LogManager::new(fm, LOG_FILE)?;
            let first = lm.append(&record(1))?;
            lm.flush_lsn(first)?;
            lm.append(&record(2))?;
        }

        let fm = Arc::new(FileManager::new(dir.path(), BLOCK_SIZE)?);
        let lm = LogManager::new(fm, LOG_FILE)?;
        assert_eq!(read_all(&lm)?, vec![record(1)]);

        Ok(())
    }
}
