use std::sync::Arc;

use crate::storage::block::BlockId;
use crate::storage::disk::FileManager;
use crate::storage::error::StorageResult;
use crate::storage::page::{Page, INT_SIZE};

/// Boundary stored at the start of a log block, or `None` when the block was
/// never initialised. A crash between extending the log file and writing the
/// new block leaves such a block of zeros behind; it holds no records.
pub(super) fn boundary(page: &Page) -> StorageResult<Option<usize>> {
    let raw = page.get_int(0)?;
    Ok(usize::try_from(raw)
        .ok()
        .filter(|b| (INT_SIZE..=page.len()).contains(b)))
}

/// Walks the log from the newest record to the oldest.
///
/// Reads blocks straight from disk, so it only sees records that were flushed
/// before it was created. Yields `Err` at most once; after an error the
/// iterator is exhausted.
pub struct LogIterator {
    file_manager: Arc<FileManager>,
    block: BlockId,
    page: Page,
    position: usize,
    failed: bool,
}

impl LogIterator {
    pub(crate) fn new(file_manager: Arc<FileManager>, block: BlockId) -> StorageResult<Self> {
        let page = Page::new(file_manager.block_size());
        let mut iter = Self {
            file_manager,
            block: block.clone(),
            page,
            position: 0,
            failed: false,
        };
        iter.move_to_block(block)?;
        Ok(iter)
    }

    fn move_to_block(&mut self, block: BlockId) -> StorageResult<()> {
        self.file_manager.read(&block, &mut self.page)?;
        self.position = boundary(&self.page)?.unwrap_or(self.page.len());
        self.block = block;
        Ok(())
    }

    fn next_record(&mut self) -> StorageResult<Option<Vec<u8>>> {
        while self.position >= self.page.len() {
            match self.block.previous() {
                Some(previous) => self.move_to_block(previous)?,
                None => return Ok(None),
            }
        }

        let record = self.page.get_bytes(self.position)?.to_vec();
        self.position += INT_SIZE + record.len();
        Ok(Some(record))
    }
}

impl Iterator for LogIterator {
    type Item = StorageResult<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
