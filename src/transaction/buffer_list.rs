use std::collections::HashMap;
use std::sync::Arc;

use crate::storage::{BlockId, BufferPool, SharedBuffer, StorageResult};

struct PinnedBuffer {
    buffer: SharedBuffer,
    pins: usize,
}

/// The buffers pinned by one transaction, with a pin count per block.
///
/// Every pin and unpin is forwarded to the pool, so the pool's pin count for a
/// buffer includes each of this transaction's pins.
pub struct BufferList {
    buffer_pool: Arc<BufferPool>,
    buffers: HashMap<BlockId, PinnedBuffer>,
}

impl BufferList {
    pub fn new(buffer_pool: Arc<BufferPool>) -> Self {
        Self {
            buffer_pool,
            buffers: HashMap::new(),
        }
    }

    /// The buffer holding `block`, if this transaction has it pinned.
    pub fn buffer(&self, block: &BlockId) -> Option<&SharedBuffer> {
        self.buffers.get(block).map(|pinned| &pinned.buffer)
    }

    pub fn pin(&mut self, block: &BlockId) -> StorageResult<()> {
        let buffer = self.buffer_pool.pin(block)?;
        self.buffers
            .entry(block.clone())
            .or_insert(PinnedBuffer { buffer, pins: 0 })
            .pins += 1;
        Ok(())
    }

    /// Returns `false` if this transaction does not have `block` pinned.
    pub fn unpin(&mut self, block: &BlockId) -> StorageResult<bool> {
        let Some(pinned) = self.buffers.get_mut(block) else {
            return Ok(false);
        };
        self.buffer_pool.unpin(&pinned.buffer)?;
        pinned.pins -= 1;
        if pinned.pins == 0 {
            self.buffers.remove(block);
        }
        Ok(true)
    }

    /// Releases every pin held. Stops at the first pool error.
    pub fn unpin_all(&mut self) -> StorageResult<()> {
        for (_, pinned) in self.buffers.drain() {
            for _ in 0..pinned.pins {
                self.buffer_pool.unpin(&pinned.buffer)?;
            }
        }
        Ok(())
    }

    pub fn pin_count(&self, block: &BlockId) -> usize {
        self.buffers.get(block).map_or(0, |pinned| pinned.pins)
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileManager, LogManager};
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    fn create_test_pool(capacity: usize) -> StorageResult<(TempDir, Arc<BufferPool>)> {
        let dir = tempdir()?;
        let fm = Arc::new(FileManager::new(dir.path(), 400)?);
        let lm = Arc::new(LogManager::new(fm.clone(), "test.log")?);
        for _ in 0..3 {
            fm.append("data.tbl")?;
        }
        let pool = Arc::new(BufferPool::new(
            fm,
            lm,
            capacity,
            Duration::from_millis(100),
        ));
        Ok((dir, pool))
    }

    fn block(n: u64) -> BlockId {
        BlockId::new("data.tbl", n)
    }

    #[test]
    fn test_pins_are_counted_per_block() -> StorageResult<()> {
        let (_dir, pool) = create_test_pool(3)?;
        let mut list = BufferList::new(pool.clone());

        list.pin(&block(0))?;
        list.pin(&block(0))?;
        list.pin(&block(1))?;
        assert_eq!(list.pin_count(&block(0)), 2);
        assert_eq!(list.buffer(&block(0)).unwrap().lock().pins(), 2);
        assert_eq!(pool.available(), 1);

        assert!(list.unpin(&block(0))?);
        assert_eq!(list.pin_count(&block(0)), 1);
        assert!(list.buffer(&block(0)).is_some());

        assert!(list.unpin(&block(0))?);
        assert!(list.buffer(&block(0)).is_none());
        assert_eq!(pool.available(), 2);

        Ok(())
    }

    #[test]
    fn test_unpin_unknown_block() -> StorageResult<()> {
        let (_dir, pool) = create_test_pool(3)?;
        let mut list = BufferList::new(pool);

        assert!(!list.unpin(&block(2))?);

        Ok(())
    }

    #[test]
    fn test_unpin_all() -> StorageResult<()> {
        let (_dir, pool) = create_test_pool(3)?;
        let mut list = BufferList::new(pool.clone());

        list.pin(&block(0))?;
        list.pin(&block(0))?;
        list.pin(&block(1))?;
        list.pin(&block(2))?;
        assert_eq!(pool.available(), 0);

        list.unpin_all()?;
        assert!(list.is_empty());
        assert_eq!(pool.available(), 3);

        Ok(())
    }
}
