use log::debug;
use std::collections::HashMap;
use std::sync::Arc;

use super::lock::{LockError, LockMode, LockTable};
use crate::storage::BlockId;

/// Per-transaction view of the lock table.
///
/// Requests a lock from the shared table only when the transaction does not
/// already hold one strong enough, so each block is counted at most once per
/// transaction. Every lock is kept until [`ConcurrencyManager::release`].
pub struct ConcurrencyManager {
    lock_table: Arc<LockTable>,
    locks: HashMap<BlockId, LockMode>,
}

impl ConcurrencyManager {
    pub fn new(lock_table: Arc<LockTable>) -> Self {
        Self {
            lock_table,
            locks: HashMap::new(),
        }
    }

    pub fn slock(&mut self, block: &BlockId) -> Result<(), LockError> {
        if !self.locks.contains_key(block) {
            self.lock_table.slock(block)?;
            self.locks.insert(block.clone(), LockMode::Shared);
        }
        Ok(())
    }

    /// Takes a shared lock first (if needed) and then upgrades it.
    pub fn xlock(&mut self, block: &BlockId) -> Result<(), LockError> {
        if self.holds(block, LockMode::Exclusive) {
            return Ok(());
        }
        self.slock(block)?;
        self.lock_table.xlock(block)?;
        self.locks.insert(block.clone(), LockMode::Exclusive);
        Ok(())
    }

    /// Releases every lock held and forgets them.
    pub fn release(&mut self) {
        for block in self.locks.keys() {
            self.lock_table.unlock(block);
        }
        if !self.locks.is_empty() {
            debug!("Released {} locks", self.locks.len());
        }
        self.locks.clear();
    }

    pub fn holds(&self, block: &BlockId, mode: LockMode) -> bool {
        self.locks
            .get(block)
            .map_or(false, |held| held.covers(&mode))
    }

    pub fn lock_mode(&self, block: &BlockId) -> Option<LockMode> {
        self.locks.get(block).copied()
    }

    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn block(n: u64) -> BlockId {
        BlockId::new("data.tbl", n)
    }

    fn table() -> Arc<LockTable> {
        Arc::new(LockTable::new(Duration::from_millis(100)))
    }

    #[test]
    fn test_slock_is_requested_once() {
        let table = table();
        let mut cm = ConcurrencyManager::new(table.clone());

        cm.slock(&block(1)).unwrap();
        cm.slock(&block(1)).unwrap();
        assert_eq!(table.shared_count(&block(1)), 1);
        assert!(cm.holds(&block(1), LockMode::Shared));
        assert!(!cm.holds(&block(1), LockMode::Exclusive));
    }

    #[test]
    fn test_xlock_upgrades_own_shared_lock() {
        let table = table();
        let mut cm = ConcurrencyManager::new(table.clone());

        cm.slock(&block(1)).unwrap();
        cm.xlock(&block(1)).unwrap();
        assert!(table.is_exclusive(&block(1)));
        assert_eq!(cm.lock_mode(&block(1)), Some(LockMode::Exclusive));
        assert!(cm.holds(&block(1), LockMode::Shared));

        // Reads after a write need nothing new from the table.
        cm.slock(&block(1)).unwrap();
        cm.xlock(&block(1)).unwrap();
        assert_eq!(cm.lock_count(), 1);
    }

    #[test]
    fn test_readers_share_and_writer_waits() {
        let table = table();
        let mut reader1 = ConcurrencyManager::new(table.clone());
        let mut reader2 = ConcurrencyManager::new(table.clone());

        reader1.slock(&block(1)).unwrap();
        reader2.slock(&block(1)).unwrap();
        assert_eq!(table.shared_count(&block(1)), 2);

        assert!(matches!(
            reader1.xlock(&block(1)),
            Err(LockError::Timeout { .. })
        ));
        // The failed upgrade leaves the shared lock in place.
        assert!(reader1.holds(&block(1), LockMode::Shared));
        assert!(!reader1.holds(&block(1), LockMode::Exclusive));

        reader2.release();
        reader1.xlock(&block(1)).unwrap();
    }

    #[test]
    fn test_release_frees_all_locks() {
        let table = table();
        let mut cm = ConcurrencyManager::new(table.clone());

        cm.slock(&block(1)).unwrap();
        cm.xlock(&block(2)).unwrap();
        cm.release();

        assert_eq!(cm.lock_count(), 0);
        assert!(!table.is_locked(&block(1)));
        assert!(!table.is_locked(&block(2)));

        // Releasing twice is harmless.
        cm.release();
    }

    #[test]
    fn test_writer_blocks_other_reader_until_release() {
        let table = Arc::new(LockTable::new(Duration::from_secs(5)));
        let mut writer = ConcurrencyManager::new(table.clone());
        writer.xlock(&block(1)).unwrap();

        let table_clone = table.clone();
        let handle = thread::spawn(move || {
            let mut reader = ConcurrencyManager::new(table_clone);
            reader.slock(&block(1))
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        writer.release();

        handle.join().unwrap().unwrap();
    }
}
