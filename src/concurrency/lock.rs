//! Lock table for block-level locking.
//!
//! Each block maps to a single counter: a positive value is the number of
//! shared holders, `-1` means one exclusive holder. Blocks with no holders have
//! no entry. The table does not know which transaction holds what; that is
//! tracked by each transaction's `ConcurrencyManager`.

use log::{debug, warn};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::storage::BlockId;

/// Counter value of an exclusively locked block.
const EXCLUSIVE: i64 = -1;

/// Lock modes supported by the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// Shared lock for read operations.
    Shared,
    /// Exclusive lock for write operations.
    Exclusive,
}

impl LockMode {
    /// True if holding `self` already grants a request for `requested`.
    pub fn covers(&self, requested: &LockMode) -> bool {
        matches!(
            (self, requested),
            (LockMode::Exclusive, _) | (LockMode::Shared, LockMode::Shared)
        )
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Lock timeout: gave up waiting for {block} after {waited:?}")]
    Timeout { block: BlockId, waited: Duration },
}

/// Process-wide shared/exclusive lock table.
pub struct LockTable {
    locks: Mutex<HashMap<BlockId, i64>>,
    released: Condvar,
    max_wait: Duration,
}

impl LockTable {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            released: Condvar::new(),
            max_wait,
        }
    }

    /// Acquires a shared lock, waiting while another holder has the block exclusively.
    pub fn slock(&self, block: &BlockId) -> Result<(), LockError> {
        let mut locks = self.locks.lock();
        self.wait_while(&mut locks, block, |count| count == EXCLUSIVE)?;
        *locks.entry(block.clone()).or_insert(0) += 1;
        Ok(())
    }

    /// Acquires an exclusive lock.
    ///
    /// The caller is expected to already hold a shared lock on the block, so a
    /// count of exactly one is treated as "only the caller" and the lock is
    /// upgraded. Any other holder makes the call wait.
    pub fn xlock(&self, block: &BlockId) -> Result<(), LockError> {
        let mut locks = self.locks.lock();
        self.wait_while(&mut locks, block, |count| count > 1 || count == EXCLUSIVE)?;
        locks.insert(block.clone(), EXCLUSIVE);
        Ok(())
    }

    /// Releases one hold on `block` and wakes every waiter.
    pub fn unlock(&self, block: &BlockId) {
        let mut locks = self.locks.lock();
        match locks.get(block).copied() {
            Some(count) if count > 1 => {
                locks.insert(block.clone(), count - 1);
            }
            _ => {
                locks.remove(block);
            }
        }
        self.released.notify_all();
    }

    /// Number of shared holders of `block`; zero when unlocked or exclusively held.
    pub fn shared_count(&self, block: &BlockId) -> usize {
        match self.locks.lock().get(block) {
            Some(&count) if count > 0 => count as usize,
            _ => 0,
        }
    }

    pub fn is_exclusive(&self, block: &BlockId) -> bool {
        self.locks.lock().get(block) == Some(&EXCLUSIVE)
    }

    pub fn is_locked(&self, block: &BlockId) -> bool {
        self.locks.lock().contains_key(block)
    }

    /// Waits until `blocked` is false for the block's current count, or fails
    /// once this call's own deadline passes. Other waiters keep their deadlines.
    fn wait_while<F>(
        &self,
        locks: &mut parking_lot::MutexGuard<'_, HashMap<BlockId, i64>>,
        block: &BlockId,
        blocked: F,
    ) -> Result<(), LockError>
    where
        F: Fn(i64) -> bool,
    {
        let started = Instant::now();
        let deadline = started + self.max_wait;
        let is_blocked =
            |locks: &HashMap<BlockId, i64>| locks.get(block).is_some_and(|&c| blocked(c));

        while is_blocked(&**locks) {
            if Instant::now() >= deadline {
                warn!("Lock wait on {} timed out", block);
                return Err(LockError::Timeout {
                    block: block.clone(),
                    waited: started.elapsed(),
                });
            }
            debug!("Waiting for lock on {}", block);
            self.released.wait_until(locks, deadline);
        }
        Ok(())
    }
}
