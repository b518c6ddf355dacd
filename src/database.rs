use anyhow::{Context, Result};
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::concurrency::LockTable;
use crate::recovery::{LogRecord, RecoveryStats};
use crate::storage::{BufferPool, FileManager, LogManager};
use crate::transaction::{Transaction, TransactionError, TransactionIdGenerator};

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Size in bytes of every block, data and log alike.
    pub block_size: usize,
    /// Number of buffers in the pool.
    pub buffer_count: usize,
    /// Name of the log file inside the database directory.
    pub log_file: String,
    /// Longest a pin waits for a free buffer.
    pub buffer_wait: Duration,
    /// Longest a lock request waits before failing.
    pub lock_wait: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            block_size: 4096,
            buffer_count: 100,
            log_file: "undodb.log".to_string(),
            buffer_wait: Duration::from_secs(10),
            lock_wait: Duration::from_secs(10),
        }
    }
}

impl DatabaseConfig {
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    pub fn with_log_file(mut self, log_file: impl Into<String>) -> Self {
        self.log_file = log_file.into();
        self
    }

    pub fn with_buffer_wait(mut self, buffer_wait: Duration) -> Self {
        self.buffer_wait = buffer_wait;
        self
    }

    pub fn with_lock_wait(mut self, lock_wait: Duration) -> Self {
        self.lock_wait = lock_wait;
        self
    }
}

/// High-level database interface that wires all layers together
pub struct Database {
    config: DatabaseConfig,
    file_manager: Arc<FileManager>,
    log_manager: Arc<LogManager>,
    buffer_pool: Arc<BufferPool>,
    lock_table: Arc<LockTable>,
    ids: TransactionIdGenerator,
    last_recovery: Option<RecoveryStats>,
}

impl Database {
    /// Opens the database in `dir`, creating the directory if needed.
    ///
    /// If the directory already existed, restart recovery runs before this
    /// returns, undoing whatever unfinished transactions left behind.
    pub fn open(dir: &Path, config: DatabaseConfig) -> Result<Self> {
        let file_manager = Arc::new(
            FileManager::new(dir, config.block_size)
                .with_context(|| format!("Failed to open database directory {:?}", dir))?,
        );
        let log_manager = Arc::new(
            LogManager::new(Arc::clone(&file_manager), &config.log_file)
                .with_context(|| format!("Failed to open log file {}", config.log_file))?,
        );
        let buffer_pool = Arc::new(BufferPool::new(
            Arc::clone(&file_manager),
            Arc::clone(&log_manager),
            config.buffer_count,
            config.buffer_wait,
        ));
        let lock_table = Arc::new(LockTable::new(config.lock_wait));

        let mut db = Self {
            config,
            file_manager,
            log_manager,
            buffer_pool,
            lock_table,
            ids: TransactionIdGenerator::new(),
            last_recovery: None,
        };

        if db.file_manager.is_new() {
            info!("Created new database in {:?}", dir);
        } else {
            info!("Recovering existing database in {:?}", dir);
            let stats = db.recover().context("Restart recovery failed")?;
            db.last_recovery = Some(stats);
        }

        Ok(db)
    }

    /// Starts a new transaction.
    pub fn new_transaction(&self) -> std::result::Result<Transaction, TransactionError> {
        Transaction::new(
            &self.ids,
            Arc::clone(&self.file_manager),
            Arc::clone(&self.log_manager),
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.lock_table),
        )
    }

    /// Runs restart recovery in its own transaction and commits it.
    pub fn recover(&self) -> std::result::Result<RecoveryStats, TransactionError> {
        let mut tx = self.new_transaction()?;
        let stats = tx.recover()?;
        tx.commit()?;
        Ok(stats)
    }

    /// Statistics of the recovery run by `open`, if one ran.
    pub fn last_recovery(&self) -> Option<&RecoveryStats> {
        self.last_recovery.as_ref()
    }

    /// Every log record, newest first.
    pub fn log_records(&self) -> Result<Vec<LogRecord>> {
        let mut records = Vec::new();
        for bytes in self.log_manager.iter()? {
            records.push(LogRecord::from_bytes(&bytes?)?);
        }
        Ok(records)
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn dir(&self) -> PathBuf {
        self.file_manager.dir().to_path_buf()
    }

    pub fn block_size(&self) -> usize {
        self.file_manager.block_size()
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    pub fn log_manager(&self) -> &Arc<LogManager> {
        &self.log_manager
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn lock_table(&self) -> &Arc<LockTable> {
        &self.lock_table
    }

    /// Writes every modified buffer to disk, log first.
    pub fn flush(&self) -> Result<()> {
        self.buffer_pool.flush_dirty()?;
        self.log_manager.flush()?;
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("Flush on close of {:?} failed: {:#}", self.dir(), e);
        }
    }
}
