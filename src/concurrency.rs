//! Concurrency control module.
//!
//! Block-level strict two-phase locking:
//! - `LockTable`: process-wide shared/exclusive locks with bounded waits
//! - `ConcurrencyManager`: one per transaction, remembers which locks it holds
//!   and releases them all at commit or rollback
//!
//! A lock request that cannot be granted within the configured wait fails
//! with [`LockError::Timeout`]. Deadlocks are broken by these timeouts; there
//! is no wait-for graph.

pub mod lock;
pub mod manager;

pub use lock::{LockError, LockMode, LockTable};
pub use manager::ConcurrencyManager;
