//! Transaction module.
//!
//! A [`Transaction`] is the client-facing handle of the engine. It combines:
//! - a `BufferList` tracking the blocks it has pinned
//! - a `ConcurrencyManager` holding its block locks until it finishes
//! - a `RecoveryManager` logging every change so it can be undone
//!
//! Transactions are created by `Database::new_transaction` and run on one
//! thread each. Ids come from a shared [`TransactionIdGenerator`].

pub mod buffer_list;
pub mod id;
pub mod state;
pub mod tx;

pub use buffer_list::BufferList;
pub use id::{TransactionId, TransactionIdGenerator};
pub use state::TransactionState;
pub use tx::{Result, Transaction, TransactionError};
