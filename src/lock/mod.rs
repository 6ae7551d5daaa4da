//! Process-local locking.
//!
//! # Data Flow
//! ```text
//! N concurrent callers for the same key
//!     → keyed_mutex.rs (FIFO queue per key)
//!     → exactly one caller proceeds to the backend lock at a time
//! ```
//!
//! # Design Decisions
//! - Ownership is handed directly to the longest waiter on unlock
//! - Unlocking a key nobody holds is an error, never a no-op
//! - `KeyGuard` releases the key if the holder's future is dropped
//! - No identity check: callers are cooperative and in-process

pub mod keyed_mutex;

pub use keyed_mutex::{KeyGuard, KeyedMutex, LockError};
