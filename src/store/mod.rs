//! Nonce cache backends.
//!
//! # Data Flow
//! ```text
//! NonceCoordinator
//!     → NonceStore (trait, async)
//!         → memory.rs (DashMap, optional JSON snapshot)
//!         → remote key-value store (implemented outside this crate)
//! ```
//!
//! # Contract
//! - Locking is a single test-and-set attempt; callers poll
//! - Mutations require the `LockId` of the current holder
//! - `unlock_nonce` is infallible so cleanup paths cannot fail
//! - Entries live as long as the backend; only their values go stale

pub mod memory;
pub mod types;

use async_trait::async_trait;

use crate::nonce::account::AccountKey;

pub use memory::MemoryNonceStore;
pub use types::{LockAttempt, LockId, NonceClass, NonceEntry, StoreError, StoreResult};

/// Storage for per-(account, class) nonce entries with backend-enforced locking.
///
/// A remote implementation must make `get_nonce_and_lock` atomic across every
/// process sharing the store, and must reject mutations whose `lock_id` does
/// not match the holder.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Ensure an entry exists for every [`NonceClass`] of `account`.
    ///
    /// Existing entries are left untouched.
    async fn init_user_nonce_cache(&self, account: &AccountKey) -> StoreResult<()>;

    /// Whether the entry is locked. Missing entries report `false`.
    async fn is_nonce_locked(&self, account: &AccountKey, class: NonceClass) -> StoreResult<bool>;

    /// Try once to take the lock. Fails with [`StoreError::EntryNotFound`]
    /// for uninitialized accounts.
    async fn get_nonce_and_lock(
        &self,
        account: &AccountKey,
        class: NonceClass,
    ) -> StoreResult<LockAttempt>;

    /// Add one to the nonce. `refresh_timestamp` controls whether
    /// `last_updated_ms` moves to now.
    async fn increment_nonce(
        &self,
        lock_id: &LockId,
        account: &AccountKey,
        class: NonceClass,
        refresh_timestamp: bool,
    ) -> StoreResult<NonceEntry>;

    /// Overwrite the nonce and mark the entry as synchronized now.
    async fn set_nonce(
        &self,
        lock_id: &LockId,
        account: &AccountKey,
        class: NonceClass,
        value: u64,
    ) -> StoreResult<NonceEntry>;

    /// Clear the lock. Idempotent, and a no-op for missing entries.
    async fn unlock_nonce(&self, account: &AccountKey, class: NonceClass);
}
