//! Nonce coordination.
//!
//! # Request Lifecycle
//! ```text
//! IDLE
//!   → local lock held        (KeyedMutex, FIFO, no timeout)
//!   → backend lock pending   (get_nonce_and_lock, polled)
//!   → backend lock held
//!   → fresh path | stale path
//!   → releasing              (backend unlock, then local unlock)
//!   → IDLE
//! ```
//!
//! Both locks live in guards. A caller dropped mid-request (timeout, `select!`,
//! task abort) releases the local key synchronously and hands the backend
//! unlock to a spawned task.
//!
//! # Staleness
//! An entry is stale when it was never synchronized or its last update is at
//! least `processing_time` old. Fresh entries are incremented locally. Stale
//! entries are reconciled with the chain:
//! - chain nonce equals the cached, already-issued nonce: the chain has not
//!   caught up. Hand out cached + 1 without refreshing the timestamp, then hold
//!   the locks for `processing_time` before returning.
//! - otherwise the chain value is the next usable nonce; store and return it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::sleep;

use crate::config::NonceConfig;
use crate::lock::KeyedMutex;
use crate::nonce::account::{AccountDirectory, AccountKey};
use crate::nonce::chain::ChainNonceQuery;
use crate::nonce::error::{NonceError, NonceResult};
use crate::observability::metrics;
use crate::store::types::now_ms;
use crate::store::{LockAttempt, LockId, NonceClass, NonceEntry, NonceStore, StoreError};

/// Issues nonces per (account, class), serialized across tasks and processes.
pub struct NonceCoordinator {
    store: Arc<dyn NonceStore>,
    local: KeyedMutex,
    accounts: AccountDirectory,
    processing_time: Duration,
    poll_interval: Duration,
}

impl NonceCoordinator {
    /// Create a coordinator over `store`.
    pub fn new(store: Arc<dyn NonceStore>, config: &NonceConfig) -> Self {
        Self {
            store,
            local: KeyedMutex::new(),
            accounts: AccountDirectory::new(),
            processing_time: config.processing_time(),
            poll_interval: config.lock_poll_interval(),
        }
    }

    /// Address book used to normalize account inputs.
    pub fn accounts(&self) -> &AccountDirectory {
        &self.accounts
    }

    /// Longest time a caller waits for another holder's backend lock.
    pub fn max_lock_wait(&self) -> Duration {
        self.processing_time + self.poll_interval
    }

    /// Create cache entries for every class of `account`. Safe to repeat.
    pub async fn init_user_nonce_cache(&self, account: &str) -> NonceResult<AccountKey> {
        let account = self.accounts.resolve(account)?;
        self.store.init_user_nonce_cache(&account).await?;
        tracing::debug!(account = %account, "Nonce cache initialized");
        Ok(account)
    }

    /// Return the next nonce to sign with for `account` and `class`.
    ///
    /// Both locks are released on every exit path before this returns.
    pub async fn get_nonce_and_increment(
        &self,
        account: &str,
        class: NonceClass,
        chain: &dyn ChainNonceQuery,
    ) -> NonceResult<u64> {
        let account = self.accounts.resolve(account)?;
        let key = format!("{}:{}", account, class);

        let local = self.local.lock_guard(&key).await;
        let issued = self.issue_under_local_lock(&account, class, chain).await;
        let released = local.unlock();

        let nonce = issued?;
        released?;
        Ok(nonce)
    }

    async fn issue_under_local_lock(
        &self,
        account: &AccountKey,
        class: NonceClass,
        chain: &dyn ChainNonceQuery,
    ) -> NonceResult<u64> {
        let (entry, lease) = self.acquire_backend_lock(account, class).await?;
        let issued = self.issue(entry, &lease.lock_id, account, class, chain).await;
        lease.release().await;

        if let Err(e) = &issued {
            tracing::warn!(account = %account, class = %class, error = %e, "Nonce issue failed");
        }
        issued
    }

    /// Poll the backend lock until held or the wait window closes.
    async fn acquire_backend_lock(
        &self,
        account: &AccountKey,
        class: NonceClass,
    ) -> NonceResult<(NonceEntry, BackendLease)> {
        let started = Instant::now();
        let max_wait = self.max_lock_wait();

        loop {
            match self.store.get_nonce_and_lock(account, class).await {
                Ok(LockAttempt::Acquired { entry, lock_id }) => {
                    metrics::record_lock_wait(started.elapsed());
                    let lease = BackendLease {
                        store: self.store.clone(),
                        account: account.clone(),
                        class,
                        lock_id,
                        held: true,
                    };
                    return Ok((entry, lease));
                }
                Ok(LockAttempt::Held) => {}
                Err(StoreError::EntryNotFound { account, class }) => {
                    return Err(NonceError::EntryMissing { account, class });
                }
                Err(e) => return Err(e.into()),
            }

            let waited = started.elapsed();
            if waited >= max_wait {
                metrics::record_lock_timeout();
                tracing::error!(
                    account = %account,
                    class = %class,
                    waited_ms = waited.as_millis() as u64,
                    "Timed out waiting for backend nonce lock"
                );
                return Err(NonceError::LockTimeout {
                    account: account.clone(),
                    class,
                    waited,
                });
            }

            tracing::debug!(account = %account, class = %class, "Backend nonce lock busy, polling");
            sleep(self.poll_interval.min(max_wait - waited)).await;
        }
    }

    /// Decide the nonce while holding the backend lock.
    async fn issue(
        &self,
        entry: NonceEntry,
        lock_id: &LockId,
        account: &AccountKey,
        class: NonceClass,
        chain: &dyn ChainNonceQuery,
    ) -> NonceResult<u64> {
        if !entry.is_stale(now_ms(), self.processing_time) {
            let updated = self.store.increment_nonce(lock_id, account, class, true).await?;
            metrics::record_nonce_issued("fresh");
            return issued_value(updated, account, class);
        }

        let chain_nonce = chain.get_authoritative_nonce(account, class).await?;

        match entry.nonce {
            Some(cached) if cached == chain_nonce => {
                let updated = self.store.increment_nonce(lock_id, account, class, false).await?;
                let nonce = issued_value(updated, account, class)?;
                tracing::warn!(
                    account = %account,
                    class = %class,
                    chain_nonce,
                    issued = nonce,
                    hold_ms = self.processing_time.as_millis() as u64,
                    "Chain has not caught up with issued nonce, holding lock"
                );
                metrics::record_nonce_issued("chain_lag");
                sleep(self.processing_time).await;
                Ok(nonce)
            }
            cached => {
                self.store.set_nonce(lock_id, account, class, chain_nonce).await?;
                tracing::debug!(
                    account = %account,
                    class = %class,
                    cached = ?cached,
                    chain_nonce,
                    "Nonce resynchronized from chain"
                );
                metrics::record_nonce_issued("chain_sync");
                Ok(chain_nonce)
            }
        }
    }
}

/// Backend lock held by this caller.
///
/// Dropping an unreleased lease spawns the unlock, since `Drop` cannot await.
struct BackendLease {
    store: Arc<dyn NonceStore>,
    account: AccountKey,
    class: NonceClass,
    lock_id: LockId,
    held: bool,
}

impl BackendLease {
    async fn release(mut self) {
        self.store.unlock_nonce(&self.account, self.class).await;
        self.held = false;
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        if !self.held {
            return;
        }

        let store = self.store.clone();
        let account = self.account.clone();
        let class = self.class;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(
                    account = %account,
                    class = %class,
                    lock_id = %self.lock_id,
                    "Nonce request dropped while holding backend lock, releasing"
                );
                handle.spawn(async move {
                    store.unlock_nonce(&account, class).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    account = %account,
                    class = %class,
                    lock_id = %self.lock_id,
                    "No runtime to release backend nonce lock; it stays held"
                );
            }
        }
    }
}

fn issued_value(entry: NonceEntry, account: &AccountKey, class: NonceClass) -> NonceResult<u64> {
    entry.nonce.ok_or_else(|| {
        StoreError::NonceUnset {
            account: account.clone(),
            class,
        }
        .into()
    })
}

impl std::fmt::Debug for NonceCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceCoordinator")
            .field("processing_time", &self.processing_time)
            .field("poll_interval", &self.poll_interval)
            .field("registered_addresses", &self.accounts.len())
            .finish()
    }
}
