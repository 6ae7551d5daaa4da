//! Keyed FIFO async mutex.
//!
//! # Responsibilities
//! - Grant exclusive ownership of a string key to one caller at a time
//! - Queue contenders in arrival order
//! - Hand ownership to the longest waiter on unlock
//!
//! A key with an entry in `queues` is held. The queue holds the waiters behind
//! the current holder. The entry is removed when the last holder unlocks with
//! nobody waiting.

use std::collections::VecDeque;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors raised by the keyed mutex.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LockError {
    /// `unlock` was called for a key with no held lock.
    #[error("unlock called for '{0}' but no lock is held")]
    NotLocked(String),
}

/// Process-local mutual exclusion per string key, FIFO fair.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    queues: DashMap<String, VecDeque<oneshot::Sender<()>>>,
}

impl KeyedMutex {
    /// Create an empty mutex table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the caller exclusively holds `key`.
    ///
    /// Grants immediately when nobody holds the key. Never fails.
    pub async fn lock(&self, key: &str) {
        let rx = match self.queues.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(VecDeque::new());
                return;
            }
            Entry::Occupied(mut queue) => {
                let (tx, rx) = oneshot::channel();
                queue.get_mut().push_back(tx);
                rx
            }
        };

        tracing::trace!(key = %key, "Queued for local lock");

        let mut waiter = Waiter {
            mutex: self,
            key,
            rx: Some(rx),
        };
        waiter.granted().await;
    }

    /// Like `lock`, but the returned guard releases `key` when dropped.
    pub async fn lock_guard(&self, key: &str) -> KeyGuard<'_> {
        self.lock(key).await;
        KeyGuard {
            mutex: self,
            key: key.to_string(),
            held: true,
        }
    }

    /// Release `key`, passing ownership to the longest waiter if any.
    pub fn unlock(&self, key: &str) -> Result<(), LockError> {
        match self.queues.entry(key.to_string()) {
            Entry::Vacant(_) => Err(LockError::NotLocked(key.to_string())),
            Entry::Occupied(mut queue) => {
                while let Some(next) = queue.get_mut().pop_front() {
                    // A failed send means that waiter gave up; try the next one.
                    if next.send(()).is_ok() {
                        return Ok(());
                    }
                }
                queue.remove();
                Ok(())
            }
        }
    }

    /// Whether `key` currently has a holder.
    pub fn is_locked(&self, key: &str) -> bool {
        self.queues.contains_key(key)
    }

    /// Number of callers queued behind the holder of `key`.
    pub fn waiting(&self, key: &str) -> usize {
        self.queues.get(key).map(|q| q.len()).unwrap_or(0)
    }
}

/// Ownership of one key, released on drop.
///
/// Holders that may be cancelled mid-await keep the key in a guard so a
/// dropped future still hands the key to the next waiter.
#[must_use = "dropping the guard releases the key immediately"]
pub struct KeyGuard<'a> {
    mutex: &'a KeyedMutex,
    key: String,
    held: bool,
}

impl KeyGuard<'_> {
    /// Release the key now and report the outcome.
    pub fn unlock(mut self) -> Result<(), LockError> {
        self.held = false;
        self.mutex.unlock(&self.key)
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.mutex.unlock(&self.key) {
                tracing::warn!(key = %self.key, error = %e, "Dropped lock guard failed to release key");
            }
        }
    }
}

/// A queued `lock` call.
///
/// If the future is dropped after ownership was handed over but before it
/// observed the grant, the drop passes ownership on so the key is not stranded.
struct Waiter<'a> {
    mutex: &'a KeyedMutex,
    key: &'a str,
    rx: Option<oneshot::Receiver<()>>,
}

impl Waiter<'_> {
    async fn granted(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            // Senders are only dropped unsent once this receiver is gone.
            let _ = rx.await;
        }
        self.rx = None;
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                let _ = self.mutex.unlock(self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::timeout;

    async fn wait_for_queue(mutex: &KeyedMutex, key: &str, len: usize) {
        while mutex.waiting(key) < len {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_lock_granted_immediately() {
        let mutex = KeyedMutex::new();
        timeout(Duration::from_millis(100), mutex.lock("a"))
            .await
            .expect("uncontended lock should not wait");
        assert!(mutex.is_locked("a"));

        mutex.unlock("a").unwrap();
        assert!(!mutex.is_locked("a"));
    }

    #[tokio::test]
    async fn test_unlock_without_lock_fails() {
        let mutex = KeyedMutex::new();
        let err = mutex.unlock("missing").unwrap_err();
        assert_eq!(err, LockError::NotLocked("missing".to_string()));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let mutex = KeyedMutex::new();
        mutex.lock("a").await;
        timeout(Duration::from_millis(100), mutex.lock("b"))
            .await
            .expect("different key should not contend");
        mutex.unlock("a").unwrap();
        mutex.unlock("b").unwrap();
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_fifo_order() {
        let mutex = Arc::new(KeyedMutex::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        mutex.lock("k").await;

        let mut handles = Vec::new();
        for id in 1..=4 {
            let m = mutex.clone();
            let o = order.clone();
            handles.push(tokio::spawn(async move {
                m.lock("k").await;
                o.lock().unwrap().push(id);
                m.unlock("k").unwrap();
            }));
            wait_for_queue(&mutex, "k", id).await;
        }

        mutex.unlock("k").unwrap();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3, 4]);
        assert!(!mutex.is_locked("k"));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_strand_key() {
        let mutex = Arc::new(KeyedMutex::new());
        mutex.lock("k").await;

        let m = mutex.clone();
        let abandoned = tokio::spawn(async move {
            m.lock("k").await;
        });
        wait_for_queue(&mutex, "k", 1).await;
        abandoned.abort();
        assert!(abandoned.await.is_err());

        mutex.unlock("k").unwrap();
        timeout(Duration::from_millis(100), mutex.lock("k"))
            .await
            .expect("key should be free after the only waiter left");
    }

    #[tokio::test]
    async fn test_guard_releases_on_explicit_unlock() {
        let mutex = KeyedMutex::new();
        let guard = mutex.lock_guard("g").await;
        assert!(mutex.is_locked("g"));
        guard.unlock().unwrap();
        assert!(!mutex.is_locked("g"));
    }

    #[tokio::test]
    async fn test_holder_cancelled_while_holding_passes_key_on() {
        let mutex = Arc::new(KeyedMutex::new());

        let m = mutex.clone();
        let holder = tokio::spawn(async move {
            let _guard = m.lock_guard("k").await;
            tokio::time::sleep(Duration::from_secs(60)).await;
        });
        while !mutex.is_locked("k") {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let m = mutex.clone();
        let next = tokio::spawn(async move {
            m.lock("k").await;
            m.unlock("k").unwrap();
        });
        wait_for_queue(&mutex, "k", 1).await;

        holder.abort();
        assert!(holder.await.is_err());
        timeout(Duration::from_millis(100), next)
            .await
            .expect("waiter should be granted the key of a cancelled holder")
            .unwrap();
        assert!(!mutex.is_locked("k"));
    }
}
