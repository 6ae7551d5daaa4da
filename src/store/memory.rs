//! In-process nonce store.
//!
//! With a snapshot path, the store takes an exclusive lock on
//! `<snapshot>.lock` before loading and keeps it until the last clone is
//! dropped, so one process at a time runs its load, issue and save cycle.
//! Saves write `<snapshot>.tmp` and rename it over the snapshot.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::nonce::account::AccountKey;
use crate::store::types::{
    now_ms, LockAttempt, LockId, NonceClass, NonceEntry, StoreError, StoreResult,
};
use crate::store::NonceStore;

type EntryKey = (AccountKey, NonceClass);

/// One persisted entry. Lock state is deliberately absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRecord {
    account: AccountKey,
    class: NonceClass,
    nonce: Option<u64>,
    last_updated_ms: Option<u64>,
}

/// Exclusive advisory lock on the snapshot's lock file.
struct SnapshotLock {
    file: File,
    path: PathBuf,
}

impl SnapshotLock {
    /// Block until no other process holds the lock for `snapshot`.
    fn acquire(snapshot: &str) -> StoreResult<Self> {
        let path = PathBuf::from(format!("{}.lock", snapshot));
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)?;

        if file.try_lock_exclusive().is_err() {
            tracing::info!(lock = %path.display(), "Snapshot in use by another process, waiting");
            file.lock_exclusive()?;
        }
        Ok(Self { file, path })
    }
}

impl Drop for SnapshotLock {
    fn drop(&mut self) {
        // The lock file stays on disk; waiters may already have it open.
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release snapshot lock");
        }
    }
}

/// Nonce store backed by a concurrent map, shared by cloning.
#[derive(Clone, Default)]
pub struct MemoryNonceStore {
    inner: Arc<DashMap<EntryKey, NonceEntry>>,
    snapshot_path: Option<String>,
    snapshot_lock: Option<Arc<SnapshotLock>>,
}

impl MemoryNonceStore {
    /// Create an empty store with no persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from configuration, loading the snapshot if one exists.
    pub fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let store = match &config.snapshot_path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::new(),
        };
        tracing::info!(
            entries = store.len(),
            snapshot = ?store.snapshot_path,
            "Memory nonce store ready"
        );
        Ok(store)
    }

    /// Lock the snapshot at `path`, then load its entries if it exists.
    ///
    /// Blocks while another store holds the snapshot. All entries load unlocked.
    pub fn load_from_file(path: &str) -> StoreResult<Self> {
        let lock = SnapshotLock::acquire(path)?;
        let store = Self {
            inner: Arc::new(DashMap::new()),
            snapshot_path: Some(path.to_string()),
            snapshot_lock: Some(Arc::new(lock)),
        };
        if Path::new(path).exists() {
            let reader = BufReader::new(File::open(path)?);
            let records: Vec<SnapshotRecord> = serde_json::from_reader(reader)?;
            for record in records {
                store.inner.insert(
                    (record.account, record.class),
                    NonceEntry {
                        nonce: record.nonce,
                        last_updated_ms: record.last_updated_ms,
                        locked: false,
                        lock_id: None,
                    },
                );
            }
            tracing::info!("Loaded {} nonce entries from snapshot", store.inner.len());
        }
        Ok(store)
    }

    /// Write all entries to the snapshot path, if configured.
    ///
    /// The previous snapshot stays intact until the new one is fully written.
    pub fn save_snapshot(&self) -> StoreResult<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let mut records: Vec<SnapshotRecord> = self
            .inner
            .iter()
            .map(|r| SnapshotRecord {
                account: r.key().0.clone(),
                class: r.key().1,
                nonce: r.value().nonce,
                last_updated_ms: r.value().last_updated_ms,
            })
            .collect();
        records.sort_by(|a, b| (&a.account, a.class).cmp(&(&b.account, b.class)));

        let tmp = format!("{}.tmp", path);
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, &records)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&tmp, path)?;

        tracing::info!("Saved {} nonce entries to snapshot", records.len());
        Ok(())
    }

    /// Copy of the current entry, for inspection.
    pub fn entry(&self, account: &AccountKey, class: NonceClass) -> Option<NonceEntry> {
        self.inner
            .get(&(account.clone(), class))
            .map(|r| r.value().clone())
    }

    /// All entries for `account`, ordered by class.
    pub fn entries_for(&self, account: &AccountKey) -> Vec<(NonceClass, NonceEntry)> {
        NonceClass::ALL
            .iter()
            .filter_map(|class| self.entry(account, *class).map(|e| (*class, e)))
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Borrow the entry mutably, checking that `lock_id` holds it.
    fn held_entry(
        &self,
        lock_id: &LockId,
        account: &AccountKey,
        class: NonceClass,
    ) -> StoreResult<RefMut<'_, EntryKey, NonceEntry>> {
        let entry = self
            .inner
            .get_mut(&(account.clone(), class))
            .ok_or_else(|| StoreError::EntryNotFound {
                account: account.clone(),
                class,
            })?;

        if !entry.locked || entry.lock_id.as_ref() != Some(lock_id) {
            return Err(StoreError::LockMismatch {
                account: account.clone(),
                class,
                presented: *lock_id,
            });
        }
        Ok(entry)
    }
}

#[async_trait]
impl NonceStore for MemoryNonceStore {
    async fn init_user_nonce_cache(&self, account: &AccountKey) -> StoreResult<()> {
        for class in NonceClass::ALL {
            self.inner.entry((account.clone(), class)).or_default();
        }
        Ok(())
    }

    async fn is_nonce_locked(&self, account: &AccountKey, class: NonceClass) -> StoreResult<bool> {
        Ok(self
            .inner
            .get(&(account.clone(), class))
            .map(|r| r.value().locked)
            .unwrap_or(false))
    }

    async fn get_nonce_and_lock(
        &self,
        account: &AccountKey,
        class: NonceClass,
    ) -> StoreResult<LockAttempt> {
        let mut entry = self
            .inner
            .get_mut(&(account.clone(), class))
            .ok_or_else(|| StoreError::EntryNotFound {
                account: account.clone(),
                class,
            })?;

        if entry.locked {
            return Ok(LockAttempt::Held);
        }

        let lock_id = LockId::new();
        entry.locked = true;
        entry.lock_id = Some(lock_id);
        Ok(LockAttempt::Acquired {
            entry: entry.value().clone(),
            lock_id,
        })
    }

    async fn increment_nonce(
        &self,
        lock_id: &LockId,
        account: &AccountKey,
        class: NonceClass,
        refresh_timestamp: bool,
    ) -> StoreResult<NonceEntry> {
        let mut entry = self.held_entry(lock_id, account, class)?;
        let current = entry.nonce.ok_or_else(|| StoreError::NonceUnset {
            account: account.clone(),
            class,
        })?;

        let next = current.checked_add(1).ok_or_else(|| StoreError::NonceOverflow {
            account: account.clone(),
            class,
            value: current,
        })?;

        entry.nonce = Some(next);
        if refresh_timestamp {
            entry.last_updated_ms = Some(now_ms());
        }
        Ok(entry.value().clone())
    }

    async fn set_nonce(
        &self,
        lock_id: &LockId,
        account: &AccountKey,
        class: NonceClass,
        value: u64,
    ) -> StoreResult<NonceEntry> {
        let mut entry = self.held_entry(lock_id, account, class)?;
        entry.nonce = Some(value);
        entry.last_updated_ms = Some(now_ms());
        Ok(entry.value().clone())
    }

    async fn unlock_nonce(&self, account: &AccountKey, class: NonceClass) {
        if let Some(mut entry) = self.inner.get_mut(&(account.clone(), class)) {
            entry.locked = false;
            entry.lock_id = None;
        }
    }
}

impl std::fmt::Debug for MemoryNonceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNonceStore")
            .field("entries", &self.inner.len())
            .field("snapshot_path", &self.snapshot_path)
            .field("snapshot_locked", &self.snapshot_lock.is_some())
            .finish()
    }
}
