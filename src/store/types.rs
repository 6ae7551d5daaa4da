//! Nonce cache entries, lock tokens, and store errors.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::nonce::account::AccountKey;

/// Category of transaction with its own nonce sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonceClass {
    Transfer,
    Staking,
    Payment,
}

impl NonceClass {
    /// Every class; one cache entry per class is created for each account.
    pub const ALL: [NonceClass; 3] = [NonceClass::Transfer, NonceClass::Staking, NonceClass::Payment];

    pub fn as_str(&self) -> &'static str {
        match self {
            NonceClass::Transfer => "transfer",
            NonceClass::Staking => "staking",
            NonceClass::Payment => "payment",
        }
    }
}

impl fmt::Display for NonceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NonceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "transfer" => Ok(NonceClass::Transfer),
            "staking" => Ok(NonceClass::Staking),
            "payment" => Ok(NonceClass::Payment),
            other => Err(format!(
                "unknown nonce class '{}', expected transfer, staking or payment",
                other
            )),
        }
    }
}

/// Token identifying the current holder of a backend lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockId(Uuid);

impl LockId {
    /// Generate a fresh random token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Cached nonce state for one (account, class).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NonceEntry {
    /// Last nonce issued or confirmed; `None` until first synchronized.
    pub nonce: Option<u64>,
    /// Milliseconds since epoch of the last chain-synchronized update.
    pub last_updated_ms: Option<u64>,
    /// True while a holder is mutating this entry.
    pub locked: bool,
    /// Token of the current holder.
    pub lock_id: Option<LockId>,
}

impl NonceEntry {
    /// Whether the cached nonce can no longer be trusted without asking the chain.
    ///
    /// Never-synchronized entries are always stale.
    pub fn is_stale(&self, now_ms: u64, threshold: Duration) -> bool {
        match self.last_updated_ms {
            None => true,
            Some(updated) => {
                now_ms.saturating_sub(updated) >= threshold.as_millis() as u64
            }
        }
    }
}

/// Result of a single, non-blocking attempt to take the backend lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    /// Lock taken; `entry` is the state observed at acquisition.
    Acquired { entry: NonceEntry, lock_id: LockId },
    /// Another holder has the lock.
    Held,
}

/// Errors raised by a nonce store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The entry was never created with `init_user_nonce_cache`.
    #[error("no nonce entry for account {account} class {class}")]
    EntryNotFound { account: AccountKey, class: NonceClass },

    /// A mutating call presented a token that does not hold the lock.
    #[error("lock id {presented} does not hold the lock for account {account} class {class}")]
    LockMismatch {
        account: AccountKey,
        class: NonceClass,
        presented: LockId,
    },

    /// Increment requested before the entry was ever synchronized.
    #[error("nonce for account {account} class {class} has never been set")]
    NonceUnset { account: AccountKey, class: NonceClass },

    /// Incrementing would exceed `u64::MAX`.
    #[error("nonce for account {account} class {class} cannot be incremented past {value}")]
    NonceOverflow {
        account: AccountKey,
        class: NonceClass,
        value: u64,
    },

    /// Backend connectivity or protocol failure.
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("snapshot IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot format error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Current wall-clock time in milliseconds since the epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsynchronized_entry_is_stale() {
        let entry = NonceEntry::default();
        assert!(entry.is_stale(now_ms(), Duration::from_secs(120)));
    }

    #[test]
    fn test_staleness_threshold_is_inclusive() {
        let entry = NonceEntry {
            nonce: Some(4),
            last_updated_ms: Some(1_000),
            ..Default::default()
        };
        let threshold = Duration::from_millis(500);
        assert!(!entry.is_stale(1_499, threshold));
        assert!(entry.is_stale(1_500, threshold));
        // Clock going backwards never makes an entry stale
        assert!(!entry.is_stale(900, threshold));
    }

    #[test]
    fn test_nonce_class_parsing() {
        assert_eq!("Staking".parse::<NonceClass>().unwrap(), NonceClass::Staking);
        assert!("mint".parse::<NonceClass>().is_err());
        assert_eq!(NonceClass::Payment.to_string(), "payment");
        assert_eq!(serde_json::to_string(&NonceClass::Transfer).unwrap(), "\"transfer\"");
    }

    #[test]
    fn test_lock_ids_are_unique() {
        assert_ne!(LockId::new(), LockId::new());
    }
}
