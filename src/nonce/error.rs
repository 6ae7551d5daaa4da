//! Errors surfaced to callers of the nonce coordinator.

use std::time::Duration;

use thiserror::Error;

use crate::lock::LockError;
use crate::nonce::account::AccountKey;
use crate::nonce::chain::ChainQueryError;
use crate::store::{NonceClass, StoreError};

#[derive(Debug, Error)]
pub enum NonceError {
    /// The account was never initialized. Not retryable.
    #[error("nonce cache not initialized for account {account} class {class}")]
    EntryMissing { account: AccountKey, class: NonceClass },

    /// Another holder kept the backend lock past the wait window.
    #[error("backend lock for account {account} class {class} not acquired within {waited:?}")]
    LockTimeout {
        account: AccountKey,
        class: NonceClass,
        waited: Duration,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    ChainQuery(#[from] ChainQueryError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    /// An address that was never registered against a public key.
    #[error("address {0} is not registered to any public key")]
    UnknownAddress(String),
}

/// Result type for nonce operations.
pub type NonceResult<T> = Result<T, NonceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let account = AccountKey::from_public_key(&"cd".repeat(33)).unwrap();
        let err = NonceError::LockTimeout {
            account,
            class: NonceClass::Staking,
            waited: Duration::from_millis(120_500),
        };
        let msg = err.to_string();
        assert!(msg.contains("staking"));
        assert!(msg.contains("120.5s"));

        let err = NonceError::from(ChainQueryError::Timeout(10));
        assert_eq!(err.to_string(), "gateway RPC timeout after 10 seconds");
    }
}
