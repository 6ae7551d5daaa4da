//! Account key normalization.
//!
//! Every cache operation is keyed by the signer's public key in one canonical
//! form. Callers may hold either the public key (any case, optional `0x`) or
//! the signer's address; addresses are resolved through [`AccountDirectory`].

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::nonce::error::{NonceError, NonceResult};

/// Byte lengths accepted as a public key (compressed/uncompressed, with or without tag).
const PUBLIC_KEY_LENGTHS: [usize; 4] = [32, 33, 64, 65];

/// Byte length of an account address.
const ADDRESS_LENGTH: usize = 20;

/// Canonical public-key form: lowercase hex without prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountKey(String);

impl AccountKey {
    /// Parse a hex public key into canonical form.
    pub fn from_public_key(input: &str) -> NonceResult<Self> {
        let hex = normalize_hex(input)?;
        if !PUBLIC_KEY_LENGTHS.contains(&(hex.len() / 2)) {
            return Err(NonceError::InvalidAccount(format!(
                "public key must be one of {:?} bytes, got {}",
                PUBLIC_KEY_LENGTHS,
                hex.len() / 2
            )));
        }
        Ok(Self(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Strip an optional `0x` prefix, lowercase, and check the result is even-length hex.
fn normalize_hex(input: &str) -> NonceResult<String> {
    let trimmed = input.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if body.is_empty() {
        return Err(NonceError::InvalidAccount("empty account key".to_string()));
    }
    if !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(NonceError::InvalidAccount(format!(
            "'{}' is not hex encoded",
            input
        )));
    }
    if body.len() % 2 != 0 {
        return Err(NonceError::InvalidAccount(format!(
            "'{}' has an odd number of hex digits",
            input
        )));
    }
    Ok(body.to_ascii_lowercase())
}

/// Maps signer addresses to their public keys.
#[derive(Debug, Default)]
pub struct AccountDirectory {
    by_address: DashMap<String, AccountKey>,
}

impl AccountDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `address` belongs to `public_key`.
    pub fn register(&self, address: &str, public_key: &str) -> NonceResult<AccountKey> {
        let address = normalize_address(address)?;
        let key = AccountKey::from_public_key(public_key)?;
        if let Some(previous) = self.by_address.insert(address.clone(), key.clone()) {
            if previous != key {
                tracing::warn!(
                    address = %address,
                    previous = %previous,
                    public_key = %key,
                    "Address re-registered to a different public key"
                );
            }
        }
        Ok(key)
    }

    /// Resolve a public key or a registered address to its canonical key.
    pub fn resolve(&self, input: &str) -> NonceResult<AccountKey> {
        let hex = normalize_hex(input)?;
        if hex.len() / 2 == ADDRESS_LENGTH {
            return self
                .by_address
                .get(&hex)
                .map(|key| key.value().clone())
                .ok_or(NonceError::UnknownAddress(hex));
        }
        AccountKey::from_public_key(&hex)
    }

    /// Number of registered addresses.
    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_address.is_empty()
    }
}

fn normalize_address(input: &str) -> NonceResult<String> {
    let hex = normalize_hex(input)?;
    if hex.len() / 2 != ADDRESS_LENGTH {
        return Err(NonceError::InvalidAccount(format!(
            "address must be {} bytes, got {}",
            ADDRESS_LENGTH,
            hex.len() / 2
        )));
    }
    Ok(hex)
}
