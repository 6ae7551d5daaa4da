//! Nonce coordination for proxied gateway transactions.
//!
//! Issues monotonically advancing nonces per (signer, nonce class) to
//! concurrent callers, reconciling a local cache against the chain.

pub mod config;
pub mod lock;
pub mod nonce;
pub mod observability;
pub mod store;

pub use config::SdkConfig;
pub use nonce::{ChainNonceQuery, GatewayNonceQuery, NonceCoordinator, NonceError};
pub use store::{MemoryNonceStore, NonceClass, NonceStore};
