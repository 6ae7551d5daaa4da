//! Nonce coordination subsystem.
//!
//! # Data Flow
//! ```text
//! transaction pipeline: "next nonce for (signer, class)"
//!     → account.rs (address or key → canonical AccountKey)
//!     → coordinator.rs (local lock → backend lock → fresh/stale decision)
//!         → store (NonceStore)
//!         → chain.rs (ChainNonceQuery, only when the entry is stale)
//! ```
//!
//! # Guarantees
//! - Calls for one (account, class) are serialized, in-process and across processes
//! - Locks are released on every exit path
//! - The only internal retry is the bounded backend lock poll

pub mod account;
pub mod chain;
pub mod coordinator;
pub mod error;

pub use account::{AccountDirectory, AccountKey};
pub use chain::{ChainNonceQuery, ChainQueryError, GatewayNonceQuery};
pub use coordinator::NonceCoordinator;
pub use error::{NonceError, NonceResult};
