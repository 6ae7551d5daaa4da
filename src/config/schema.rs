//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the SDK.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SdkConfig {
    /// Gateway JSON-RPC settings.
    pub gateway: GatewayConfig,

    /// Nonce coordination timings.
    pub nonce: NonceConfig,

    /// Nonce cache backend.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Gateway connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// JSON-RPC method returning an account's nonce.
    pub nonce_method: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:3030".to_string(),
            failover_urls: Vec::new(),
            rpc_timeout_secs: 10,
            nonce_method: "getNonce".to_string(),
        }
    }
}

/// Nonce coordination timings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NonceConfig {
    /// Longest time a transaction needs to land on-chain, in milliseconds.
    /// Cached nonces older than this are reconciled with the chain.
    pub processing_time_ms: u64,

    /// Delay between backend lock attempts, in milliseconds.
    pub lock_poll_interval_ms: u64,
}

impl NonceConfig {
    pub fn processing_time(&self) -> Duration {
        Duration::from_millis(self.processing_time_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock_poll_interval_ms)
    }
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            processing_time_ms: 120_000,
            lock_poll_interval_ms: 500,
        }
    }
}

/// Nonce cache backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file the in-memory store is loaded from and saved to.
    pub snapshot_path: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
