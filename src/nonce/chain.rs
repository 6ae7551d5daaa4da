//! Authoritative nonce queries against the gateway.
//!
//! # Responsibilities
//! - Ask the gateway for an account's next usable nonce per class
//! - Bound every RPC call with a timeout
//! - Fail over across configured endpoints
//!
//! The gateway speaks JSON-RPC 2.0:
//! ```text
//! → {"jsonrpc":"2.0","id":1,"method":"getNonce","params":{"publicKey":"02ab..","nonceClass":"transfer"}}
//! ← {"jsonrpc":"2.0","id":1,"result":{"nonce":12}}
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;
use url::Url;

use crate::config::GatewayConfig;
use crate::nonce::account::AccountKey;
use crate::observability::metrics;
use crate::store::NonceClass;

/// Errors from the chain nonce source.
#[derive(Debug, Error)]
pub enum ChainQueryError {
    /// Transport failure on every endpoint, or a bad endpoint configuration.
    #[error("gateway RPC error: {0}")]
    Rpc(String),

    /// Every endpoint timed out.
    #[error("gateway RPC timeout after {0} seconds")]
    Timeout(u64),

    /// The gateway answered with a JSON-RPC error object.
    #[error("gateway rejected nonce query ({code}): {message}")]
    Rejected { code: i64, message: String },

    /// The gateway answered without a result or an error.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

/// Source of truth for on-chain nonces.
#[async_trait]
pub trait ChainNonceQuery: Send + Sync {
    /// The account's next usable nonce for `class`, as the chain sees it.
    async fn get_authoritative_nonce(
        &self,
        account: &AccountKey,
        class: NonceClass,
    ) -> Result<u64, ChainQueryError>;
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: NonceParams<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NonceParams<'a> {
    public_key: &'a str,
    nonce_class: NonceClass,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<NonceBody>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct NonceBody {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcResponse {
    fn into_nonce(self) -> Result<u64, ChainQueryError> {
        match (self.result, self.error) {
            (_, Some(err)) => Err(ChainQueryError::Rejected {
                code: err.code,
                message: err.message,
            }),
            (Some(body), None) => Ok(body.nonce),
            (None, None) => Err(ChainQueryError::InvalidResponse(
                "response has neither result nor error".to_string(),
            )),
        }
    }
}

/// JSON-RPC nonce client with failover.
pub struct GatewayNonceQuery {
    http: reqwest::Client,
    /// Primary endpoint first, then failovers.
    endpoints: Vec<Url>,
    method: String,
    timeout_secs: u64,
    next_id: AtomicU64,
}

impl GatewayNonceQuery {
    /// Build a client from gateway configuration.
    ///
    /// An invalid primary URL is an error; invalid failover URLs are skipped.
    pub fn new(config: &GatewayConfig) -> Result<Self, ChainQueryError> {
        let primary: Url = config.rpc_url.parse().map_err(|e| {
            ChainQueryError::Rpc(format!("Invalid RPC URL '{}': {}", config.rpc_url, e))
        })?;

        let mut endpoints = vec![primary];
        for url_str in &config.failover_urls {
            match url_str.parse() {
                Ok(url) => endpoints.push(url),
                Err(_) => tracing::warn!(url = %url_str, "Ignoring invalid failover RPC URL"),
            }
        }

        tracing::info!(
            rpc_url = %config.rpc_url,
            endpoints = endpoints.len(),
            method = %config.nonce_method,
            "Gateway nonce client initialized"
        );

        Ok(Self {
            http: reqwest::Client::new(),
            endpoints,
            method: config.nonce_method.clone(),
            timeout_secs: config.rpc_timeout_secs,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, url: &Url, request: &RpcRequest<'_>) -> Result<RpcResponse, reqwest::Error> {
        self.http
            .post(url.clone())
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }
}

#[async_trait]
impl ChainNonceQuery for GatewayNonceQuery {
    async fn get_authoritative_nonce(
        &self,
        account: &AccountKey,
        class: NonceClass,
    ) -> Result<u64, ChainQueryError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: &self.method,
            params: NonceParams {
                public_key: account.as_str(),
                nonce_class: class,
            },
        };
        let limit = Duration::from_secs(self.timeout_secs);
        let mut all_timed_out = true;

        for (i, url) in self.endpoints.iter().enumerate() {
            match timeout(limit, self.call(url, &request)).await {
                Ok(Ok(response)) => {
                    let outcome = response.into_nonce();
                    metrics::record_chain_query(if outcome.is_ok() { "ok" } else { "rejected" });
                    return outcome;
                }
                Ok(Err(e)) => {
                    all_timed_out = false;
                    tracing::warn!(provider_idx = i, error = %e, "RPC error, trying next provider");
                }
                Err(_) => {
                    tracing::warn!(provider_idx = i, "RPC timeout, trying next provider");
                }
            }
        }

        metrics::record_chain_query("failed");
        if all_timed_out {
            Err(ChainQueryError::Timeout(self.timeout_secs))
        } else {
            Err(ChainQueryError::Rpc("All RPC providers failed".to_string()))
        }
    }
}

impl std::fmt::Debug for GatewayNonceQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayNonceQuery")
            .field("endpoints", &self.endpoints.len())
            .field("method", &self.method)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}
