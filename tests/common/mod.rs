//! Shared utilities for integration testing.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use gateway_nonce::config::NonceConfig;
use gateway_nonce::nonce::{AccountKey, ChainNonceQuery, ChainQueryError};
use gateway_nonce::NonceClass;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[allow(dead_code)]
pub const PUBKEY: &str = "02f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9";

#[allow(dead_code)]
pub fn nonce_config(processing_time_ms: u64, lock_poll_interval_ms: u64) -> NonceConfig {
    NonceConfig {
        processing_time_ms,
        lock_poll_interval_ms,
    }
}

/// Chain nonce source whose answer can be changed or made to fail mid-test.
#[allow(dead_code)]
pub struct ScriptedChain {
    pub nonce: AtomicU64,
    pub fail: AtomicBool,
    pub calls: AtomicU32,
}

#[allow(dead_code)]
impl ScriptedChain {
    pub fn new(nonce: u64) -> Self {
        Self {
            nonce: AtomicU64::new(nonce),
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChainNonceQuery for ScriptedChain {
    async fn get_authoritative_nonce(
        &self,
        _account: &AccountKey,
        _class: NonceClass,
    ) -> Result<u64, ChainQueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChainQueryError::Rpc("injected failure".to_string()));
        }
        Ok(self.nonce.load(Ordering::SeqCst))
    }
}

/// Start a mock JSON-RPC gateway on an ephemeral port.
///
/// `f` receives the parsed request body and returns a status code and response body.
#[allow(dead_code)]
pub async fn start_mock_gateway<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let Some(body) = read_request_body(&mut socket).await else {
                            return;
                        };
                        let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
                        let (status, body) = f(request).await;
                        let status_text = match status {
                            200 => "200 OK",
                            500 => "500 Internal Server Error",
                            502 => "502 Bad Gateway",
                            503 => "503 Service Unavailable",
                            _ => "200 OK",
                        };

                        let response_str = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_text,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// An address nothing is listening on.
#[allow(dead_code)]
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[allow(dead_code)]
async fn read_request_body(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut reader = BufReader::new(socket);
    let mut content_length = 0usize;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await.ok()? == 0 {
            return None;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok()?;
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.ok()?;
    Some(body)
}
