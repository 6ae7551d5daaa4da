//! Metrics collection.
//!
//! # Metrics
//! - `nonce_issued_total` (counter): nonces handed out, by path
//!   (`fresh`, `chain_sync`, `chain_lag`)
//! - `nonce_lock_wait_seconds` (histogram): time spent polling the backend lock
//! - `nonce_lock_timeouts_total` (counter): backend lock waits that gave up
//! - `nonce_chain_queries_total` (counter): gateway nonce queries, by outcome

use std::time::Duration;

pub fn record_nonce_issued(path: &'static str) {
    ::metrics::counter!("nonce_issued_total", "path" => path).increment(1);
}

pub fn record_lock_wait(waited: Duration) {
    ::metrics::histogram!("nonce_lock_wait_seconds").record(waited.as_secs_f64());
}

pub fn record_lock_timeout() {
    ::metrics::counter!("nonce_lock_timeouts_total").increment(1);
}

pub fn record_chain_query(outcome: &'static str) {
    ::metrics::counter!("nonce_chain_queries_total", "outcome" => outcome).increment(1);
}
