//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! lock, store, chain and coordinator code produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → stderr via tracing-subscriber
//!     → whatever metrics recorder the host application installs
//! ```
//!
//! # Design Decisions
//! - Metrics are no-ops until a recorder is installed
//! - Account keys are logged; private material never reaches this crate

pub mod logging;
pub mod metrics;
