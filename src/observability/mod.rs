//! # Observability
//!
//! Observability modules for metrics.
//!
//! - `metrics`: Prometheus metrics collection
//!
//! Tracing is initialised by the binary with `tracing-subscriber`.

pub mod metrics;
