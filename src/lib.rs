//! Monitoring Operator Library
//!
//! Core functionality of the monitoring operator: the configuration compiler,
//! secret resolution and watches, the reconciler, webhook certificates and the
//! admission webhooks. Tests are included in the module files and under `tests/`.

pub mod certs;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod webhook;
