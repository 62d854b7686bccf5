//! # Controller
//!
//! Core controller modules for the monitoring operator.
//!
//! - `backoff`: Exponential backoff for failed reconciles
//! - `compiler`: Monitoring resources to collector and rule-evaluator configuration
//! - `reconciler`: Core reconciliation logic
//! - `secrets`: Secret resolution and refcounted secret watches

pub mod backoff;
pub mod compiler;
pub mod reconciler;
pub mod secrets;
