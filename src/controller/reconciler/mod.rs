//! # Reconciler
//!
//! Applies the compiled monitoring configuration to the cluster.
//!
//! The reconciler:
//! - Compiles collector, rule-evaluator and rule file configuration
//! - Mirrors only the referenced secret bytes into operator-owned secrets
//! - Patches runtime flags into the collector and rule-evaluator
//! - Reports per-resource outcomes in status conditions
//!
//! ## Module Structure
//!
//! - `types.rs` - Shared reconciler state and errors
//! - `reconcile.rs` - One reconcile pass
//! - `artifacts.rs` - Generated objects and workload flags
//! - `status.rs` - Status condition updates

pub mod artifacts;
pub mod reconcile;
pub mod status;
pub mod types;

pub use reconcile::{default_singleton, ensure_operator_config, reconcile};
pub use types::{Reconciler, ReconcilerError};
