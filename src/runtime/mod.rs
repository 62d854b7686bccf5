//! # Runtime
//!
//! Process bootstrap and the top-level run loop of the `monitoring-operator` binary.

pub mod error_policy;
pub mod initialization;
pub mod run;
pub mod watch_loop;

pub use initialization::{initialize, InitializationResult};
pub use run::run;
pub use watch_loop::run_watch_loop;
