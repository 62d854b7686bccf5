//! # Types
//!
//! Core types for the reconciler.

use crate::config::ControllerConfig;
use crate::controller::backoff::ExponentialBackoff;
use crate::controller::compiler::ConfigCompiler;
use crate::controller::secrets::{ObjectReader, ResolveError, SecretSource, SecretWatchProvider};
use crate::observability::metrics;
use kube::Client;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to render {artifact}: {source}")]
    Render {
        artifact: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to read referenced object: {0}")]
    Resolve(#[from] ResolveError),

    #[error("reconcile did not finish within {0:?}")]
    Timeout(Duration),
}

/// Shared state of the reconciler
pub struct Reconciler {
    pub client: Client,
    pub config: ControllerConfig,
    pub compiler: ConfigCompiler,
    pub reader: Arc<dyn ObjectReader>,
    pub watches: Arc<SecretWatchProvider>,
    /// Secrets this reconciler currently holds a watch reference on
    held: Mutex<BTreeSet<SecretSource>>,
    /// Retry delay after failed reconciles, reset by the next success
    pub backoff: Mutex<ExponentialBackoff>,
}

impl fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .field("compiler", &self.compiler)
            .field("watches", &self.watches)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        client: Client,
        config: ControllerConfig,
        reader: Arc<dyn ObjectReader>,
        watches: Arc<SecretWatchProvider>,
    ) -> Self {
        let backoff = ExponentialBackoff::new(
            config.backoff_start_duration(),
            config.backoff_max_duration(),
        );
        let compiler = ConfigCompiler::new(
            config.default_labels(),
            &config.operator_namespace,
            &config.public_namespace,
        );
        Self {
            client,
            config,
            compiler,
            reader,
            watches,
            held: Mutex::new(BTreeSet::new()),
            backoff: Mutex::new(backoff),
        }
    }

    pub fn reset_backoff(&self) {
        self.backoff
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
    }

    /// Hold exactly one watch reference per secret in `desired`
    pub fn sync_secret_watches(&self, desired: &BTreeSet<SecretSource>) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);

        let stale: Vec<SecretSource> = held.difference(desired).cloned().collect();
        for source in stale {
            if let Err(e) = self.watches.remove(&source) {
                debug!("Releasing watch on {}: {}", source, e);
            }
            held.remove(&source);
        }

        for source in desired.difference(&held.clone()) {
            match self.watches.add(source) {
                Ok(_) => {
                    held.insert(source.clone());
                }
                Err(e) => warn!("Failed to watch {}: {}", source, e),
            }
        }

        metrics::set_active_secret_watches(self.watches.active_watches());
    }

    /// Secrets currently held
    #[must_use]
    pub fn held_secret_watches(&self) -> BTreeSet<SecretSource> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
