//! # Error Policy
//!
//! Requeue decisions for failed reconciles.

use crate::controller::backoff::ExponentialBackoff;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::OperatorConfig;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{error, info};

/// Log the failure and requeue the singleton with exponential backoff
///
/// The backoff is shared by every trigger: all events map onto the same
/// object, and a successful reconcile resets it.
pub fn handle_reconciliation_error(
    obj: Arc<OperatorConfig>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("unknown");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {}", namespace, name, error);
    metrics::increment_reconciliation_errors();

    requeue_with_backoff(&ctx.backoff)
}

/// Advance `backoff` and requeue after its delay
fn requeue_with_backoff(backoff: &Mutex<ExponentialBackoff>) -> Action {
    let mut backoff = backoff.lock().unwrap_or_else(PoisonError::into_inner);
    let delay = backoff.next_backoff();
    info!(
        "🔄 Retrying in {:?} (failure {}, trigger source: error-backoff)",
        delay,
        backoff.failures()
    );
    Action::requeue(delay)
}
