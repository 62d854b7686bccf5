//! # Run
//!
//! Starts the webhook server and CA bundle publisher, makes sure the
//! `OperatorConfig` singleton exists, then drives the controller until a
//! shutdown signal arrives.

use super::initialization::InitializationResult;
use crate::certs::{self, CaBundlePublisher};
use crate::controller::reconciler::ensure_operator_config;
use crate::runtime::watch_loop::run_watch_loop;
use crate::webhook::{self, WebhookState};
use anyhow::{Context, Result};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Run the operator until shutdown
///
/// # Errors
///
/// Fails when no usable webhook certificate can be obtained; the operator
/// must not run with admission unprotected.
pub async fn run(init: InitializationResult) -> Result<()> {
    let InitializationResult {
        client,
        controller_config,
        server_config,
        server_state,
        reconciler,
        triggers,
        cancel,
    } = init;

    let material = certs::provision(&client, &controller_config, &server_config)
        .await
        .context("Failed to obtain webhook certificate")?;

    let state = Arc::new(WebhookState::new(controller_config.public_namespace.clone()));
    let webhook_port = server_config.webhook_port;
    let webhook_cancel = cancel.child_token();
    let webhook_material = material.clone();
    tokio::spawn(async move {
        if let Err(e) = webhook::serve(webhook_port, state, &webhook_material, webhook_cancel).await
        {
            error!("Webhook server error: {}", e);
        }
    });

    let publisher = CaBundlePublisher::new(
        client.clone(),
        controller_config.webhook_config_name(),
        material.ca_bundle,
        controller_config.ca_bundle_publish_interval(),
    );
    tokio::spawn(publisher.run(cancel.child_token()));

    if let Err(e) = ensure_operator_config(&client, &controller_config.public_namespace).await {
        // Retried when the controller finds the singleton missing
        warn!("Failed to ensure the OperatorConfig singleton exists: {}", e);
    }

    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal, waiting for in-flight reconciles to complete...");
        shutdown_state.is_ready.store(false, Ordering::Relaxed);
    });

    // Stops on SIGINT or SIGTERM once the running reconcile finishes
    run_watch_loop(reconciler, triggers).await;

    server_state.is_ready.store(false, Ordering::Relaxed);
    cancel.cancel();
    info!("Operator stopped");
    Ok(())
}
