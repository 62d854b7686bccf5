//! # Initialization
//!
//! Controller initialization: rustls setup, tracing, metrics, probe server
//! startup, Kubernetes client and reconciler wiring.

use crate::config::{load_config, ControllerConfig, ServerConfig};
use crate::controller::reconciler::Reconciler;
use crate::controller::secrets::watch::{
    ChangeNotifier, KubeSecretWatchSource, RetryPolicy, SecretIdentity, SecretWatchProvider,
};
use crate::controller::secrets::KubeObjectReader;
use crate::crd::OperatorConfig;
use crate::observability;
use crate::runtime::watch_loop::singleton_ref;
use crate::server::{start_server, ServerState};
use anyhow::{Context, Result};
use futures::channel::mpsc;
use kube::Client;
use kube_runtime::reflector::ObjectRef;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything the controller needs once started
pub struct InitializationResult {
    pub client: Client,
    pub controller_config: ControllerConfig,
    pub server_config: ServerConfig,
    pub server_state: Arc<ServerState>,
    pub reconciler: Arc<Reconciler>,
    /// Reconcile requests raised outside the controller's own watches
    pub triggers: mpsc::UnboundedReceiver<ObjectRef<OperatorConfig>>,
    /// Root of every background task
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.is_ready.load(Ordering::Relaxed))
            .field("controller_config", &self.controller_config)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "monitoring_operator=info".into()),
        )
        .init();

    info!("Starting monitoring operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let (controller_config, server_config) = load_config();
    info!(
        operator_namespace = %controller_config.operator_namespace,
        public_namespace = %controller_config.public_namespace,
        tls_mode = ?server_config.tls_mode,
        "Loaded configuration"
    );

    let server_state = Arc::new(ServerState::default());
    let server_port = server_config.metrics_port;
    let server_state_clone = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let cancel = CancellationToken::new();

    // A changed secret only needs the singleton reconciled again
    let (trigger_tx, triggers) = mpsc::unbounded();
    let singleton = singleton_ref(&controller_config.public_namespace);
    let notify: ChangeNotifier = Arc::new(move |identity: &SecretIdentity| {
        if trigger_tx.unbounded_send(singleton.clone()).is_err() {
            debug!("Controller stopped, ignoring change of {}", identity);
        }
    });
    let watches = Arc::new(SecretWatchProvider::new(
        Arc::new(KubeSecretWatchSource::new(client.clone())),
        RetryPolicy {
            base: Duration::from_secs(controller_config.secret_watch_retry_base_secs),
            jitter: Duration::from_secs(controller_config.secret_watch_retry_jitter_secs),
        },
        Some(notify),
        cancel.child_token(),
    ));

    let reconciler = Arc::new(Reconciler::new(
        client.clone(),
        controller_config.clone(),
        Arc::new(KubeObjectReader::new(client.clone())),
        watches,
    ));

    info!("Controller initialized");
    Ok(InitializationResult {
        client,
        controller_config,
        server_config,
        server_state,
        reconciler,
        triggers,
        cancel,
    })
}

/// Wait for the probe server to bind, failing if it exits or takes too long
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
