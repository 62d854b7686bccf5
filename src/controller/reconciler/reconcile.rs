//! # Reconciliation Logic
//!
//! One pass over the whole monitoring configuration of the cluster.
//!
//! 1. Default the `OperatorConfig` singleton
//! 2. List every monitoring resource
//! 3. Compile collector, rule-evaluator and rule file configuration
//! 4. Resolve referenced secrets into the mirrored secrets
//! 5. Apply generated config maps and secrets
//! 6. Patch runtime flags into the workloads that mount them
//! 7. Write per-resource status and update secret watches

use super::artifacts;
use super::status::{flush_statuses, ObservedStatuses};
use super::types::{Reconciler, ReconcilerError};
use crate::constants::{
    ALERTMANAGER_CONTAINER, ALERTMANAGER_NAME, COLLECTION_SECRET_NAME, COLLECTOR_CONTAINER,
    COLLECTOR_NAME, CONFIG_FILENAME, DEFAULT_ALERTMANAGER_CONFIG, EVALUATOR_CONTAINER,
    FIELD_MANAGER, GENERATED_RULES_NAME, OPERATOR_CONFIG_NAME, RULES_SECRET_NAME,
    RULE_EVALUATOR_NAME,
};
use crate::controller::compiler::{AlertmanagerConfig, CompileInput, CompiledConfig};
use crate::controller::secrets::{ResolveError, SecretResolver, SecretSource, SourceKind};
use crate::crd::{
    default_operator_config, ClusterPodMonitoring, ClusterRules, ManagedAlertmanagerSpec,
    OperatorConfig, OperatorConfigSpec, PodMonitoring, Rules, SecretKeySelector,
};
use crate::observability::metrics;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::ByteString;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client};
use kube_runtime::controller::Action;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn, Instrument};

/// Run one reconcile pass for the singleton
///
/// Every watched change maps onto the singleton, so `config` is the only
/// object this is ever called with. A pass that outlives the configured
/// timeout fails with [`ReconcilerError::Timeout`].
pub async fn reconcile(
    config: Arc<OperatorConfig>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let span = tracing::span!(
        tracing::Level::INFO,
        "reconcile",
        resource.name = OPERATOR_CONFIG_NAME,
        resource.namespace = ctx.config.public_namespace.as_str(),
        resource.kind = "OperatorConfig"
    );

    metrics::increment_reconciliations();
    let timeout = ctx.config.reconcile_timeout();
    let result = match tokio::time::timeout(timeout, reconcile_internal(&ctx, &config))
        .instrument(span)
        .await
    {
        Ok(result) => result,
        Err(_) => Err(ReconcilerError::Timeout(timeout)),
    };
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    match result {
        Ok(()) => {
            ctx.reset_backoff();
            info!(
                "✅ Reconciled monitoring configuration in {:?}",
                start.elapsed()
            );
            Ok(Action::await_change())
        }
        Err(e) => {
            warn!(error = %e, "Reconciliation failed");
            Err(e)
        }
    }
}

#[allow(
    clippy::too_many_lines,
    reason = "Pipeline steps read best in order in one place"
)]
async fn reconcile_internal(
    ctx: &Reconciler,
    config: &OperatorConfig,
) -> Result<(), ReconcilerError> {
    let client = &ctx.client;
    let operator_ns = ctx.config.operator_namespace.as_str();

    let singleton = persist_defaults(ctx, config).await?;
    let spec = singleton.spec.clone();

    let lp = ListParams::default();
    let pod_monitorings = Api::<PodMonitoring>::all(client.clone()).list(&lp).await?.items;
    let cluster_pod_monitorings = Api::<ClusterPodMonitoring>::all(client.clone())
        .list(&lp)
        .await?
        .items;
    let rules = Api::<Rules>::all(client.clone()).list(&lp).await?.items;
    let cluster_rules = Api::<ClusterRules>::all(client.clone()).list(&lp).await?.items;
    debug!(
        "Read {} PodMonitorings, {} ClusterPodMonitorings, {} Rules, {} ClusterRules",
        pod_monitorings.len(),
        cluster_pod_monitorings.len(),
        rules.len(),
        cluster_rules.len()
    );

    let managed_alertmanager = Api::<StatefulSet>::namespaced(client.clone(), operator_ns)
        .get_opt(ALERTMANAGER_NAME)
        .await?
        .is_some();

    let mut compiled = ctx.compiler.compile(&CompileInput {
        operator_config: &spec,
        pod_monitorings: &pod_monitorings,
        cluster_pod_monitorings: &cluster_pod_monitorings,
        rules: &rules,
        cluster_rules: &cluster_rules,
        managed_alertmanager,
    });

    // Secrets mounted by the rule-evaluator
    let mut rules_secrets =
        SecretResolver::new(Arc::clone(&ctx.reader), Some(Arc::clone(&ctx.watches)));
    let alertmanagers = resolve_alertmanagers(ctx, &mut compiled, &mut rules_secrets).await?;
    let rules_credentials = resolve_credentials(
        ctx,
        &mut compiled,
        &mut rules_secrets,
        spec.rules.credentials.as_ref(),
        "rules.credentials",
    )
    .await?;

    // Secrets mounted by the collector
    let mut collection_secrets =
        SecretResolver::new(Arc::clone(&ctx.reader), Some(Arc::clone(&ctx.watches)));
    let collection_credentials = resolve_credentials(
        ctx,
        &mut compiled,
        &mut collection_secrets,
        spec.collection.credentials.as_ref(),
        "collection.credentials",
    )
    .await?;

    let collector_yaml = compiled
        .collector
        .to_yaml()
        .map_err(|source| ReconcilerError::Render {
            artifact: "collector configuration",
            source,
        })?;
    let evaluator_yaml = compiled
        .rule_evaluator_config(alertmanagers.iter())
        .to_yaml()
        .map_err(|source| ReconcilerError::Render {
            artifact: "rule-evaluator configuration",
            source,
        })?;

    let mut watched: BTreeSet<SecretSource> = rules_secrets
        .referenced()
        .iter()
        .chain(collection_secrets.referenced())
        .filter(|s| s.kind == SourceKind::Secret)
        .cloned()
        .collect();

    // Configuration first: the workloads mount these objects by name
    artifacts::apply_config_map(
        client,
        operator_ns,
        COLLECTOR_NAME,
        BTreeMap::from([(CONFIG_FILENAME.to_string(), collector_yaml)]),
    )
    .await?;
    artifacts::apply_config_map(
        client,
        operator_ns,
        RULE_EVALUATOR_NAME,
        BTreeMap::from([(CONFIG_FILENAME.to_string(), evaluator_yaml)]),
    )
    .await?;
    artifacts::apply_config_map(
        client,
        operator_ns,
        GENERATED_RULES_NAME,
        compiled.rule_files.clone(),
    )
    .await?;
    artifacts::apply_secret(
        client,
        operator_ns,
        RULES_SECRET_NAME,
        rules_secrets.into_secret_data(),
    )
    .await?;
    artifacts::apply_secret(
        client,
        operator_ns,
        COLLECTION_SECRET_NAME,
        collection_secrets.into_secret_data(),
    )
    .await?;
    if managed_alertmanager {
        if let Some(source) =
            apply_alertmanager_config(ctx, spec.managed_alertmanager.as_ref()).await?
        {
            watched.insert(source);
        }
    }

    artifacts::patch_container_args::<DaemonSet>(
        client,
        operator_ns,
        COLLECTOR_NAME,
        COLLECTOR_CONTAINER,
        &artifacts::collector_flags(
            &compiled.collector_labels,
            &spec.collection,
            collection_credentials.as_deref(),
        ),
    )
    .await?;
    artifacts::patch_container_args::<Deployment>(
        client,
        operator_ns,
        RULE_EVALUATOR_NAME,
        EVALUATOR_CONTAINER,
        &artifacts::evaluator_flags(
            &compiled.evaluator_labels,
            &spec.rules,
            rules_credentials.as_deref(),
        ),
    )
    .await?;
    if managed_alertmanager {
        let external_url = spec
            .managed_alertmanager
            .as_ref()
            .and_then(|m| m.external_url.as_deref());
        artifacts::patch_container_args::<StatefulSet>(
            client,
            operator_ns,
            ALERTMANAGER_NAME,
            ALERTMANAGER_CONTAINER,
            &artifacts::alertmanager_flags(external_url),
        )
        .await?;
    }

    let mut observed = ObservedStatuses::new();
    observed.observe(&pod_monitorings);
    observed.observe(&cluster_pod_monitorings);
    observed.observe(&rules);
    observed.observe(&cluster_rules);
    observed.observe_one(&singleton);
    let updates = observed.pending_updates(&compiled.statuses);
    let written = flush_statuses(client, updates).await?;
    debug!("Wrote {} status updates", written);

    ctx.sync_secret_watches(&watched);

    metrics::set_compile_result(
        compiled.collector.scrape_configs.len(),
        compiled.rule_files.len(),
        compiled.statuses.failure_count(),
    );
    if compiled.statuses.failure_count() > 0 {
        warn!(
            "{} monitoring resources failed to compile, see their status conditions",
            compiled.statuses.failure_count()
        );
    }
    Ok(())
}

fn defaulted_operator_config() -> OperatorConfigSpec {
    let mut spec = OperatorConfigSpec::default();
    default_operator_config(&mut spec);
    spec
}

/// The singleton as created when the cluster has none
#[must_use]
pub fn default_singleton(namespace: &str) -> OperatorConfig {
    let mut config = OperatorConfig::new(OPERATOR_CONFIG_NAME, defaulted_operator_config());
    config.metadata.namespace = Some(namespace.to_string());
    config
}

/// Create the defaulted singleton in `namespace` unless it already exists
///
/// Reconciles are keyed on the singleton, so without it nothing would be
/// compiled at all.
pub async fn ensure_operator_config(client: &Client, namespace: &str) -> Result<(), kube::Error> {
    let api: Api<OperatorConfig> = Api::namespaced(client.clone(), namespace);
    if api.get_opt(OPERATOR_CONFIG_NAME).await?.is_some() {
        return Ok(());
    }

    info!(
        "OperatorConfig {}/{} not found, creating it with defaults",
        namespace, OPERATOR_CONFIG_NAME
    );
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..PostParams::default()
    };
    match api.create(&params, &default_singleton(namespace)).await {
        Ok(_) => Ok(()),
        // Someone else created it in the meantime
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(e),
    }
}

/// Persist any missing defaults of the singleton and return the defaulted object
async fn persist_defaults(
    ctx: &Reconciler,
    config: &OperatorConfig,
) -> Result<OperatorConfig, ReconcilerError> {
    let mut config = config.clone();
    if !default_operator_config(&mut config.spec) {
        return Ok(config);
    }

    info!(
        "Persisting defaults of OperatorConfig {}/{}",
        ctx.config.public_namespace, OPERATOR_CONFIG_NAME
    );
    let api: Api<OperatorConfig> =
        Api::namespaced(ctx.client.clone(), &ctx.config.public_namespace);
    let patch = serde_json::json!({ "spec": config.spec });
    Ok(api
        .patch(
            OPERATOR_CONFIG_NAME,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?)
}

/// Resolve the references of every compiled Alertmanager. An Alertmanager
/// whose references cannot be read is left out and fails the singleton.
async fn resolve_alertmanagers(
    ctx: &Reconciler,
    compiled: &mut CompiledConfig,
    resolver: &mut SecretResolver,
) -> Result<Vec<AlertmanagerConfig>, ReconcilerError> {
    let config_key = ctx.compiler.operator_config_key();
    let mut resolved = Vec::new();
    for alertmanager in std::mem::take(&mut compiled.alertmanagers) {
        match resolver.resolve_all(&alertmanager.references).await {
            Ok(()) => resolved.push(alertmanager.config),
            Err(ResolveError::Kube(e)) => return Err(e.into()),
            Err(e) => {
                warn!("Dropping alertmanager with unresolved reference: {}", e);
                compiled
                    .statuses
                    .record_failure(config_key.clone(), format!("alertmanager: {e}"));
            }
        }
    }
    Ok(resolved)
}

/// Resolve a credentials reference into a mounted file path
async fn resolve_credentials(
    ctx: &Reconciler,
    compiled: &mut CompiledConfig,
    resolver: &mut SecretResolver,
    selector: Option<&SecretKeySelector>,
    field: &str,
) -> Result<Option<String>, ReconcilerError> {
    let Some(selector) = selector else {
        return Ok(None);
    };
    let source = SecretSource::secret(&ctx.config.public_namespace, selector);
    match resolver.resolve(&source).await {
        Ok(path) => Ok(Some(path)),
        Err(ResolveError::Kube(e)) => Err(e.into()),
        Err(e) => {
            warn!("Ignoring {}: {}", field, e);
            compiled
                .statuses
                .record_failure(ctx.compiler.operator_config_key(), format!("{field}: {e}"));
            Ok(None)
        }
    }
}

/// Copy the managed Alertmanager configuration into the operator namespace.
///
/// Falls back to a no-op configuration when the referenced secret or key is
/// missing. Returns the referenced secret so it can be watched.
async fn apply_alertmanager_config(
    ctx: &Reconciler,
    managed: Option<&ManagedAlertmanagerSpec>,
) -> Result<Option<SecretSource>, ReconcilerError> {
    let source = managed
        .and_then(|m| m.config_secret.as_ref())
        .map(|selector| SecretSource::secret(&ctx.config.public_namespace, selector));

    let config = match &source {
        Some(source) => ctx
            .reader
            .secret_data(&source.namespace, &source.name)
            .await?
            .and_then(|mut data| data.remove(&source.key)),
        None => None,
    };
    let config = config.unwrap_or_else(|| {
        debug!("No Alertmanager configuration found, writing default");
        DEFAULT_ALERTMANAGER_CONFIG.as_bytes().to_vec()
    });

    artifacts::apply_secret(
        &ctx.client,
        &ctx.config.operator_namespace,
        ALERTMANAGER_NAME,
        BTreeMap::from([(CONFIG_FILENAME.to_string(), ByteString(config))]),
    )
    .await?;
    Ok(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_singleton_uses_defaults() {
        let spec = defaulted_operator_config();
        assert_eq!(spec.collection.compression.as_deref(), Some("none"));
        let secret = spec
            .managed_alertmanager
            .and_then(|m| m.config_secret)
            .unwrap();
        assert_eq!(secret.name, "alertmanager");
        assert_eq!(secret.key, "alertmanager.yaml");
    }

    #[test]
    fn test_default_singleton_is_named_config_in_namespace() {
        let config = default_singleton("gmp-public");
        assert_eq!(config.metadata.name.as_deref(), Some("config"));
        assert_eq!(config.metadata.namespace.as_deref(), Some("gmp-public"));
        assert_eq!(config.spec, defaulted_operator_config());

        // Nothing left for the first reconcile to persist
        let mut spec = config.spec.clone();
        assert!(!default_operator_config(&mut spec));
    }
}
