//! # Watch Loop
//!
//! Controller watch loop. The `OperatorConfig` singleton is the only object
//! ever reconciled: every other watched change maps onto it, so a burst of
//! events collapses into one pending reconcile. Triggers:
//!
//! - all monitoring custom resources, on any write
//! - the collector DaemonSet, rule-evaluator Deployment and Alertmanager
//!   StatefulSet, on generation changes or recreation
//! - secrets in the public namespace except service account tokens
//! - changes reported by the secret watches
//!
//! The controller's initial list of the singleton runs the startup reconcile.

use crate::constants::{
    ALERTMANAGER_NAME, COLLECTOR_NAME, OPERATOR_CONFIG_NAME, RULE_EVALUATOR_NAME,
    SERVICE_ACCOUNT_TOKEN_TYPE,
};
use crate::controller::reconciler::{ensure_operator_config, reconcile, Reconciler};
use crate::crd::{ClusterPodMonitoring, ClusterRules, OperatorConfig, PodMonitoring, Rules};
use crate::runtime::error_policy::handle_reconciliation_error;
use futures::channel::mpsc::UnboundedReceiver;
use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, Resource};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{controller, predicates, watcher, Controller, Predicate, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reference to the singleton every trigger maps to
#[must_use]
pub fn singleton_ref(namespace: &str) -> ObjectRef<OperatorConfig> {
    ObjectRef::new(OPERATOR_CONFIG_NAME).within(namespace)
}

/// Generation combined with the uid, so a deleted and recreated object
/// counts as changed even though its generation starts over
pub fn generation_or_recreation<K: Resource>(obj: &K) -> Option<u64> {
    let meta = obj.meta();
    let generation = meta.generation?;
    let mut hasher = DefaultHasher::new();
    (meta.uid.as_deref(), generation).hash(&mut hasher);
    Some(hasher.finish())
}

fn to_singleton<K: 'static>(
    singleton: &ObjectRef<OperatorConfig>,
) -> impl Fn(K) -> Option<ObjectRef<OperatorConfig>> + Send + Sync + 'static {
    let singleton = singleton.clone();
    move |_| Some(singleton.clone())
}

/// Objects of `api` whose `predicate` changed, deletions included
fn changes<K, P>(
    api: Api<K>,
    config: watcher::Config,
    predicate: P,
) -> impl Stream<Item = Result<K, watcher::Error>> + Send + 'static
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    P: Predicate<K> + Send + 'static,
{
    watcher(api, config)
        .default_backoff()
        .touched_objects()
        .predicate_filter(predicate)
}

fn by_name(name: &str) -> watcher::Config {
    watcher::Config::default().fields(&format!("metadata.name={name}"))
}

/// Run the controller until a shutdown signal arrives
///
/// `triggers` carries extra reconcile requests, such as changes seen by the
/// secret watches.
pub async fn run_watch_loop(
    reconciler: Arc<Reconciler>,
    triggers: UnboundedReceiver<ObjectRef<OperatorConfig>>,
) {
    let client = reconciler.client.clone();
    let operator_ns = reconciler.config.operator_namespace.clone();
    let public_ns = reconciler.config.public_namespace.clone();
    let singleton = singleton_ref(&public_ns);
    let all = watcher::Config::default;

    info!("Starting controller watch loop...");
    Controller::new(
        Api::<OperatorConfig>::namespaced(client.clone(), &public_ns),
        by_name(OPERATOR_CONFIG_NAME),
    )
    .watches_stream(
        changes(
            Api::<PodMonitoring>::all(client.clone()),
            all(),
            predicates::resource_version,
        ),
        to_singleton(&singleton),
    )
    .watches_stream(
        changes(
            Api::<ClusterPodMonitoring>::all(client.clone()),
            all(),
            predicates::resource_version,
        ),
        to_singleton(&singleton),
    )
    .watches_stream(
        changes(Api::<Rules>::all(client.clone()), all(), predicates::resource_version),
        to_singleton(&singleton),
    )
    .watches_stream(
        changes(
            Api::<ClusterRules>::all(client.clone()),
            all(),
            predicates::resource_version,
        ),
        to_singleton(&singleton),
    )
    .watches_stream(
        changes(
            Api::<DaemonSet>::namespaced(client.clone(), &operator_ns),
            by_name(COLLECTOR_NAME),
            generation_or_recreation,
        ),
        to_singleton(&singleton),
    )
    .watches_stream(
        changes(
            Api::<Deployment>::namespaced(client.clone(), &operator_ns),
            by_name(RULE_EVALUATOR_NAME),
            generation_or_recreation,
        ),
        to_singleton(&singleton),
    )
    .watches_stream(
        changes(
            Api::<StatefulSet>::namespaced(client.clone(), &operator_ns),
            by_name(ALERTMANAGER_NAME),
            generation_or_recreation,
        ),
        to_singleton(&singleton),
    )
    .watches_stream(
        changes(
            Api::<Secret>::namespaced(client.clone(), &public_ns),
            all().fields(&format!("type!={SERVICE_ACCOUNT_TOKEN_TYPE}")),
            predicates::resource_version,
        ),
        to_singleton(&singleton),
    )
    .reconcile_on(triggers)
    .shutdown_on_signal()
    .run(reconcile, handle_reconciliation_error, reconciler)
    .for_each(|result| {
        let client = client.clone();
        let public_ns = public_ns.clone();
        async move { handle_controller_event(result, &client, &public_ns).await }
    })
    .await;

    info!("Controller watch loop stopped");
}

type ControllerResult = Result<
    (ObjectRef<OperatorConfig>, controller::Action),
    controller::Error<crate::controller::reconciler::ReconcilerError, watcher::Error>,
>;

async fn handle_controller_event(result: ControllerResult, client: &Client, public_ns: &str) {
    match result {
        Ok((obj, action)) => debug!("watch.event.success: {} ({:?})", obj, action),
        // The singleton was deleted or never existed: put it back so the
        // configuration keeps being compiled
        Err(controller::Error::ObjectNotFound(obj)) => {
            warn!("{} not found, recreating it with defaults", obj);
            if let Err(e) = ensure_operator_config(client, public_ns).await {
                error!("Failed to recreate OperatorConfig: {}", e);
            }
        }
        // Already logged by the error policy
        Err(controller::Error::ReconcilerFailed(_, obj)) => debug!("Requeued {}", obj),
        Err(e) => warn!("Controller watch error: {}", e),
    }
}
