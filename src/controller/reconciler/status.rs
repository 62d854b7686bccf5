//! # Status Updates
//!
//! Writes the compile outcome of each monitoring resource into its
//! `ConfigurationCreateSuccess` condition, once per reconcile pass.

use crate::constants::FIELD_MANAGER;
use crate::controller::compiler::{ObjectKey, StatusAccumulator};
use crate::crd::{MonitoringObject, MonitoringStatus};
use kube::api::{DynamicObject, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Status of a resource as read at the start of the pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedStatus {
    pub generation: Option<i64>,
    pub status: MonitoringStatus,
}

/// Statuses of every object the pass read
#[derive(Debug, Clone, Default)]
pub struct ObservedStatuses {
    objects: BTreeMap<ObjectKey, ObservedStatus>,
}

impl ObservedStatuses {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe<K: MonitoringObject>(&mut self, objects: &[K]) {
        for object in objects {
            self.observe_one(object);
        }
    }

    pub fn observe_one<K: MonitoringObject>(&mut self, object: &K) {
        let key = ObjectKey::new(K::KIND, object.namespace().as_deref(), &object.name_any());
        self.objects.insert(
            key,
            ObservedStatus {
                generation: object.meta().generation,
                status: object.monitoring_status().cloned().unwrap_or_default(),
            },
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Statuses that differ from what the objects currently carry
    #[must_use]
    pub fn pending_updates(&self, acc: &StatusAccumulator) -> Vec<(ObjectKey, MonitoringStatus)> {
        let mut updates = Vec::new();
        for (key, observed) in &self.objects {
            let Some(outcome) = acc.outcome(key) else {
                continue;
            };
            let outcome = outcome.as_ref().map(|_| ()).map_err(String::as_str);
            let next = observed.status.with_outcome(observed.generation, outcome);
            if next != observed.status {
                updates.push((key.clone(), next));
            }
        }
        updates
    }
}

/// Patch the status subresource of every changed object.
///
/// Objects deleted since they were read are skipped.
pub async fn flush_statuses(
    client: &Client,
    updates: Vec<(ObjectKey, MonitoringStatus)>,
) -> Result<usize, kube::Error> {
    let mut written = 0;
    for (key, status) in updates {
        let ar = key.kind.api_resource();
        let api: Api<DynamicObject> = match &key.namespace {
            Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
            None => Api::all_with(client.clone(), &ar),
        };
        let patch = serde_json::json!({ "status": status });
        match api
            .patch_status(&key.name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                debug!("Updated status of {}", key);
                written += 1;
            }
            Err(kube::Error::Api(e)) if e.code == 404 => {
                debug!("{} was deleted before its status could be written", key);
            }
            Err(e) => {
                warn!("Failed to update status of {}: {}", key, e);
                return Err(e);
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{MonitoringKind, PodMonitoring, PodMonitoringSpec};

    fn pod_monitoring(name: &str, generation: i64, status: Option<MonitoringStatus>) -> PodMonitoring {
        let mut pm = PodMonitoring::new(
            name,
            PodMonitoringSpec {
                selector: Default::default(),
                endpoints: Vec::new(),
                target_labels: Default::default(),
                limits: None,
            },
        );
        pm.metadata.namespace = Some("ns1".to_string());
        pm.metadata.generation = Some(generation);
        pm.status = status;
        pm
    }

    #[test]
    fn test_unchanged_status_is_not_rewritten() {
        let current = MonitoringStatus::default().with_outcome(Some(2), Ok(()));
        let mut observed = ObservedStatuses::new();
        observed.observe(&[pod_monitoring("ok", 2, Some(current))]);

        let mut acc = StatusAccumulator::new();
        acc.record_success(ObjectKey::new(MonitoringKind::PodMonitoring, Some("ns1"), "ok"));
        assert!(observed.pending_updates(&acc).is_empty());
    }

    #[test]
    fn test_failure_and_new_generation_produce_updates() {
        let current = MonitoringStatus::default().with_outcome(Some(1), Ok(()));
        let mut observed = ObservedStatuses::new();
        observed.observe(&[
            pod_monitoring("bumped", 2, Some(current.clone())),
            pod_monitoring("broken", 1, Some(current)),
            pod_monitoring("unseen", 1, None),
        ]);

        let mut acc = StatusAccumulator::new();
        acc.record_success(ObjectKey::new(MonitoringKind::PodMonitoring, Some("ns1"), "bumped"));
        acc.record_failure(
            ObjectKey::new(MonitoringKind::PodMonitoring, Some("ns1"), "broken"),
            "endpoint 0: no port",
        );

        let updates = observed.pending_updates(&acc);
        assert_eq!(updates.len(), 2);
        let (key, status) = &updates[0];
        assert_eq!(key.name, "broken");
        let condition = status.configuration_condition().unwrap();
        assert_eq!(condition.status, "False");
        assert_eq!(condition.message.as_deref(), Some("endpoint 0: no port"));
        assert_eq!(updates[1].1.observed_generation, Some(2));
    }
}
