//! # Defaulting
//!
//! Fills optional fields of monitoring resources. Used by the defaulting
//! webhooks and by the reconciler before compiling the singleton.

use super::{ClusterPodMonitoringSpec, OperatorConfigSpec, PodMonitoringSpec, ScrapeEndpoint, TargetLabels};
use crate::constants::{DEFAULT_ALERTMANAGER_CONFIG_KEY, DEFAULT_ALERTMANAGER_CONFIG_SECRET};
use crate::crd::{ManagedAlertmanagerSpec, SecretKeySelector};

/// Default the singleton in place. Returns true when anything changed.
pub fn default_operator_config(spec: &mut OperatorConfigSpec) -> bool {
    let before = spec.clone();

    if spec.collection.compression.is_none() {
        spec.collection.compression = Some("none".to_string());
    }

    let managed = spec
        .managed_alertmanager
        .get_or_insert_with(ManagedAlertmanagerSpec::default);
    if managed.config_secret.is_none() {
        managed.config_secret = Some(SecretKeySelector {
            name: DEFAULT_ALERTMANAGER_CONFIG_SECRET.to_string(),
            key: DEFAULT_ALERTMANAGER_CONFIG_KEY.to_string(),
        });
    }

    for am in &mut spec.rules.alerting.alertmanagers {
        am.scheme.get_or_insert_with(|| "http".to_string());
        am.api_version.get_or_insert_with(|| "v2".to_string());
        am.path_prefix.get_or_insert_with(|| "/".to_string());
        am.timeout.get_or_insert_with(|| "10s".to_string());
    }

    *spec != before
}

/// Default a `PodMonitoring` in place. Returns true when anything changed.
pub fn default_pod_monitoring(spec: &mut PodMonitoringSpec) -> bool {
    default_scrape(&mut spec.endpoints, &mut spec.target_labels)
}

/// Default a `ClusterPodMonitoring` in place. Returns true when anything changed.
pub fn default_cluster_pod_monitoring(spec: &mut ClusterPodMonitoringSpec) -> bool {
    default_scrape(&mut spec.endpoints, &mut spec.target_labels)
}

fn default_scrape(endpoints: &mut [ScrapeEndpoint], target_labels: &mut TargetLabels) -> bool {
    let mut changed = false;
    for ep in endpoints {
        if ep.scheme.is_none() {
            ep.scheme = Some("http".to_string());
            changed = true;
        }
        if ep.path.is_none() {
            ep.path = Some("/metrics".to_string());
            changed = true;
        }
        if ep.interval.is_empty() {
            ep.interval = super::common::default_scrape_interval();
            changed = true;
        }
    }
    if target_labels.metadata.is_none() {
        target_labels.metadata = Some(vec!["container".to_string(), "pod".to_string()]);
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{AlertmanagerEndpoints, ScrapePort};

    #[test]
    fn test_operator_config_defaults_are_idempotent() {
        let mut spec = OperatorConfigSpec::default();
        spec.rules.alerting.alertmanagers.push(AlertmanagerEndpoints {
            namespace: "monitoring".to_string(),
            name: "am".to_string(),
            port: ScrapePort::Name("web".to_string()),
            scheme: None,
            path_prefix: None,
            api_version: None,
            timeout: None,
            authorization: None,
            tls: None,
        });

        assert!(default_operator_config(&mut spec));
        assert_eq!(spec.collection.compression.as_deref(), Some("none"));
        let am = &spec.rules.alerting.alertmanagers[0];
        assert_eq!(am.scheme.as_deref(), Some("http"));
        assert_eq!(am.api_version.as_deref(), Some("v2"));
        assert_eq!(am.path_prefix.as_deref(), Some("/"));
        assert_eq!(am.timeout.as_deref(), Some("10s"));
        let secret = spec
            .managed_alertmanager
            .as_ref()
            .and_then(|m| m.config_secret.as_ref())
            .unwrap();
        assert_eq!(secret.name, "alertmanager");
        assert_eq!(secret.key, "alertmanager.yaml");

        assert!(!default_operator_config(&mut spec));
    }

    #[test]
    fn test_pod_monitoring_defaults_keep_explicit_values() {
        let mut spec = PodMonitoringSpec {
            selector: Default::default(),
            endpoints: vec![ScrapeEndpoint {
                path: Some("/custom".to_string()),
                ..Default::default()
            }],
            target_labels: Default::default(),
            limits: None,
        };
        assert!(default_pod_monitoring(&mut spec));
        assert_eq!(spec.endpoints[0].path.as_deref(), Some("/custom"));
        assert_eq!(spec.endpoints[0].scheme.as_deref(), Some("http"));
        assert!(!default_pod_monitoring(&mut spec));
    }
}
