//! # PodMonitoring / ClusterPodMonitoring
//!
//! Scrape intent for pods, either in the resource's own namespace or cluster-wide.

use super::common::{LabelSelector, ScrapeEndpoint, ScrapeLimits, TargetLabels};
use serde::{Deserialize, Serialize};

/// Scrape configuration for pods in the resource's namespace
///
/// # Example
///
/// ```yaml
/// apiVersion: monitoring.octopilot.io/v1
/// kind: PodMonitoring
/// metadata:
///   name: frontend
///   namespace: ns1
/// spec:
///   selector:
///     matchLabels:
///       app: foo
///   endpoints:
///   - port: metrics
///     interval: 15s
/// ```
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "PodMonitoring",
    group = "monitoring.octopilot.io",
    version = "v1",
    namespaced,
    status = "crate::crd::MonitoringStatus",
    shortname = "podmon",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"ConfigurationCreateSuccess\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PodMonitoringSpec {
    /// Pods to scrape
    #[serde(default)]
    pub selector: LabelSelector,
    /// Endpoints to scrape on the selected pods
    pub endpoints: Vec<ScrapeEndpoint>,
    /// Labels attached to every scraped target
    #[serde(default)]
    pub target_labels: TargetLabels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ScrapeLimits>,
}

/// Scrape configuration for pods in every namespace
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ClusterPodMonitoring",
    group = "monitoring.octopilot.io",
    version = "v1",
    status = "crate::crd::MonitoringStatus",
    shortname = "cpodmon",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"ConfigurationCreateSuccess\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPodMonitoringSpec {
    #[serde(default)]
    pub selector: LabelSelector,
    pub endpoints: Vec<ScrapeEndpoint>,
    #[serde(default)]
    pub target_labels: TargetLabels,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ScrapeLimits>,
}
