//! # OperatorConfig
//!
//! The singleton driving collection and rule evaluation. Only the object named
//! `config` in the public namespace is honoured.

use super::common::{ScrapePort, SecretKeySelector, SecretOrConfigMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operator-wide configuration singleton
#[derive(
    kube::CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "OperatorConfig",
    group = "monitoring.octopilot.io",
    version = "v1",
    namespaced,
    status = "crate::crd::MonitoringStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfigSpec {
    #[serde(default)]
    pub collection: CollectionSpec,
    #[serde(default)]
    pub rules: RuleEvaluatorSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_alertmanager: Option<ManagedAlertmanagerSpec>,
}

/// Settings for the collector fleet
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSpec {
    /// Labels added to every exported series. `project_id`, `location` and
    /// `cluster` override the operator-wide defaults.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub filter: ExportFilters,
    /// Credentials the collector exports with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretKeySelector>,
    /// Scrape kubelet and cAdvisor metrics on every node when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubelet_scraping: Option<KubeletScraping>,
    /// `none` or `gzip`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportFilters {
    /// Series selectors, a series is exported if it matches any of them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_one_of: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeletScraping {
    pub interval: String,
}

/// Settings for the rule-evaluator
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleEvaluatorSpec {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub external_labels: BTreeMap<String, String>,
    /// Project queried by rule evaluation, defaults to the export project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_project_id: Option<String>,
    /// Base URL used in the generator URL of alerts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretKeySelector>,
    #[serde(default)]
    pub alerting: AlertingSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertingSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alertmanagers: Vec<AlertmanagerEndpoints>,
}

/// An Alertmanager reached through the endpoints of a service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AlertmanagerEndpoints {
    pub namespace: String,
    /// Service name
    pub name: String,
    pub port: ScrapePort,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,
    /// Alertmanager API version, `v1` or `v2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsConfig>,
}

/// HTTP authorization header settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    /// Defaults to `Bearer`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<SecretKeySelector>,
}

/// TLS settings for an Alertmanager connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<SecretOrConfigMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<SecretOrConfigMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_secret: Option<SecretKeySelector>,
    /// `TLS10` through `TLS13`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
}

/// The operator-managed Alertmanager
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedAlertmanagerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_url: Option<String>,
}
