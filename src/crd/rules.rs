//! # Rules / ClusterRules
//!
//! Recording and alerting rules evaluated by the rule-evaluator.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rules scoped to the resource's namespace
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Rules",
    group = "monitoring.octopilot.io",
    version = "v1",
    plural = "rules",
    namespaced,
    status = "crate::crd::MonitoringStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"ConfigurationCreateSuccess\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RulesSpec {
    pub groups: Vec<RuleGroup>,
}

/// Rules scoped to the whole cluster
#[derive(kube::CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "ClusterRules",
    group = "monitoring.octopilot.io",
    version = "v1",
    plural = "clusterrules",
    status = "crate::crd::MonitoringStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"ConfigurationCreateSuccess\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRulesSpec {
    pub groups: Vec<RuleGroup>,
}

/// A group of rules evaluated together
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RuleGroup {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
    pub rules: Vec<Rule>,
}

/// A recording rule (`record`) or an alerting rule (`alert`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    pub expr: String,
    #[serde(default, rename = "for", skip_serializing_if = "Option::is_none")]
    pub for_duration: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}
