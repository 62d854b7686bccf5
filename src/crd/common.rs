//! # Shared Spec Types
//!
//! Building blocks used by more than one monitoring resource.

use schemars::{json_schema, JsonSchema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Label query over pods, mirroring the core Kubernetes label selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    /// Exact label matches
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,
    /// Set-based label requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<LabelSelectorRequirement>,
}

/// A single set-based selector requirement
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelectorRequirement {
    pub key: String,
    pub operator: LabelSelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum LabelSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

/// Port of a scrape or Alertmanager endpoint, by name or by number
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ScrapePort {
    Number(u16),
    Name(String),
}

impl fmt::Display for ScrapePort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScrapePort::Number(n) => write!(f, "{n}"),
            ScrapePort::Name(name) => f.write_str(name),
        }
    }
}

impl JsonSchema for ScrapePort {
    fn schema_name() -> Cow<'static, str> {
        "ScrapePort".into()
    }

    fn inline_schema() -> bool {
        true
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        json_schema!({ "x-kubernetes-int-or-string": true })
    }
}

/// Reference to a key of a Secret
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

/// Reference to a key of a ConfigMap
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMapKeySelector {
    pub name: String,
    pub key: String,
}

/// Either a Secret or a ConfigMap key, exactly one must be set
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretOrConfigMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretKeySelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<ConfigMapKeySelector>,
}

/// Metric relabeling applied after a scrape
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RelabelingRule {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_labels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modulus: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    /// One of `replace`, `keep`, `drop`, `hashmod`, `labeldrop`, `labelkeep`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// A single scrape endpoint of a pod
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeEndpoint {
    /// Name or number of the port to scrape
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<ScrapePort>,
    /// Protocol scheme, `http` or `https`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    /// HTTP path to scrape metrics from, defaults to `/metrics`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// HTTP GET params
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Vec<String>>,
    /// Interval at which to scrape metrics
    #[serde(default = "default_scrape_interval")]
    pub interval: String,
    /// Timeout for a single scrape, defaults to the interval
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    /// Relabeling applied to scraped samples
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_relabeling: Vec<RelabelingRule>,
}

impl Default for ScrapeEndpoint {
    fn default() -> Self {
        Self {
            port: None,
            scheme: None,
            path: None,
            params: BTreeMap::new(),
            interval: default_scrape_interval(),
            timeout: None,
            metric_relabeling: Vec::new(),
        }
    }
}

#[must_use]
pub fn default_scrape_interval() -> String {
    "1m".to_string()
}

/// Labels attached to every target of a monitoring resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetLabels {
    /// Pod metadata to attach: any of `pod`, `container`, `node`.
    /// Absent means `pod` and `container`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Vec<String>>,
    /// Pod labels copied onto the target
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_pod: Vec<LabelMapping>,
}

/// Copy of a pod label into a target label
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LabelMapping {
    pub from: String,
    /// Defaults to `from`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

/// Per-scrape limits enforced by the collector
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_name_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_value_length: Option<u64>,
}
