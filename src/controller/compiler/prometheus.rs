//! # Prometheus Configuration Model
//!
//! Serializable subset of the Prometheus configuration file consumed by the
//! collector and the rule-evaluator. All maps are ordered so that serializing
//! the same value twice yields identical bytes.

use serde::Serialize;
use std::collections::BTreeMap;

/// Top-level configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrometheusConfig {
    pub global: GlobalConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alerting: Option<AlertingConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rule_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scrape_configs: Vec<ScrapeJobConfig>,
}

impl PrometheusConfig {
    /// Serialize to YAML
    ///
    /// # Errors
    ///
    /// Returns the underlying serializer error.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalConfig {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub external_labels: BTreeMap<String, String>,
}

/// One compiled scrape job
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScrapeJobConfig {
    pub job_name: String,
    pub scrape_interval: String,
    pub scrape_timeout: String,
    pub metrics_path: String,
    pub scheme: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsFileConfig>,
    pub kubernetes_sd_configs: Vec<KubernetesSdConfig>,
    pub relabel_configs: Vec<RelabelConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metric_relabel_configs: Vec<RelabelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_name_length_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_value_length_limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryRole {
    Pod,
    Endpoints,
    Node,
}

/// Kubernetes service discovery block
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KubernetesSdConfig {
    pub role: DiscoveryRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceDiscovery>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selectors: Vec<DiscoverySelector>,
}

impl KubernetesSdConfig {
    #[must_use]
    pub fn new(role: DiscoveryRole) -> Self {
        Self {
            role,
            namespaces: None,
            selectors: Vec::new(),
        }
    }

    #[must_use]
    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespaces = Some(NamespaceDiscovery {
            names: vec![namespace.to_string()],
        });
        self
    }

    /// Restrict discovery with a field selector
    #[must_use]
    pub fn with_field_selector(mut self, field: &str) -> Self {
        self.selectors.push(DiscoverySelector {
            role: self.role,
            field: field.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceDiscovery {
    pub names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoverySelector {
    pub role: DiscoveryRole,
    pub field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelabelAction {
    Replace,
    Keep,
    Drop,
    HashMod,
    LabelMap,
    LabelDrop,
    LabelKeep,
}

impl RelabelAction {
    /// Parse the user-facing action name
    #[must_use]
    pub fn parse(action: &str) -> Option<Self> {
        match action.to_lowercase().as_str() {
            "replace" => Some(Self::Replace),
            "keep" => Some(Self::Keep),
            "drop" => Some(Self::Drop),
            "hashmod" => Some(Self::HashMod),
            "labelmap" => Some(Self::LabelMap),
            "labeldrop" => Some(Self::LabelDrop),
            "labelkeep" => Some(Self::LabelKeep),
            _ => None,
        }
    }
}

/// A single label-rewrite rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelabelConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub source_labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modulus: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    pub action: RelabelAction,
}

impl RelabelConfig {
    /// Keep targets whose `source` label fully matches `regex`
    #[must_use]
    pub fn keep(source: &str, regex: impl Into<String>) -> Self {
        Self::filter(RelabelAction::Keep, source, regex)
    }

    /// Drop targets whose `source` label fully matches `regex`
    #[must_use]
    pub fn drop(source: &str, regex: impl Into<String>) -> Self {
        Self::filter(RelabelAction::Drop, source, regex)
    }

    fn filter(action: RelabelAction, source: &str, regex: impl Into<String>) -> Self {
        Self {
            source_labels: vec![source.to_string()],
            separator: None,
            regex: Some(regex.into()),
            modulus: None,
            target_label: None,
            replacement: None,
            action,
        }
    }

    /// Copy `source` into `target`
    #[must_use]
    pub fn copy(source: &str, target: &str) -> Self {
        Self {
            source_labels: vec![source.to_string()],
            separator: None,
            regex: None,
            modulus: None,
            target_label: Some(target.to_string()),
            replacement: None,
            action: RelabelAction::Replace,
        }
    }

    /// Set `target` to a fixed value
    #[must_use]
    pub fn set(target: &str, value: impl Into<String>) -> Self {
        Self {
            source_labels: Vec::new(),
            separator: None,
            regex: None,
            modulus: None,
            target_label: Some(target.to_string()),
            replacement: Some(value.into()),
            action: RelabelAction::Replace,
        }
    }

    /// Rewrite `source` into `target` through `regex` and `replacement`
    #[must_use]
    pub fn rewrite(
        source: &str,
        regex: impl Into<String>,
        target: &str,
        replacement: impl Into<String>,
    ) -> Self {
        Self {
            source_labels: vec![source.to_string()],
            separator: None,
            regex: Some(regex.into()),
            modulus: None,
            target_label: Some(target.to_string()),
            replacement: Some(replacement.into()),
            action: RelabelAction::Replace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationConfig {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub auth_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_file: Option<String>,
}

/// TLS settings referring to mounted files instead of inline bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TlsFileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub insecure_skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertingConfig {
    pub alertmanagers: Vec<AlertmanagerConfig>,
}

/// One Alertmanager target group
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlertmanagerConfig {
    pub scheme: String,
    pub path_prefix: String,
    pub api_version: String,
    pub timeout: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<TlsFileConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_sd_configs: Vec<KubernetesSdConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub static_configs: Vec<StaticConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relabel_configs: Vec<RelabelConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StaticConfig {
    pub targets: Vec<String>,
}
