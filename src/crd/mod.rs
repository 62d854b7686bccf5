//! # Custom Resource Definitions
//!
//! CRD types for the monitoring operator.
//!
//! ## Module Structure
//!
//! - `common.rs` - Selectors, endpoints and secret references shared by several kinds
//! - `pod_monitoring.rs` - `PodMonitoring` and `ClusterPodMonitoring`
//! - `rules.rs` - `Rules` and `ClusterRules`
//! - `operator_config.rs` - The `OperatorConfig` singleton
//! - `status.rs` - Status and condition types
//! - `defaults.rs` - Defaulting shared by webhooks and the reconciler

mod common;
mod defaults;
mod operator_config;
mod pod_monitoring;
mod rules;
mod status;

pub use common::{
    default_scrape_interval, ConfigMapKeySelector, LabelMapping, LabelSelector,
    LabelSelectorOperator, LabelSelectorRequirement, RelabelingRule, ScrapeEndpoint, ScrapeLimits,
    ScrapePort, SecretKeySelector, SecretOrConfigMap, TargetLabels,
};
pub use defaults::{default_cluster_pod_monitoring, default_operator_config, default_pod_monitoring};
pub use operator_config::{
    AlertingSpec, AlertmanagerEndpoints, Authorization, CollectionSpec, ExportFilters,
    KubeletScraping, ManagedAlertmanagerSpec, OperatorConfig, OperatorConfigSpec,
    RuleEvaluatorSpec, TlsConfig,
};
pub use pod_monitoring::{
    ClusterPodMonitoring, ClusterPodMonitoringSpec, PodMonitoring, PodMonitoringSpec,
};
pub use rules::{ClusterRules, ClusterRulesSpec, Rule, RuleGroup, Rules, RulesSpec};
pub use status::{Condition, MonitoringStatus};

use kube::api::ApiResource;
use kube::CustomResourceExt;
use std::fmt;

/// The monitoring resource kinds the operator owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MonitoringKind {
    PodMonitoring,
    ClusterPodMonitoring,
    Rules,
    ClusterRules,
    OperatorConfig,
}

impl MonitoringKind {
    pub const ALL: [MonitoringKind; 5] = [
        MonitoringKind::PodMonitoring,
        MonitoringKind::ClusterPodMonitoring,
        MonitoringKind::Rules,
        MonitoringKind::ClusterRules,
        MonitoringKind::OperatorConfig,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitoringKind::PodMonitoring => "PodMonitoring",
            MonitoringKind::ClusterPodMonitoring => "ClusterPodMonitoring",
            MonitoringKind::Rules => "Rules",
            MonitoringKind::ClusterRules => "ClusterRules",
            MonitoringKind::OperatorConfig => "OperatorConfig",
        }
    }

    /// Lower-case plural used in API and webhook paths
    #[must_use]
    pub fn plural(&self) -> &'static str {
        match self {
            MonitoringKind::PodMonitoring => "podmonitorings",
            MonitoringKind::ClusterPodMonitoring => "clusterpodmonitorings",
            MonitoringKind::Rules => "rules",
            MonitoringKind::ClusterRules => "clusterrules",
            MonitoringKind::OperatorConfig => "operatorconfigs",
        }
    }

    #[must_use]
    pub fn from_plural(plural: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.plural() == plural)
    }

    #[must_use]
    pub fn namespaced(&self) -> bool {
        !matches!(
            self,
            MonitoringKind::ClusterPodMonitoring | MonitoringKind::ClusterRules
        )
    }

    /// Whether a defaulting webhook is registered for this kind
    #[must_use]
    pub fn has_defaulter(&self) -> bool {
        matches!(
            self,
            MonitoringKind::PodMonitoring
                | MonitoringKind::ClusterPodMonitoring
                | MonitoringKind::OperatorConfig
        )
    }
}

impl MonitoringKind {
    /// Type information for dynamic API access to this kind
    #[must_use]
    pub fn api_resource(&self) -> ApiResource {
        match self {
            MonitoringKind::PodMonitoring => ApiResource::erase::<PodMonitoring>(&()),
            MonitoringKind::ClusterPodMonitoring => ApiResource::erase::<ClusterPodMonitoring>(&()),
            MonitoringKind::Rules => ApiResource::erase::<Rules>(&()),
            MonitoringKind::ClusterRules => ApiResource::erase::<ClusterRules>(&()),
            MonitoringKind::OperatorConfig => ApiResource::erase::<OperatorConfig>(&()),
        }
    }
}

/// A monitoring custom resource and its status
pub trait MonitoringObject: kube::Resource<DynamicType = ()> {
    const KIND: MonitoringKind;

    fn monitoring_status(&self) -> Option<&MonitoringStatus>;
}

macro_rules! impl_monitoring_object {
    ($($ty:ident),* $(,)?) => {
        $(
            impl MonitoringObject for $ty {
                const KIND: MonitoringKind = MonitoringKind::$ty;

                fn monitoring_status(&self) -> Option<&MonitoringStatus> {
                    self.status.as_ref()
                }
            }
        )*
    };
}

impl_monitoring_object!(
    PodMonitoring,
    ClusterPodMonitoring,
    Rules,
    ClusterRules,
    OperatorConfig,
);

impl fmt::Display for MonitoringKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All CRDs of the operator, in a stable order
#[must_use]
pub fn all_crds() -> Vec<k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition>
{
    vec![
        PodMonitoring::crd(),
        ClusterPodMonitoring::crd(),
        Rules::crd(),
        ClusterRules::crd(),
        OperatorConfig::crd(),
    ]
}
