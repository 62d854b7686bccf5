//! Validation of a single monitoring object

use crate::constants::OPERATOR_CONFIG_NAME;
use crate::controller::compiler::{
    rules::validate_groups, scrape::compile_source, validate_operator_config, ScrapeSource,
};
use crate::crd::{ClusterPodMonitoring, ClusterRules, MonitoringKind, OperatorConfig, PodMonitoring, Rules};
use kube::api::DynamicObject;
use kube::core::admission::AdmissionRequest;
use serde::de::DeserializeOwned;

/// Typed view of the request object; `None` for requests without one (deletes)
pub(super) fn typed_object<K: DeserializeOwned>(
    req: &AdmissionRequest<DynamicObject>,
) -> Result<Option<K>, String> {
    let Some(object) = &req.object else {
        return Ok(None);
    };
    let mut object = object.clone();
    if object.metadata.namespace.is_none() {
        object.metadata.namespace.clone_from(&req.namespace);
    }
    if object.metadata.name.is_none() && !req.name.is_empty() {
        object.metadata.name = Some(req.name.clone());
    }
    let value = serde_json::to_value(&object).map_err(|e| e.to_string())?;
    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| format!("invalid {}: {e}", req.kind.kind))
}

fn check_scrape_source(source: &ScrapeSource<'_>) -> Result<(), String> {
    let (_, errors) = compile_source(source);
    if errors.is_empty() {
        return Ok(());
    }
    Err(errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; "))
}

/// Check the request object; `Err` carries the denial message
pub fn validate_object(
    kind: MonitoringKind,
    req: &AdmissionRequest<DynamicObject>,
    public_namespace: &str,
) -> Result<(), String> {
    match kind {
        MonitoringKind::PodMonitoring => match typed_object::<PodMonitoring>(req)? {
            Some(pm) => check_scrape_source(&ScrapeSource::from_pod_monitoring(&pm)),
            None => Ok(()),
        },
        MonitoringKind::ClusterPodMonitoring => match typed_object::<ClusterPodMonitoring>(req)? {
            Some(cpm) => check_scrape_source(&ScrapeSource::from_cluster_pod_monitoring(&cpm)),
            None => Ok(()),
        },
        MonitoringKind::Rules => match typed_object::<Rules>(req)? {
            Some(rules) => validate_groups(&rules.spec.groups).map_err(|e| e.to_string()),
            None => Ok(()),
        },
        MonitoringKind::ClusterRules => match typed_object::<ClusterRules>(req)? {
            Some(rules) => validate_groups(&rules.spec.groups).map_err(|e| e.to_string()),
            None => Ok(()),
        },
        MonitoringKind::OperatorConfig => {
            let Some(config) = typed_object::<OperatorConfig>(req)? else {
                return Ok(());
            };
            let name = config.metadata.name.as_deref().unwrap_or_default();
            let namespace = config.metadata.namespace.as_deref().unwrap_or_default();
            if name != OPERATOR_CONFIG_NAME || namespace != public_namespace {
                return Err(format!(
                    "OperatorConfig must be named '{OPERATOR_CONFIG_NAME}' in namespace \
                     '{public_namespace}', got '{namespace}/{name}'"
                ));
            }
            validate_operator_config(&config.spec, public_namespace).map_err(|e| e.to_string())
        }
    }
}
