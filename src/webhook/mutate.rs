//! Defaulting of a single monitoring object

use super::validate::typed_object;
use crate::crd::{
    default_cluster_pod_monitoring, default_operator_config, default_pod_monitoring,
    ClusterPodMonitoring, MonitoringKind, OperatorConfig, PodMonitoring,
};
use json_patch::jsonptr::{Pointer, PointerBuf};
use json_patch::{AddOperation, Patch, PatchOperation, ReplaceOperation};
use kube::api::DynamicObject;
use kube::core::admission::AdmissionRequest;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Patch from the submitted object to its defaulted form, `None` when
/// already defaulted
///
/// Defaults are found by comparing typed serializations, but the API server
/// applies the patch to the object exactly as submitted, where optional
/// parents of a defaulted field may be missing altogether.
fn defaulting_patch<K>(
    req: &AdmissionRequest<DynamicObject>,
    apply: impl FnOnce(&mut K) -> bool,
) -> Result<Option<Patch>, String>
where
    K: DeserializeOwned + Serialize + Clone,
{
    let Some(original) = typed_object::<K>(req)? else {
        return Ok(None);
    };
    let mut defaulted = original.clone();
    if !apply(&mut defaulted) {
        return Ok(None);
    }
    let before = serde_json::to_value(&original).map_err(|e| e.to_string())?;
    let after = serde_json::to_value(&defaulted).map_err(|e| e.to_string())?;
    let submitted = serde_json::to_value(&req.object).map_err(|e| e.to_string())?;

    let patch = rebase(&json_patch::diff(&before, &after), &submitted, &after);
    Ok((!patch.0.is_empty()).then_some(patch))
}

/// Shallowest prefix of `path` missing from `doc`, or `path` itself when
/// only its last token is missing or nothing is
fn anchor(path: &Pointer, doc: &Value) -> PointerBuf {
    let mut anchor = PointerBuf::root();
    for token in path.tokens() {
        if doc.pointer(anchor.as_str()).is_none() {
            break;
        }
        anchor.push_back(token);
    }
    anchor
}

/// Re-target `typed` at `submitted`: each changed path becomes one add or
/// replace at its anchor, carrying the defaulted value from `defaulted`
fn rebase(typed: &Patch, submitted: &Value, defaulted: &Value) -> Patch {
    let mut anchors: Vec<PointerBuf> = Vec::new();
    for op in &typed.0 {
        let path = match op {
            PatchOperation::Add(AddOperation { path, .. })
            | PatchOperation::Replace(ReplaceOperation { path, .. }) => path,
            // Defaulting only ever fills in values
            _ => continue,
        };
        let anchor = anchor(path, submitted);
        if anchors.iter().any(|seen| anchor.starts_with(seen)) {
            continue;
        }
        anchors.retain(|seen| !seen.starts_with(&anchor));
        anchors.push(anchor);
    }

    Patch(
        anchors
            .into_iter()
            .filter_map(|path| {
                let value = defaulted.pointer(path.as_str())?.clone();
                Some(if submitted.pointer(path.as_str()).is_some() {
                    PatchOperation::Replace(ReplaceOperation { path, value })
                } else {
                    PatchOperation::Add(AddOperation { path, value })
                })
            })
            .collect(),
    )
}

/// JSON patch filling in defaults for kinds that have a defaulter.
/// `Err` carries the denial message for objects that cannot be decoded.
pub fn default_object(
    kind: MonitoringKind,
    req: &AdmissionRequest<DynamicObject>,
) -> Result<Option<Patch>, String> {
    match kind {
        MonitoringKind::PodMonitoring => {
            defaulting_patch(req, |pm: &mut PodMonitoring| default_pod_monitoring(&mut pm.spec))
        }
        MonitoringKind::ClusterPodMonitoring => {
            defaulting_patch(req, |cpm: &mut ClusterPodMonitoring| {
                default_cluster_pod_monitoring(&mut cpm.spec)
            })
        }
        MonitoringKind::OperatorConfig => defaulting_patch(req, |config: &mut OperatorConfig| {
            default_operator_config(&mut config.spec)
        }),
        MonitoringKind::Rules | MonitoringKind::ClusterRules => Ok(None),
    }
}
