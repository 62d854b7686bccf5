//! # Export Labels
//!
//! The one place that decides which `project_id`, `location` and `cluster`
//! values end up on exported data. Both the collector and the rule-evaluator
//! paths resolve their labels through [`resolve_labels`] so the precedence can
//! never drift between them.

use super::CompileError;
use std::collections::BTreeMap;

pub const LABEL_PROJECT_ID: &str = "project_id";
pub const LABEL_LOCATION: &str = "location";
pub const LABEL_CLUSTER: &str = "cluster";
pub const LABEL_NAMESPACE: &str = "namespace";
pub const LABEL_JOB: &str = "job";
pub const LABEL_INSTANCE: &str = "instance";

/// Labels that identify a target and may not be set by users
pub const PROTECTED_LABELS: [&str; 6] = [
    LABEL_PROJECT_ID,
    LABEL_LOCATION,
    LABEL_CLUSTER,
    LABEL_NAMESPACE,
    LABEL_JOB,
    LABEL_INSTANCE,
];

/// Resource hierarchy labels attached to all exported data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportLabels {
    pub project_id: String,
    pub location: String,
    pub cluster: String,
}

/// Resolve the effective export labels.
///
/// Keys present in `external` win over the operator-wide `defaults`; keys not
/// present keep their default.
#[must_use]
pub fn resolve_labels(defaults: &ExportLabels, external: &BTreeMap<String, String>) -> ExportLabels {
    let pick = |key: &str, default: &String| external.get(key).unwrap_or(default).clone();
    ExportLabels {
        project_id: pick(LABEL_PROJECT_ID, &defaults.project_id),
        location: pick(LABEL_LOCATION, &defaults.location),
        cluster: pick(LABEL_CLUSTER, &defaults.cluster),
    }
}

/// The `global.external_labels` block: user labels plus the resolved hierarchy
/// labels. Empty hierarchy values are left out.
#[must_use]
pub fn external_labels(
    resolved: &ExportLabels,
    external: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = external.clone();
    for (key, value) in [
        (LABEL_PROJECT_ID, &resolved.project_id),
        (LABEL_LOCATION, &resolved.location),
        (LABEL_CLUSTER, &resolved.cluster),
    ] {
        if value.is_empty() {
            labels.remove(key);
        } else {
            labels.insert(key.to_string(), value.clone());
        }
    }
    labels
}

#[must_use]
pub fn is_protected(name: &str) -> bool {
    PROTECTED_LABELS.contains(&name)
}

/// Check a label name against `[a-zA-Z_][a-zA-Z0-9_]*`
///
/// # Errors
///
/// Returns [`CompileError::InvalidLabelName`] for anything else.
pub fn validate_label_name(name: &str) -> Result<(), CompileError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(CompileError::InvalidLabelName(name.to_string()))
    }
}

/// Reject protected and reserved (`__`-prefixed) label names as user targets
///
/// # Errors
///
/// Returns [`CompileError::ProtectedLabel`] or [`CompileError::InvalidLabelName`].
pub fn validate_target_label(name: &str) -> Result<(), CompileError> {
    validate_label_name(name)?;
    if is_protected(name) || name.starts_with("__") {
        return Err(CompileError::ProtectedLabel(name.to_string()));
    }
    Ok(())
}
