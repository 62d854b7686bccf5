//! # Rule Files
//!
//! Validates `Rules` and `ClusterRules` and renders one Prometheus rule file
//! per object, with the object's scope labels merged into every rule.

use super::duration::parse_duration;
use super::labels::{
    is_protected, validate_label_name, ExportLabels, LABEL_CLUSTER, LABEL_LOCATION,
    LABEL_NAMESPACE, LABEL_PROJECT_ID,
};
use super::status::{ObjectKey, StatusAccumulator};
use super::CompileError;
use crate::crd::{ClusterRules, MonitoringKind, Rule, RuleGroup, Rules};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Borrowed view over either rules kind
#[derive(Debug, Clone, Copy)]
pub struct RuleSource<'a> {
    pub kind: MonitoringKind,
    pub namespace: Option<&'a str>,
    pub name: &'a str,
    pub groups: &'a [RuleGroup],
}

impl<'a> RuleSource<'a> {
    #[must_use]
    pub fn from_rules(rules: &'a Rules) -> Self {
        Self {
            kind: MonitoringKind::Rules,
            namespace: rules.metadata.namespace.as_deref(),
            name: rules.metadata.name.as_deref().unwrap_or_default(),
            groups: &rules.spec.groups,
        }
    }

    #[must_use]
    pub fn from_cluster_rules(rules: &'a ClusterRules) -> Self {
        Self {
            kind: MonitoringKind::ClusterRules,
            namespace: None,
            name: rules.metadata.name.as_deref().unwrap_or_default(),
            groups: &rules.spec.groups,
        }
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, self.namespace, self.name)
    }

    /// `{kind}__{namespace}__{name}.yaml` with the kind lower-cased, like
    /// the kind segment of secret path keys. Cluster-scoped sources leave the
    /// namespace segment empty.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}__{}__{}.yaml",
            self.kind.as_str().to_ascii_lowercase(),
            self.namespace.unwrap_or_default(),
            self.name
        )
    }
}

#[derive(Serialize)]
struct RuleFile<'a> {
    groups: &'a [RuleGroup],
}

/// Render every valid source, keyed by file name. Invalid sources are left
/// out and marked failed in `acc`.
#[must_use]
pub fn compile_rule_files(
    sources: &[RuleSource<'_>],
    labels: &ExportLabels,
    acc: &mut StatusAccumulator,
) -> BTreeMap<String, String> {
    let mut files = BTreeMap::new();
    for source in sources {
        let key = source.key();
        match compile_rule_file(source, labels) {
            Ok(content) => {
                files.insert(source.file_name(), content);
                acc.record_success(key);
            }
            Err(e) => {
                debug!("Rules compilation failed for {}: {}", key, e);
                acc.record_failure(key, e.to_string());
            }
        }
    }
    files
}

/// Validate one source and render its rule file
///
/// # Errors
///
/// Returns the first validation error found.
pub fn compile_rule_file(source: &RuleSource<'_>, labels: &ExportLabels) -> Result<String, CompileError> {
    validate_groups(source.groups)?;

    let scope = scope_labels(source, labels);
    let groups: Vec<RuleGroup> = source
        .groups
        .iter()
        .map(|group| RuleGroup {
            rules: group
                .rules
                .iter()
                .map(|rule| {
                    let mut rule = rule.clone();
                    rule.labels.extend(scope.clone());
                    rule
                })
                .collect(),
            ..group.clone()
        })
        .collect();

    Ok(serde_yaml::to_string(&RuleFile { groups: &groups })?)
}

/// Labels pinning evaluation results to the object's scope
fn scope_labels(source: &RuleSource<'_>, labels: &ExportLabels) -> BTreeMap<String, String> {
    let mut scope = BTreeMap::new();
    for (key, value) in [
        (LABEL_PROJECT_ID, &labels.project_id),
        (LABEL_LOCATION, &labels.location),
        (LABEL_CLUSTER, &labels.cluster),
    ] {
        if !value.is_empty() {
            scope.insert(key.to_string(), value.clone());
        }
    }
    if source.kind == MonitoringKind::Rules {
        if let Some(ns) = source.namespace {
            scope.insert(LABEL_NAMESPACE.to_string(), ns.to_string());
        }
    }
    scope
}

/// Structural validation shared with the admission webhook
///
/// # Errors
///
/// Returns [`CompileError::InvalidRule`] or a label/duration error.
pub fn validate_groups(groups: &[RuleGroup]) -> Result<(), CompileError> {
    for group in groups {
        if group.name.is_empty() {
            return Err(CompileError::InvalidRule("group name must be set".to_string()));
        }
        if group.rules.is_empty() {
            return Err(CompileError::InvalidRule(format!(
                "group '{}' has no rules",
                group.name
            )));
        }
        if let Some(interval) = &group.interval {
            parse_duration(interval).map_err(|reason| CompileError::InvalidDuration {
                field: format!("groups[{}].interval", group.name),
                value: interval.clone(),
                reason,
            })?;
        }
        for (index, rule) in group.rules.iter().enumerate() {
            validate_rule(&group.name, index, rule)?;
        }
    }
    Ok(())
}

fn validate_rule(group: &str, index: usize, rule: &Rule) -> Result<(), CompileError> {
    let at = format!("group '{group}' rule {index}");
    match (&rule.record, &rule.alert) {
        (Some(_), Some(_)) => {
            return Err(CompileError::InvalidRule(format!(
                "{at}: only one of record or alert may be set"
            )))
        }
        (None, None) => {
            return Err(CompileError::InvalidRule(format!(
                "{at}: one of record or alert must be set"
            )))
        }
        (Some(_), None) if rule.for_duration.is_some() => {
            return Err(CompileError::InvalidRule(format!(
                "{at}: recording rules cannot set 'for'"
            )))
        }
        _ => {}
    }
    if rule.expr.trim().is_empty() {
        return Err(CompileError::InvalidRule(format!("{at}: expr must be set")));
    }
    if let Some(duration) = &rule.for_duration {
        parse_duration(duration).map_err(|reason| CompileError::InvalidDuration {
            field: format!("{at} for"),
            value: duration.clone(),
            reason,
        })?;
    }
    for name in rule.labels.keys() {
        validate_label_name(name)?;
        if is_protected(name) {
            return Err(CompileError::ProtectedLabel(name.clone()));
        }
    }
    Ok(())
}
