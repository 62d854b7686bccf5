//! # Label Rewriting
//!
//! Translation of label selectors, target labels and user relabeling rules
//! into Prometheus relabel configs.
//!
//! Label names are sanitized the same way the discovery layer builds its
//! meta-labels. If the two ever diverge, lookups silently match nothing.

use super::labels::validate_target_label;
use super::prometheus::{RelabelAction, RelabelConfig};
use super::CompileError;
use crate::crd::{LabelSelector, LabelSelectorOperator, RelabelingRule, TargetLabels};

pub const META_NAMESPACE: &str = "__meta_kubernetes_namespace";
pub const META_POD_NAME: &str = "__meta_kubernetes_pod_name";
pub const META_POD_PHASE: &str = "__meta_kubernetes_pod_phase";
pub const META_POD_NODE_NAME: &str = "__meta_kubernetes_pod_node_name";
pub const META_POD_CONTAINER_NAME: &str = "__meta_kubernetes_pod_container_name";
pub const META_POD_PORT_NAME: &str = "__meta_kubernetes_pod_container_port_name";
pub const META_POD_PORT_NUMBER: &str = "__meta_kubernetes_pod_container_port_number";
pub const META_SERVICE_NAME: &str = "__meta_kubernetes_service_name";
pub const META_ENDPOINT_PORT_NAME: &str = "__meta_kubernetes_endpoint_port_name";
pub const META_NODE_NAME: &str = "__meta_kubernetes_node_name";

/// Replace every character outside `[A-Za-z0-9_]` with `_`
#[must_use]
pub fn sanitize_label_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Meta-label carrying the value of pod label `name`
#[must_use]
pub fn pod_label_meta(name: &str) -> String {
    format!("__meta_kubernetes_pod_label_{}", sanitize_label_name(name))
}

/// Meta-label set to `true` when pod label `name` exists
#[must_use]
pub fn pod_label_present_meta(name: &str) -> String {
    format!(
        "__meta_kubernetes_pod_labelpresent_{}",
        sanitize_label_name(name)
    )
}

/// Translate a label selector into keep/drop rules.
///
/// Equality matchers come first, sorted by key, followed by expressions in
/// declaration order.
///
/// # Errors
///
/// Returns [`CompileError::InvalidSelector`] for empty keys or for
/// `In`/`NotIn` expressions without values.
pub fn selector_relabels(selector: &LabelSelector) -> Result<Vec<RelabelConfig>, CompileError> {
    let mut rules = Vec::new();

    // BTreeMap iteration is already sorted by key
    for (key, value) in &selector.match_labels {
        if key.is_empty() {
            return Err(CompileError::InvalidSelector(
                "empty key in matchLabels".to_string(),
            ));
        }
        rules.push(RelabelConfig::keep(&pod_label_meta(key), regex::escape(value)));
    }

    for expr in &selector.match_expressions {
        if expr.key.is_empty() {
            return Err(CompileError::InvalidSelector(
                "empty key in matchExpressions".to_string(),
            ));
        }
        match expr.operator {
            LabelSelectorOperator::In | LabelSelectorOperator::NotIn => {
                if expr.values.is_empty() {
                    return Err(CompileError::InvalidSelector(format!(
                        "operator {:?} on key '{}' requires values",
                        expr.operator, expr.key
                    )));
                }
                let alternatives = expr
                    .values
                    .iter()
                    .map(|v| regex::escape(v))
                    .collect::<Vec<_>>()
                    .join("|");
                let meta = pod_label_meta(&expr.key);
                rules.push(if expr.operator == LabelSelectorOperator::In {
                    RelabelConfig::keep(&meta, alternatives)
                } else {
                    RelabelConfig::drop(&meta, alternatives)
                });
            }
            LabelSelectorOperator::Exists | LabelSelectorOperator::DoesNotExist => {
                if !expr.values.is_empty() {
                    return Err(CompileError::InvalidSelector(format!(
                        "operator {:?} on key '{}' must not have values",
                        expr.operator, expr.key
                    )));
                }
                let meta = pod_label_present_meta(&expr.key);
                rules.push(if expr.operator == LabelSelectorOperator::Exists {
                    RelabelConfig::keep(&meta, "true")
                } else {
                    RelabelConfig::drop(&meta, "true")
                });
            }
        }
    }

    Ok(rules)
}

/// Rules attaching pod metadata and copied pod labels to each target.
///
/// # Errors
///
/// Fails on unknown metadata names and on `fromPod` mappings whose target is a
/// protected or reserved label.
pub fn target_label_relabels(target_labels: &TargetLabels) -> Result<Vec<RelabelConfig>, CompileError> {
    let mut rules = Vec::new();

    let default_metadata = ["container".to_string(), "pod".to_string()];
    let mut metadata: Vec<&String> = target_labels
        .metadata
        .as_deref()
        .unwrap_or(&default_metadata)
        .iter()
        .collect();
    metadata.sort();
    metadata.dedup();

    for name in metadata {
        let source = match name.as_str() {
            "pod" => META_POD_NAME,
            "container" => META_POD_CONTAINER_NAME,
            "node" => META_POD_NODE_NAME,
            other => return Err(CompileError::InvalidMetadataLabel(other.to_string())),
        };
        rules.push(RelabelConfig::copy(source, name));
    }

    for mapping in &target_labels.from_pod {
        let target = mapping.to.as_deref().unwrap_or(&mapping.from);
        validate_target_label(target)?;
        rules.push(RelabelConfig::copy(&pod_label_meta(&mapping.from), target));
    }

    Ok(rules)
}

/// Validate and convert user metric relabeling rules
///
/// # Errors
///
/// Rejects unknown actions, regexes that do not compile and writes to
/// protected labels.
pub fn metric_relabels(rules: &[RelabelingRule]) -> Result<Vec<RelabelConfig>, CompileError> {
    rules
        .iter()
        .map(|rule| {
            let action = match rule.action.as_deref() {
                None | Some("") => RelabelAction::Replace,
                Some(a) => RelabelAction::parse(a)
                    .ok_or_else(|| CompileError::InvalidRelabelAction(a.to_string()))?,
            };
            if let Some(re) = &rule.regex {
                regex::Regex::new(re).map_err(|e| CompileError::InvalidRegex {
                    regex: re.clone(),
                    reason: e.to_string(),
                })?;
            }
            let writes_target = matches!(action, RelabelAction::Replace | RelabelAction::HashMod);
            if writes_target {
                match &rule.target_label {
                    Some(target) => validate_target_label(target)?,
                    None if action == RelabelAction::HashMod => {
                        return Err(CompileError::InvalidRelabelAction(
                            "hashmod requires targetLabel".to_string(),
                        ))
                    }
                    None => {}
                }
            }
            if matches!(action, RelabelAction::LabelDrop | RelabelAction::LabelKeep) {
                // Matching protected labels by regex would strip target identity
                if let Some(re) = &rule.regex {
                    for protected in super::labels::PROTECTED_LABELS {
                        if anchored_match(re, protected) {
                            return Err(CompileError::ProtectedLabel(protected.to_string()));
                        }
                    }
                }
            }
            Ok(RelabelConfig {
                source_labels: rule.source_labels.clone(),
                separator: rule.separator.clone(),
                regex: rule.regex.clone(),
                modulus: rule.modulus,
                target_label: rule.target_label.clone(),
                replacement: rule.replacement.clone(),
                action,
            })
        })
        .collect()
}

/// Fully anchored regex match, as Prometheus applies relabel regexes
fn anchored_match(re: &str, value: &str) -> bool {
    regex::Regex::new(&format!("^(?:{re})$")).is_ok_and(|r| r.is_match(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LabelMapping, LabelSelectorRequirement};
    use std::collections::BTreeMap;

    #[test]
    fn test_sanitize_label_name() {
        assert_eq!(sanitize_label_name("app"), "app");
        assert_eq!(
            sanitize_label_name("app.kubernetes.io/name"),
            "app_kubernetes_io_name"
        );
        assert_eq!(sanitize_label_name("a-b"), "a_b");
    }

    #[test]
    fn test_match_labels_sorted_and_escaped() {
        let selector = LabelSelector {
            match_labels: BTreeMap::from([
                ("zone".to_string(), "a".to_string()),
                ("app".to_string(), "foo.bar".to_string()),
            ]),
            match_expressions: Vec::new(),
        };
        let rules = selector_relabels(&selector).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].source_labels, vec!["__meta_kubernetes_pod_label_app"]);
        assert_eq!(rules[0].regex.as_deref(), Some(r"foo\.bar"));
        assert_eq!(rules[1].source_labels, vec!["__meta_kubernetes_pod_label_zone"]);
    }

    #[test]
    fn test_expressions() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![
                LabelSelectorRequirement {
                    key: "tier".to_string(),
                    operator: LabelSelectorOperator::In,
                    values: vec!["web".to_string(), "api".to_string()],
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: LabelSelectorOperator::DoesNotExist,
                    values: Vec::new(),
                },
            ],
        };
        let rules = selector_relabels(&selector).unwrap();
        assert_eq!(rules[0].action, RelabelAction::Keep);
        assert_eq!(rules[0].regex.as_deref(), Some("web|api"));
        assert_eq!(rules[1].action, RelabelAction::Drop);
        assert_eq!(
            rules[1].source_labels,
            vec!["__meta_kubernetes_pod_labelpresent_canary"]
        );
        assert_eq!(rules[1].regex.as_deref(), Some("true"));
    }

    #[test]
    fn test_in_without_values_is_rejected() {
        let selector = LabelSelector {
            match_labels: BTreeMap::new(),
            match_expressions: vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: LabelSelectorOperator::NotIn,
                values: Vec::new(),
            }],
        };
        assert!(matches!(
            selector_relabels(&selector),
            Err(CompileError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_from_pod_rejects_protected_target() {
        let target_labels = TargetLabels {
            metadata: Some(Vec::new()),
            from_pod: vec![LabelMapping {
                from: "team".to_string(),
                to: Some("namespace".to_string()),
            }],
        };
        assert_eq!(
            target_label_relabels(&target_labels),
            Err(CompileError::ProtectedLabel("namespace".to_string()))
        );
    }

    #[test]
    fn test_default_metadata_is_pod_and_container() {
        let rules = target_label_relabels(&TargetLabels::default()).unwrap();
        let targets: Vec<_> = rules.iter().filter_map(|r| r.target_label.as_deref()).collect();
        assert_eq!(targets, vec!["container", "pod"]);
    }

    #[test]
    fn test_metric_relabel_rejects_bad_regex_and_action() {
        let bad_regex = RelabelingRule {
            regex: Some("(".to_string()),
            action: Some("drop".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            metric_relabels(&[bad_regex]),
            Err(CompileError::InvalidRegex { .. })
        ));

        let bad_action = RelabelingRule {
            action: Some("explode".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            metric_relabels(&[bad_action]),
            Err(CompileError::InvalidRelabelAction(_))
        ));

        let drops_identity = RelabelingRule {
            regex: Some("inst.*".to_string()),
            action: Some("labeldrop".to_string()),
            ..Default::default()
        };
        assert_eq!(
            metric_relabels(&[drops_identity]),
            Err(CompileError::ProtectedLabel("instance".to_string()))
        );
    }
}
