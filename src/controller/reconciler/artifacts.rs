//! # Generated Artifacts
//!
//! Config maps and secrets the operator owns, and the runtime flags it patches
//! into the collector, rule-evaluator and Alertmanager workloads.
//!
//! Every write is an idempotent upsert: generated objects are applied with
//! server-side apply and fully replace what was there before.

use crate::constants::FIELD_MANAGER;
use crate::controller::compiler::ExportLabels;
use crate::crd::{CollectionSpec, RuleEvaluatorSpec};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PodSpec, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use tracing::{debug, info, warn};

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

fn owned_meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(BTreeMap::from([(
            MANAGED_BY_LABEL.to_string(),
            FIELD_MANAGER.to_string(),
        )])),
        ..Default::default()
    }
}

/// Create or replace a generated config map
pub async fn apply_config_map(
    client: &Client,
    namespace: &str,
    name: &str,
    data: BTreeMap<String, String>,
) -> Result<(), kube::Error> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let config_map = ConfigMap {
        metadata: owned_meta(namespace, name),
        data: Some(data),
        ..Default::default()
    };
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&config_map),
    )
    .await?;
    debug!("Applied config map {}/{}", namespace, name);
    Ok(())
}

/// Create or replace a generated secret
pub async fn apply_secret(
    client: &Client,
    namespace: &str,
    name: &str,
    data: BTreeMap<String, ByteString>,
) -> Result<(), kube::Error> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = Secret {
        metadata: owned_meta(namespace, name),
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };
    api.patch(
        name,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&secret),
    )
    .await?;
    debug!("Applied secret {}/{}", namespace, name);
    Ok(())
}

/// A command-line flag owned by the operator.
///
/// Every value becomes one `--name=value` argument. A flag without values is
/// removed from the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
    pub name: &'static str,
    pub values: Vec<String>,
}

impl Flag {
    /// Flag with a single value, or none when the value is empty
    #[must_use]
    pub fn single(name: &'static str, value: Option<&str>) -> Self {
        Self {
            name,
            values: value
                .filter(|v| !v.is_empty())
                .map(ToString::to_string)
                .into_iter()
                .collect(),
        }
    }

    #[must_use]
    pub fn repeated(name: &'static str, values: &[String]) -> Self {
        Self {
            name,
            values: values.iter().filter(|v| !v.is_empty()).cloned().collect(),
        }
    }
}

fn flag_name(arg: &str) -> &str {
    arg.split_once('=').map_or(arg, |(name, _)| name)
}

/// Replace every operator-owned flag in `existing`, keeping all other
/// arguments in their original order
#[must_use]
pub fn merge_args(existing: &[String], flags: &[Flag]) -> Vec<String> {
    let owned: BTreeSet<&str> = flags.iter().map(|f| f.name).collect();
    let mut args: Vec<String> = existing
        .iter()
        .filter(|arg| !owned.contains(flag_name(arg)))
        .cloned()
        .collect();
    for flag in flags {
        for value in &flag.values {
            args.push(format!("{}={}", flag.name, value));
        }
    }
    args
}

fn export_label_flags(labels: &ExportLabels) -> [Flag; 3] {
    [
        Flag::single("--export.label.project-id", Some(&labels.project_id)),
        Flag::single("--export.label.location", Some(&labels.location)),
        Flag::single("--export.label.cluster", Some(&labels.cluster)),
    ]
}

/// Flags of the collector container
#[must_use]
pub fn collector_flags(
    labels: &ExportLabels,
    collection: &CollectionSpec,
    credentials_file: Option<&str>,
) -> Vec<Flag> {
    let mut flags = export_label_flags(labels).to_vec();
    flags.push(Flag::repeated(
        "--export.match",
        &collection.filter.match_one_of,
    ));
    flags.push(Flag::single(
        "--export.compression",
        collection.compression.as_deref(),
    ));
    flags.push(Flag::single("--export.credentials-file", credentials_file));
    flags
}

/// Flags of the rule-evaluator container
#[must_use]
pub fn evaluator_flags(
    labels: &ExportLabels,
    rules: &RuleEvaluatorSpec,
    credentials_file: Option<&str>,
) -> Vec<Flag> {
    let mut flags = export_label_flags(labels).to_vec();
    let query_project = rules
        .query_project_id
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(&labels.project_id);
    flags.push(Flag::single("--query.project-id", Some(query_project)));
    flags.push(Flag::single(
        "--query.generator-url",
        rules.generator_url.as_deref(),
    ));
    flags.push(Flag::single("--query.credentials-file", credentials_file));
    flags.push(Flag::single("--export.credentials-file", credentials_file));
    flags
}

/// Flags of the managed Alertmanager container
#[must_use]
pub fn alertmanager_flags(external_url: Option<&str>) -> Vec<Flag> {
    vec![Flag::single("--web.external-url", external_url)]
}

/// Workloads whose pod template the operator patches
pub trait PodTemplateOwner:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
    fn pod_spec(&self) -> Option<&PodSpec>;
}

impl PodTemplateOwner for Deployment {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

impl PodTemplateOwner for DaemonSet {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

impl PodTemplateOwner for StatefulSet {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

/// Patch `flags` into one container of a workload.
///
/// A missing workload or container is not an error: the workload may not be
/// deployed yet and will be patched once it appears. Returns whether a patch
/// was sent.
pub async fn patch_container_args<K: PodTemplateOwner>(
    client: &Client,
    namespace: &str,
    name: &str,
    container: &str,
    flags: &[Flag],
) -> Result<bool, kube::Error>
where
    K: Resource<Scope = NamespaceResourceScope>,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let kind = K::kind(&());
    let Some(workload) = api.get_opt(name).await? else {
        debug!("{} {}/{} not found, skipping flag update", kind, namespace, name);
        return Ok(false);
    };
    let Some(current) = workload
        .pod_spec()
        .and_then(|spec| spec.containers.iter().find(|c| c.name == container))
    else {
        warn!(
            "{} {}/{} has no container '{}', skipping flag update",
            kind, namespace, name, container
        );
        return Ok(false);
    };

    let existing = current.args.clone().unwrap_or_default();
    let args = merge_args(&existing, flags);
    if args == existing {
        debug!("{} {}/{} flags unchanged", kind, namespace, name);
        return Ok(false);
    }

    let patch = serde_json::json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [{ "name": container, "args": args }]
                }
            }
        }
    });
    let params = PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    api.patch(name, &params, &Patch::Strategic(patch)).await?;
    info!("Updated flags of {} {}/{}", kind, namespace, name);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_merge_args_replaces_owned_flags() {
        let existing = args(&[
            "--config.file=/etc/prometheus/config.yaml",
            "--export.label.cluster=old",
            "--export.match=up",
            "--export.match=foo",
            "--web.listen-address=:19090",
        ]);
        let flags = vec![
            Flag::single("--export.label.cluster", Some("prod")),
            Flag::repeated("--export.match", &args(&["{job=\"a\"}"])),
        ];
        let merged = merge_args(&existing, &flags);
        assert_eq!(
            merged,
            args(&[
                "--config.file=/etc/prometheus/config.yaml",
                "--web.listen-address=:19090",
                "--export.label.cluster=prod",
                "--export.match={job=\"a\"}",
            ])
        );
    }

    #[test]
    fn test_merge_args_is_idempotent() {
        let flags = vec![Flag::single("--export.compression", Some("gzip"))];
        let once = merge_args(&args(&["--foo"]), &flags);
        let twice = merge_args(&once, &flags);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_empty_flag_removes_argument() {
        let existing = args(&["--query.generator-url=http://old", "--foo=bar"]);
        let merged = merge_args(&existing, &[Flag::single("--query.generator-url", Some(""))]);
        assert_eq!(merged, args(&["--foo=bar"]));
    }

    #[test]
    fn test_evaluator_query_project_falls_back_to_labels() {
        let labels = ExportLabels {
            project_id: "proj".to_string(),
            location: "loc".to_string(),
            cluster: String::new(),
        };
        let flags = evaluator_flags(&labels, &RuleEvaluatorSpec::default(), Some("/etc/secrets/x"));
        let merged = merge_args(&[], &flags);
        assert!(merged.contains(&"--query.project-id=proj".to_string()));
        assert!(merged.contains(&"--query.credentials-file=/etc/secrets/x".to_string()));
        assert!(merged.contains(&"--export.credentials-file=/etc/secrets/x".to_string()));
        assert!(!merged.iter().any(|a| a.starts_with("--export.label.cluster")));

        let rules = RuleEvaluatorSpec {
            query_project_id: Some("other".to_string()),
            ..Default::default()
        };
        let merged = merge_args(&[], &evaluator_flags(&labels, &rules, None));
        assert!(merged.contains(&"--query.project-id=other".to_string()));
        assert!(!merged.iter().any(|a| a.contains("credentials-file")));
    }

    #[test]
    fn test_collector_flags() {
        let collection = CollectionSpec {
            compression: Some("gzip".to_string()),
            filter: crate::crd::ExportFilters {
                match_one_of: args(&["up", "{__name__=~\"kube_.*\"}"]),
            },
            ..Default::default()
        };
        let merged = merge_args(&[], &collector_flags(&ExportLabels::default(), &collection, None));
        assert_eq!(
            merged,
            args(&[
                "--export.match=up",
                "--export.match={__name__=~\"kube_.*\"}",
                "--export.compression=gzip",
            ])
        );
    }
}
