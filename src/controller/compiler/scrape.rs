//! # Scrape Job Compilation
//!
//! Turns `PodMonitoring` and `ClusterPodMonitoring` endpoints into scrape jobs.
//!
//! Per endpoint the relabel chain is, in order: drop finished pods, namespace
//! filter, label selector, port filter, identity labels (`namespace`, `job`,
//! `instance`), then target labels. Discovery is broad (all pods, or the
//! pods of one namespace) and targets are narrowed by relabeling.

use super::duration::parse_duration;
use super::labels::{LABEL_INSTANCE, LABEL_JOB, LABEL_NAMESPACE};
use super::prometheus::{
    AuthorizationConfig, DiscoveryRole, KubernetesSdConfig, RelabelConfig, ScrapeJobConfig,
    TlsFileConfig,
};
use super::relabel::{
    metric_relabels, selector_relabels, target_label_relabels, META_NAMESPACE, META_NODE_NAME,
    META_POD_NAME, META_POD_PHASE, META_POD_PORT_NAME, META_POD_PORT_NUMBER,
};
use super::status::{ObjectKey, StatusAccumulator};
use super::CompileError;
use crate::crd::{
    ClusterPodMonitoring, LabelSelector, MonitoringKind, PodMonitoring, ScrapeEndpoint,
    ScrapeLimits, ScrapePort, TargetLabels,
};
use std::collections::BTreeSet;
use tracing::debug;

/// Borrowed view over either pod monitoring kind
#[derive(Debug, Clone, Copy)]
pub struct ScrapeSource<'a> {
    pub kind: MonitoringKind,
    /// `None` for cluster-scoped resources
    pub namespace: Option<&'a str>,
    pub name: &'a str,
    pub selector: &'a LabelSelector,
    pub endpoints: &'a [ScrapeEndpoint],
    pub target_labels: &'a TargetLabels,
    pub limits: Option<&'a ScrapeLimits>,
}

impl<'a> ScrapeSource<'a> {
    #[must_use]
    pub fn from_pod_monitoring(pm: &'a PodMonitoring) -> Self {
        Self {
            kind: MonitoringKind::PodMonitoring,
            namespace: pm.metadata.namespace.as_deref(),
            name: pm.metadata.name.as_deref().unwrap_or_default(),
            selector: &pm.spec.selector,
            endpoints: &pm.spec.endpoints,
            target_labels: &pm.spec.target_labels,
            limits: pm.spec.limits.as_ref(),
        }
    }

    #[must_use]
    pub fn from_cluster_pod_monitoring(cpm: &'a ClusterPodMonitoring) -> Self {
        Self {
            kind: MonitoringKind::ClusterPodMonitoring,
            namespace: None,
            name: cpm.metadata.name.as_deref().unwrap_or_default(),
            selector: &cpm.spec.selector,
            endpoints: &cpm.spec.endpoints,
            target_labels: &cpm.spec.target_labels,
            limits: cpm.spec.limits.as_ref(),
        }
    }

    #[must_use]
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, self.namespace, self.name)
    }

    /// `{Kind}/{namespace}/{name}/{port}`, namespace omitted for cluster scope
    #[must_use]
    pub fn job_name(&self, port: &ScrapePort) -> String {
        match self.namespace {
            Some(ns) => format!("{}/{}/{}/{}", self.kind, ns, self.name, port),
            None => format!("{}/{}/{}", self.kind, self.name, port),
        }
    }
}

/// Compiled scrape jobs, sorted by job name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrapeConfigSet {
    pub jobs: Vec<ScrapeJobConfig>,
}

impl ScrapeConfigSet {
    fn sorted(mut jobs: Vec<ScrapeJobConfig>) -> Self {
        jobs.sort_by(|a, b| a.job_name.cmp(&b.job_name));
        Self { jobs }
    }
}

/// Compile every source, isolating failures per resource and per endpoint.
///
/// A resource-level problem (bad selector, bad target labels) drops all of
/// that resource's jobs. An endpoint-level problem drops only that endpoint.
/// Either way the resource is marked failed in `acc` and compilation of the
/// remaining resources continues.
#[must_use]
pub fn compile_scrape_configs(
    sources: &[ScrapeSource<'_>],
    acc: &mut StatusAccumulator,
) -> ScrapeConfigSet {
    let mut jobs = Vec::new();
    for source in sources {
        let key = source.key();
        let (compiled, errors) = compile_source(source);
        jobs.extend(compiled);
        if errors.is_empty() {
            acc.record_success(key);
        } else {
            for e in errors {
                debug!("Scrape compilation failed for {}: {}", key, e);
                acc.record_failure(key.clone(), e.to_string());
            }
        }
    }
    ScrapeConfigSet::sorted(jobs)
}

/// Compile a single resource, returning good jobs and per-endpoint errors
#[must_use]
pub fn compile_source(source: &ScrapeSource<'_>) -> (Vec<ScrapeJobConfig>, Vec<CompileError>) {
    let shared = match shared_relabels(source) {
        Ok(shared) => shared,
        Err(e) => return (Vec::new(), vec![e]),
    };
    let target_rules = match target_label_relabels(source.target_labels) {
        Ok(rules) => rules,
        Err(e) => return (Vec::new(), vec![e]),
    };

    let mut jobs = Vec::new();
    let mut errors = Vec::new();
    let mut seen_ports = BTreeSet::new();

    for (index, endpoint) in source.endpoints.iter().enumerate() {
        match compile_endpoint(source, index, endpoint, &shared, &target_rules) {
            Ok(job) => {
                if seen_ports.insert(job.job_name.clone()) {
                    jobs.push(job);
                } else {
                    errors.push(CompileError::DuplicatePort {
                        index,
                        port: endpoint.port.as_ref().map(ToString::to_string).unwrap_or_default(),
                    });
                }
            }
            Err(e) => errors.push(e),
        }
    }

    (jobs, errors)
}

/// Rules shared by every endpoint of a resource
fn shared_relabels(source: &ScrapeSource<'_>) -> Result<Vec<RelabelConfig>, CompileError> {
    let mut rules = vec![RelabelConfig::drop(META_POD_PHASE, "(Failed|Succeeded)")];
    if let Some(ns) = source.namespace {
        rules.push(RelabelConfig::keep(META_NAMESPACE, regex::escape(ns)));
    }
    rules.extend(selector_relabels(source.selector)?);
    Ok(rules)
}

fn compile_endpoint(
    source: &ScrapeSource<'_>,
    index: usize,
    endpoint: &ScrapeEndpoint,
    shared: &[RelabelConfig],
    target_rules: &[RelabelConfig],
) -> Result<ScrapeJobConfig, CompileError> {
    let port = endpoint
        .port
        .as_ref()
        .ok_or(CompileError::MissingPort { index })?;
    if let ScrapePort::Name(name) = port {
        if name.is_empty() {
            return Err(CompileError::MissingPort { index });
        }
    }

    let (scrape_interval, scrape_timeout) = validate_timing(endpoint)?;
    let scheme = endpoint.scheme.clone().unwrap_or_else(|| "http".to_string());
    if scheme != "http" && scheme != "https" {
        return Err(CompileError::InvalidScheme(scheme));
    }

    let mut relabel_configs = shared.to_vec();
    relabel_configs.push(match port {
        ScrapePort::Name(name) => RelabelConfig::keep(META_POD_PORT_NAME, regex::escape(name)),
        ScrapePort::Number(number) => RelabelConfig::keep(META_POD_PORT_NUMBER, number.to_string()),
    });
    relabel_configs.push(RelabelConfig::copy(META_NAMESPACE, LABEL_NAMESPACE));
    relabel_configs.push(RelabelConfig::set(LABEL_JOB, source.name));
    relabel_configs.push(RelabelConfig::rewrite(
        META_POD_NAME,
        "(.+)",
        LABEL_INSTANCE,
        format!("$1:{port}"),
    ));
    relabel_configs.extend_from_slice(target_rules);

    let limits = source.limits.cloned().unwrap_or_default();

    Ok(ScrapeJobConfig {
        job_name: source.job_name(port),
        scrape_interval,
        scrape_timeout,
        metrics_path: endpoint.path.clone().unwrap_or_else(|| "/metrics".to_string()),
        scheme,
        params: endpoint.params.clone(),
        authorization: None,
        tls_config: None,
        kubernetes_sd_configs: vec![discovery(source.namespace)],
        relabel_configs,
        metric_relabel_configs: metric_relabels(&endpoint.metric_relabeling)?,
        sample_limit: limits.samples,
        label_limit: limits.labels,
        label_name_length_limit: limits.label_name_length,
        label_value_length_limit: limits.label_value_length,
    })
}

/// Pod discovery restricted to the collector's own node
fn discovery(namespace: Option<&str>) -> KubernetesSdConfig {
    let sd = KubernetesSdConfig::new(DiscoveryRole::Pod).with_field_selector("spec.nodeName=$(NODE_NAME)");
    match namespace {
        Some(ns) => sd.in_namespace(ns),
        None => sd,
    }
}

/// Validate interval and timeout, defaulting the timeout to the interval
fn validate_timing(endpoint: &ScrapeEndpoint) -> Result<(String, String), CompileError> {
    let interval = parse_duration(&endpoint.interval).map_err(|reason| {
        CompileError::InvalidDuration {
            field: "interval".to_string(),
            value: endpoint.interval.clone(),
            reason,
        }
    })?;
    if interval.is_zero() {
        return Err(CompileError::InvalidDuration {
            field: "interval".to_string(),
            value: endpoint.interval.clone(),
            reason: "must be greater than zero".to_string(),
        });
    }

    let timeout = match &endpoint.timeout {
        None => return Ok((endpoint.interval.clone(), endpoint.interval.clone())),
        Some(t) => t,
    };
    let timeout_value = parse_duration(timeout).map_err(|reason| CompileError::InvalidDuration {
        field: "timeout".to_string(),
        value: timeout.clone(),
        reason,
    })?;
    if timeout_value > interval {
        return Err(CompileError::TimeoutExceedsInterval {
            timeout: timeout.clone(),
            interval: endpoint.interval.clone(),
        });
    }
    Ok((endpoint.interval.clone(), timeout.clone()))
}

const SERVICE_ACCOUNT_TOKEN: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const SERVICE_ACCOUNT_CA: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Node jobs for kubelet and cAdvisor metrics
///
/// # Errors
///
/// Fails when the interval is not a valid duration.
pub fn kubelet_jobs(interval: &str) -> Result<Vec<ScrapeJobConfig>, CompileError> {
    parse_duration(interval).map_err(|reason| CompileError::InvalidDuration {
        field: "kubeletScraping.interval".to_string(),
        value: interval.to_string(),
        reason,
    })?;

    let job = |suffix: &str, path: &str| ScrapeJobConfig {
        job_name: format!("kubelet/{suffix}"),
        scrape_interval: interval.to_string(),
        scrape_timeout: interval.to_string(),
        metrics_path: path.to_string(),
        scheme: "https".to_string(),
        params: Default::default(),
        authorization: Some(AuthorizationConfig {
            auth_type: Some("Bearer".to_string()),
            credentials_file: Some(SERVICE_ACCOUNT_TOKEN.to_string()),
        }),
        tls_config: Some(TlsFileConfig {
            ca_file: Some(SERVICE_ACCOUNT_CA.to_string()),
            ..Default::default()
        }),
        kubernetes_sd_configs: vec![KubernetesSdConfig::new(DiscoveryRole::Node)
            .with_field_selector("metadata.name=$(NODE_NAME)")],
        relabel_configs: vec![
            RelabelConfig::set(LABEL_JOB, "kubelet"),
            RelabelConfig::copy(META_NODE_NAME, "node"),
            RelabelConfig::rewrite(META_NODE_NAME, "(.+)", LABEL_INSTANCE, format!("$1:{suffix}")),
        ],
        metric_relabel_configs: Vec::new(),
        sample_limit: None,
        label_limit: None,
        label_name_length_limit: None,
        label_value_length_limit: None,
    };

    Ok(vec![
        job("cadvisor", "/metrics/cadvisor"),
        job("metrics", "/metrics"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::compiler::prometheus::RelabelAction;
    use std::collections::BTreeMap;

    fn selector(app: &str) -> LabelSelector {
        LabelSelector {
            match_labels: BTreeMap::from([("app".to_string(), app.to_string())]),
            match_expressions: Vec::new(),
        }
    }

    fn endpoint(port: Option<ScrapePort>, interval: &str) -> ScrapeEndpoint {
        ScrapeEndpoint {
            port,
            interval: interval.to_string(),
            ..Default::default()
        }
    }

    fn has_rule(job: &ScrapeJobConfig, action: RelabelAction, source: &str, regex: &str) -> bool {
        job.relabel_configs.iter().any(|r| {
            r.action == action
                && r.source_labels == vec![source.to_string()]
                && r.regex.as_deref() == Some(regex)
        })
    }

    #[test]
    fn test_named_port_job() {
        let sel = selector("foo");
        let endpoints = vec![endpoint(Some(ScrapePort::Name("metrics".to_string())), "15s")];
        let target_labels = TargetLabels::default();
        let source = ScrapeSource {
            kind: MonitoringKind::PodMonitoring,
            namespace: Some("ns1"),
            name: "frontend",
            selector: &sel,
            endpoints: &endpoints,
            target_labels: &target_labels,
            limits: None,
        };

        let (jobs, errors) = compile_source(&source);
        assert!(errors.is_empty());
        let job = &jobs[0];
        assert_eq!(job.job_name, "PodMonitoring/ns1/frontend/metrics");
        assert_eq!(job.scrape_interval, "15s");
        assert_eq!(job.scrape_timeout, "15s");
        assert!(has_rule(job, RelabelAction::Keep, META_NAMESPACE, "ns1"));
        assert!(has_rule(job, RelabelAction::Keep, "__meta_kubernetes_pod_label_app", "foo"));
        assert!(has_rule(job, RelabelAction::Keep, META_POD_PORT_NAME, "metrics"));
        assert!(job.relabel_configs.iter().any(|r| {
            r.target_label.as_deref() == Some("job") && r.replacement.as_deref() == Some("frontend")
        }));
        assert!(job.relabel_configs.iter().any(|r| {
            r.target_label.as_deref() == Some("instance")
                && r.replacement.as_deref() == Some("$1:metrics")
        }));
    }

    #[test]
    fn test_numeric_port_and_cluster_scope() {
        let sel = LabelSelector::default();
        let endpoints = vec![endpoint(Some(ScrapePort::Number(9090)), "30s")];
        let target_labels = TargetLabels::default();
        let source = ScrapeSource {
            kind: MonitoringKind::ClusterPodMonitoring,
            namespace: None,
            name: "node-exporter",
            selector: &sel,
            endpoints: &endpoints,
            target_labels: &target_labels,
            limits: None,
        };
        let (jobs, errors) = compile_source(&source);
        assert!(errors.is_empty());
        assert_eq!(jobs[0].job_name, "ClusterPodMonitoring/node-exporter/9090");
        assert!(has_rule(&jobs[0], RelabelAction::Keep, META_POD_PORT_NUMBER, "9090"));
        assert!(!jobs[0]
            .relabel_configs
            .iter()
            .any(|r| r.action == RelabelAction::Keep && r.source_labels == vec![META_NAMESPACE]));
        assert!(jobs[0].kubernetes_sd_configs[0].namespaces.is_none());
    }

    #[test]
    fn test_missing_port_skips_only_that_endpoint() {
        let sel = selector("foo");
        let endpoints = vec![
            endpoint(None, "15s"),
            endpoint(Some(ScrapePort::Name("web".to_string())), "15s"),
        ];
        let target_labels = TargetLabels::default();
        let source = ScrapeSource {
            kind: MonitoringKind::PodMonitoring,
            namespace: Some("ns1"),
            name: "mixed",
            selector: &sel,
            endpoints: &endpoints,
            target_labels: &target_labels,
            limits: None,
        };
        let (jobs, errors) = compile_source(&source);
        assert_eq!(jobs.len(), 1);
        assert_eq!(errors, vec![CompileError::MissingPort { index: 0 }]);
    }

    #[test]
    fn test_timeout_must_not_exceed_interval() {
        let mut ep = endpoint(Some(ScrapePort::Number(80)), "10s");
        ep.timeout = Some("20s".to_string());
        assert!(matches!(
            validate_timing(&ep),
            Err(CompileError::TimeoutExceedsInterval { .. })
        ));
        ep.timeout = Some("5s".to_string());
        assert_eq!(
            validate_timing(&ep),
            Ok(("10s".to_string(), "5s".to_string()))
        );
        ep.interval = "soon".to_string();
        assert!(matches!(
            validate_timing(&ep),
            Err(CompileError::InvalidDuration { .. })
        ));
    }

    #[test]
    fn test_duplicate_port_is_rejected() {
        let sel = LabelSelector::default();
        let endpoints = vec![
            endpoint(Some(ScrapePort::Number(80)), "10s"),
            endpoint(Some(ScrapePort::Number(80)), "20s"),
        ];
        let target_labels = TargetLabels::default();
        let source = ScrapeSource {
            kind: MonitoringKind::PodMonitoring,
            namespace: Some("ns"),
            name: "dup",
            selector: &sel,
            endpoints: &endpoints,
            target_labels: &target_labels,
            limits: None,
        };
        let (jobs, errors) = compile_source(&source);
        assert_eq!(jobs.len(), 1);
        assert!(matches!(errors[0], CompileError::DuplicatePort { index: 1, .. }));
    }

    #[test]
    fn test_limits_are_mapped() {
        let sel = LabelSelector::default();
        let endpoints = vec![endpoint(Some(ScrapePort::Number(80)), "10s")];
        let target_labels = TargetLabels::default();
        let limits = ScrapeLimits {
            samples: Some(1000),
            labels: Some(30),
            label_name_length: Some(64),
            label_value_length: Some(256),
        };
        let source = ScrapeSource {
            kind: MonitoringKind::PodMonitoring,
            namespace: Some("ns"),
            name: "limited",
            selector: &sel,
            endpoints: &endpoints,
            target_labels: &target_labels,
            limits: Some(&limits),
        };
        let (jobs, _) = compile_source(&source);
        assert_eq!(jobs[0].sample_limit, Some(1000));
        assert_eq!(jobs[0].label_limit, Some(30));
        assert_eq!(jobs[0].label_name_length_limit, Some(64));
        assert_eq!(jobs[0].label_value_length_limit, Some(256));
    }

    #[test]
    fn test_kubelet_jobs() {
        let jobs = kubelet_jobs("30s").unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.job_name.as_str()).collect();
        assert_eq!(names, vec!["kubelet/cadvisor", "kubelet/metrics"]);
        assert!(kubelet_jobs("often").is_err());
    }
}
