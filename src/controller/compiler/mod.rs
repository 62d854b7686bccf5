//! # Config Compiler
//!
//! Pure translation from monitoring resources to collector and rule-evaluator
//! configuration. No I/O happens here: secret references are returned as
//! [`SecretSource`](crate::controller::secrets::SecretSource)s and resolved by
//! the caller.
//!
//! ## Module Structure
//!
//! - `scrape.rs` - `PodMonitoring`/`ClusterPodMonitoring` to scrape jobs
//! - `alerting.rs` - Alertmanager targets
//! - `rules.rs` - Rule files
//! - `relabel.rs` - Selector, target label and metric relabel translation
//! - `labels.rs` - Export label precedence and protected labels
//! - `prometheus.rs` - Serializable configuration model
//! - `status.rs` - Per-resource outcome accumulator

pub mod alerting;
pub mod duration;
mod error;
pub mod labels;
pub mod prometheus;
pub mod relabel;
pub mod rules;
pub mod scrape;
pub mod status;

pub use alerting::CompiledAlertmanager;
pub use error::CompileError;
pub use labels::{resolve_labels, ExportLabels};
pub use prometheus::{AlertingConfig, AlertmanagerConfig, GlobalConfig, PrometheusConfig};
pub use rules::RuleSource;
pub use scrape::{ScrapeConfigSet, ScrapeSource};
pub use status::{ObjectKey, StatusAccumulator};

use crate::constants::{OPERATOR_CONFIG_NAME, RULE_FILES_GLOB};
use crate::crd::{
    ClusterPodMonitoring, ClusterRules, MonitoringKind, OperatorConfigSpec, PodMonitoring, Rules,
};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Everything one compilation pass reads
#[derive(Debug, Clone, Copy)]
pub struct CompileInput<'a> {
    pub operator_config: &'a OperatorConfigSpec,
    pub pod_monitorings: &'a [PodMonitoring],
    pub cluster_pod_monitorings: &'a [ClusterPodMonitoring],
    pub rules: &'a [Rules],
    pub cluster_rules: &'a [ClusterRules],
    /// Whether the managed Alertmanager StatefulSet exists
    pub managed_alertmanager: bool,
}

/// Result of one compilation pass
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub collector_labels: ExportLabels,
    pub evaluator_labels: ExportLabels,
    pub collector: PrometheusConfig,
    pub evaluator_external_labels: BTreeMap<String, String>,
    pub managed_alertmanager: Option<AlertmanagerConfig>,
    /// Declared Alertmanagers that compiled, with their unresolved references
    pub alertmanagers: Vec<CompiledAlertmanager>,
    /// Rule file name to content
    pub rule_files: BTreeMap<String, String>,
    pub statuses: StatusAccumulator,
}

impl CompiledConfig {
    /// Evaluator config for the Alertmanagers whose references resolved.
    ///
    /// The managed Alertmanager, if present, always comes first.
    #[must_use]
    pub fn rule_evaluator_config<'a>(
        &'a self,
        declared: impl IntoIterator<Item = &'a AlertmanagerConfig>,
    ) -> PrometheusConfig {
        let alertmanagers: Vec<AlertmanagerConfig> = self
            .managed_alertmanager
            .iter()
            .chain(declared)
            .cloned()
            .collect();
        PrometheusConfig {
            global: GlobalConfig {
                external_labels: self.evaluator_external_labels.clone(),
            },
            alerting: (!alertmanagers.is_empty()).then_some(AlertingConfig { alertmanagers }),
            rule_files: vec![RULE_FILES_GLOB.to_string()],
            scrape_configs: Vec::new(),
        }
    }
}

/// Compiler bound to the operator-wide defaults
#[derive(Debug, Clone)]
pub struct ConfigCompiler {
    defaults: ExportLabels,
    operator_namespace: String,
    public_namespace: String,
}

impl ConfigCompiler {
    #[must_use]
    pub fn new(defaults: ExportLabels, operator_namespace: &str, public_namespace: &str) -> Self {
        Self {
            defaults,
            operator_namespace: operator_namespace.to_string(),
            public_namespace: public_namespace.to_string(),
        }
    }

    /// Key of the singleton in status reports
    #[must_use]
    pub fn operator_config_key(&self) -> ObjectKey {
        ObjectKey::new(
            MonitoringKind::OperatorConfig,
            Some(&self.public_namespace),
            OPERATOR_CONFIG_NAME,
        )
    }

    /// Compile all inputs. Never fails as a whole: problems are recorded per
    /// resource in [`CompiledConfig::statuses`] and the offending part is left out.
    #[must_use]
    pub fn compile(&self, input: &CompileInput<'_>) -> CompiledConfig {
        let mut statuses = StatusAccumulator::new();
        let config_key = self.operator_config_key();
        let spec = input.operator_config;

        let collector_labels = resolve_labels(&self.defaults, &spec.collection.external_labels);
        let evaluator_labels = resolve_labels(&self.defaults, &spec.rules.external_labels);

        let scrape_sources: Vec<ScrapeSource<'_>> = input
            .pod_monitorings
            .iter()
            .map(ScrapeSource::from_pod_monitoring)
            .chain(
                input
                    .cluster_pod_monitorings
                    .iter()
                    .map(ScrapeSource::from_cluster_pod_monitoring),
            )
            .collect();
        let mut scrape = scrape::compile_scrape_configs(&scrape_sources, &mut statuses);

        statuses.record_success(config_key.clone());
        if let Some(kubelet) = &spec.collection.kubelet_scraping {
            match scrape::kubelet_jobs(&kubelet.interval) {
                Ok(jobs) => {
                    scrape.jobs.extend(jobs);
                    scrape.jobs.sort_by(|a, b| a.job_name.cmp(&b.job_name));
                }
                Err(e) => statuses.record_failure(config_key.clone(), e.to_string()),
            }
        }

        let collector_external = checked_external_labels(
            &collector_labels,
            &spec.collection.external_labels,
            &config_key,
            &mut statuses,
        );
        let evaluator_external_labels = checked_external_labels(
            &evaluator_labels,
            &spec.rules.external_labels,
            &config_key,
            &mut statuses,
        );

        let mut alertmanagers = Vec::new();
        for endpoint in &spec.rules.alerting.alertmanagers {
            match alerting::compile_alertmanager(endpoint, &self.public_namespace) {
                Ok(compiled) => alertmanagers.push(compiled),
                Err(e) => {
                    warn!(
                        "Skipping alertmanager {}/{}: {}",
                        endpoint.namespace, endpoint.name, e
                    );
                    statuses.record_failure(config_key.clone(), e.to_string());
                }
            }
        }
        let managed_alertmanager = input
            .managed_alertmanager
            .then(|| alerting::managed_alertmanager(&self.operator_namespace));

        let rule_sources: Vec<RuleSource<'_>> = input
            .rules
            .iter()
            .map(RuleSource::from_rules)
            .chain(input.cluster_rules.iter().map(RuleSource::from_cluster_rules))
            .collect();
        let rule_files = rules::compile_rule_files(&rule_sources, &evaluator_labels, &mut statuses);

        debug!(
            "Compiled {} scrape jobs, {} rule files, {} alertmanagers ({} resources failed)",
            scrape.jobs.len(),
            rule_files.len(),
            alertmanagers.len(),
            statuses.failure_count()
        );

        CompiledConfig {
            collector: PrometheusConfig {
                global: GlobalConfig {
                    external_labels: collector_external,
                },
                alerting: None,
                rule_files: Vec::new(),
                scrape_configs: scrape.jobs,
            },
            collector_labels,
            evaluator_labels,
            evaluator_external_labels,
            managed_alertmanager,
            alertmanagers,
            rule_files,
            statuses,
        }
    }
}

/// Hierarchy labels merged with user labels, dropping names that are not
/// valid label names
fn checked_external_labels(
    resolved: &ExportLabels,
    external: &BTreeMap<String, String>,
    config_key: &ObjectKey,
    statuses: &mut StatusAccumulator,
) -> BTreeMap<String, String> {
    let mut valid = BTreeMap::new();
    for (name, value) in external {
        match labels::validate_label_name(name) {
            Ok(()) => {
                valid.insert(name.clone(), value.clone());
            }
            Err(e) => statuses.record_failure(config_key.clone(), e.to_string()),
        }
    }
    labels::external_labels(resolved, &valid)
}

/// Admission-time check of the singleton, using the same rules as [`ConfigCompiler::compile`]
///
/// # Errors
///
/// Returns the first problem found.
pub fn validate_operator_config(spec: &OperatorConfigSpec, public_namespace: &str) -> Result<(), CompileError> {
    for name in spec
        .collection
        .external_labels
        .keys()
        .chain(spec.rules.external_labels.keys())
    {
        labels::validate_label_name(name)?;
    }
    if let Some(kubelet) = &spec.collection.kubelet_scraping {
        scrape::kubelet_jobs(&kubelet.interval)?;
    }
    for endpoint in &spec.rules.alerting.alertmanagers {
        alerting::compile_alertmanager(endpoint, public_namespace)?;
    }
    for filter in &spec.collection.filter.match_one_of {
        if filter.trim().is_empty() {
            return Err(CompileError::InvalidSelector(
                "empty series selector in filter.matchOneOf".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{
        AlertmanagerEndpoints, KubeletScraping, LabelSelector, PodMonitoringSpec, ScrapeEndpoint,
        ScrapePort, TargetLabels,
    };

    fn compiler() -> ConfigCompiler {
        ConfigCompiler::new(
            ExportLabels {
                project_id: "proj".to_string(),
                location: "us-central1".to_string(),
                cluster: "c1".to_string(),
            },
            "octopilot-monitoring",
            "octopilot-monitoring-public",
        )
    }

    fn pod_monitoring(ns: &str, name: &str, port: Option<ScrapePort>) -> PodMonitoring {
        let mut pm = PodMonitoring::new(
            name,
            PodMonitoringSpec {
                selector: LabelSelector::default(),
                endpoints: vec![ScrapeEndpoint {
                    port,
                    ..Default::default()
                }],
                target_labels: TargetLabels::default(),
                limits: None,
            },
        );
        pm.metadata.namespace = Some(ns.to_string());
        pm
    }

    #[test]
    fn test_external_labels_precedence() {
        let mut spec = OperatorConfigSpec::default();
        spec.collection
            .external_labels
            .insert("location".to_string(), "europe-west4".to_string());
        spec.collection
            .external_labels
            .insert("env".to_string(), "prod".to_string());
        let input = CompileInput {
            operator_config: &spec,
            pod_monitorings: &[],
            cluster_pod_monitorings: &[],
            rules: &[],
            cluster_rules: &[],
            managed_alertmanager: false,
        };
        let compiled = compiler().compile(&input);
        let labels = &compiled.collector.global.external_labels;
        assert_eq!(labels["project_id"], "proj");
        assert_eq!(labels["location"], "europe-west4");
        assert_eq!(labels["cluster"], "c1");
        assert_eq!(labels["env"], "prod");
        // evaluator path only sees its own overrides
        assert_eq!(compiled.evaluator_labels.location, "us-central1");
    }

    #[test]
    fn test_kubelet_and_managed_alertmanager() {
        let mut spec = OperatorConfigSpec::default();
        spec.collection.kubelet_scraping = Some(KubeletScraping {
            interval: "30s".to_string(),
        });
        spec.rules.alerting.alertmanagers.push(AlertmanagerEndpoints {
            namespace: "monitoring".to_string(),
            name: "am".to_string(),
            port: ScrapePort::Name("web".to_string()),
            scheme: None,
            path_prefix: None,
            api_version: None,
            timeout: None,
            authorization: None,
            tls: None,
        });
        let pms = vec![pod_monitoring("ns", "app", Some(ScrapePort::Number(8080)))];
        let input = CompileInput {
            operator_config: &spec,
            pod_monitorings: &pms,
            cluster_pod_monitorings: &[],
            rules: &[],
            cluster_rules: &[],
            managed_alertmanager: true,
        };
        let compiled = compiler().compile(&input);
        let names: Vec<_> = compiled
            .collector
            .scrape_configs
            .iter()
            .map(|j| j.job_name.as_str())
            .collect();
        assert_eq!(
            names,
            vec!["PodMonitoring/ns/app/8080", "kubelet/cadvisor", "kubelet/metrics"]
        );

        let evaluator =
            compiled.rule_evaluator_config(compiled.alertmanagers.iter().map(|a| &a.config));
        let alerting = evaluator.alerting.unwrap();
        assert_eq!(alerting.alertmanagers.len(), 2);
        assert_eq!(
            alerting.alertmanagers[0].static_configs[0].targets,
            vec!["alertmanager.octopilot-monitoring:9093"]
        );
        assert_eq!(evaluator.rule_files, vec!["/etc/rules/*.yaml"]);
    }

    #[test]
    fn test_bad_external_label_marks_singleton() {
        let mut spec = OperatorConfigSpec::default();
        spec.rules
            .external_labels
            .insert("bad-name".to_string(), "x".to_string());
        let input = CompileInput {
            operator_config: &spec,
            pod_monitorings: &[],
            cluster_pod_monitorings: &[],
            rules: &[],
            cluster_rules: &[],
            managed_alertmanager: false,
        };
        let c = compiler();
        let compiled = c.compile(&input);
        assert!(matches!(
            compiled.statuses.outcome(&c.operator_config_key()),
            Some(Err(_))
        ));
        assert!(!compiled.evaluator_external_labels.contains_key("bad-name"));
        assert!(validate_operator_config(&spec, "public").is_err());
    }
}
