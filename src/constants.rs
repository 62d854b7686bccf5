//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// API group of the monitoring custom resources
pub const API_GROUP: &str = "monitoring.octopilot.io";

/// API version of the monitoring custom resources
pub const API_VERSION: &str = "v1";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTPS port for the admission webhook server
pub const DEFAULT_WEBHOOK_PORT: u16 = 10250;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default exponential backoff starting value (milliseconds)
pub const DEFAULT_BACKOFF_START_MS: u64 = 1000;

/// Default exponential backoff maximum value (milliseconds)
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Upper bound for a single reconcile pass and for individual API calls (seconds)
pub const DEFAULT_RECONCILE_TIMEOUT_SECS: u64 = 60;

/// How often the CA bundle is written into webhook registrations (seconds)
pub const DEFAULT_CA_BUNDLE_PUBLISH_INTERVAL_SECS: u64 = 60;

/// Fixed part of the delay before reopening a closed secret watch (seconds)
pub const DEFAULT_SECRET_WATCH_RETRY_BASE_SECS: u64 = 1;

/// Upper bound of the random part of the secret watch reopen delay (seconds)
///
/// Close to the most common scrape interval so that reconnects after a shared
/// outage spread out instead of hitting the API server at once.
pub const DEFAULT_SECRET_WATCH_RETRY_JITTER_SECS: u64 = 30;

/// How long to wait for a submitted certificate signing request to be issued (seconds)
pub const DEFAULT_CSR_ISSUE_TIMEOUT_SECS: u64 = 60;

/// Poll interval while waiting for a signing request to be issued (milliseconds)
pub const DEFAULT_CSR_POLL_INTERVAL_MS: u64 = 500;

/// Validity of self-signed webhook certificates (years)
pub const SELF_SIGNED_VALIDITY_YEARS: i32 = 10;

/// Namespace the operator and its workloads run in
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "octopilot-monitoring";

/// Namespace holding the user-facing singleton and referenced secrets
pub const DEFAULT_PUBLIC_NAMESPACE: &str = "octopilot-monitoring-public";

/// Name of the operator deployment and service
pub const DEFAULT_OPERATOR_NAME: &str = "monitoring-operator";

/// Name of the `OperatorConfig` singleton
pub const OPERATOR_CONFIG_NAME: &str = "config";

/// Name of the collector DaemonSet and its config map
pub const COLLECTOR_NAME: &str = "collector";

/// Name of the rule-evaluator Deployment and its config map
pub const RULE_EVALUATOR_NAME: &str = "rule-evaluator";

/// Name of the managed Alertmanager StatefulSet and service
pub const ALERTMANAGER_NAME: &str = "alertmanager";

/// Port the managed Alertmanager listens on
pub const ALERTMANAGER_PORT: u16 = 9093;

/// Secret holding the Alertmanager configuration used when none is configured
pub const DEFAULT_ALERTMANAGER_CONFIG_SECRET: &str = "alertmanager";

/// Key inside the Alertmanager configuration secret
pub const DEFAULT_ALERTMANAGER_CONFIG_KEY: &str = "alertmanager.yaml";

/// Config map holding one rule file per `Rules`/`ClusterRules` object
pub const GENERATED_RULES_NAME: &str = "rules-generated";

/// Secret mirrored for the rule-evaluator
pub const RULES_SECRET_NAME: &str = "rules";

/// Secret mirrored for the collector
pub const COLLECTION_SECRET_NAME: &str = "collection";

/// Key of the generated configuration file inside the config maps
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Directory mirrored secrets are mounted into
pub const SECRETS_MOUNT_DIR: &str = "/etc/secrets";

/// Glob the rule-evaluator loads rule files from
pub const RULE_FILES_GLOB: &str = "/etc/rules/*.yaml";

/// Container running the collector inside the collector DaemonSet
pub const COLLECTOR_CONTAINER: &str = "prometheus";

/// Container running the evaluator inside the rule-evaluator Deployment
pub const EVALUATOR_CONTAINER: &str = "evaluator";

/// Container running Alertmanager inside the managed StatefulSet
pub const ALERTMANAGER_CONTAINER: &str = "alertmanager";

/// Configuration written for the managed Alertmanager when the referenced secret is missing
pub const DEFAULT_ALERTMANAGER_CONFIG: &str = "receivers:\n  - name: \"noop\"\nroute:\n  receiver: \"noop\"\n";

/// Secret type that is never relevant to generated configuration
pub const SERVICE_ACCOUNT_TOKEN_TYPE: &str = "kubernetes.io/service-account-token";

/// Signer used for cluster-issued webhook certificates
pub const CSR_SIGNER_NAME: &str = "kubernetes.io/kubelet-serving";

/// Config map every namespace carries with the cluster root CA
pub const KUBE_ROOT_CA_CONFIG_MAP: &str = "kube-root-ca.crt";

/// Field manager used for every write the operator issues
pub const FIELD_MANAGER: &str = "monitoring-operator";

/// Condition type carried by every monitoring resource
pub const CONDITION_CONFIGURATION_CREATE_SUCCESS: &str = "ConfigurationCreateSuccess";
