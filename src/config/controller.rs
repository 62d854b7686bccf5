//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use super::{env_var_opt, env_var_or_default, env_var_or_default_str};
use crate::controller::compiler::ExportLabels;
use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace the operator, collector and rule-evaluator run in
    pub operator_namespace: String,
    /// Namespace holding the `OperatorConfig` singleton and user secrets
    pub public_namespace: String,
    /// Name of the operator itself, used to derive webhook registration names
    pub operator_name: String,
    /// Project label attached to all exported data unless overridden
    pub project_id: String,
    /// Location label attached to all exported data unless overridden
    pub location: String,
    /// Cluster label attached to all exported data unless overridden
    pub cluster: String,
    /// Exponential backoff starting value (milliseconds)
    /// Initial delay before retrying after an error
    pub backoff_start_ms: u64,
    /// Exponential backoff maximum value (milliseconds)
    /// Maximum delay between retries
    pub backoff_max_ms: u64,
    /// Upper bound for a single reconcile pass (seconds)
    pub reconcile_timeout_secs: u64,
    /// CA bundle republish interval (seconds)
    pub ca_bundle_publish_interval_secs: u64,
    /// Fixed part of the secret watch reopen delay (seconds)
    pub secret_watch_retry_base_secs: u64,
    /// Random part of the secret watch reopen delay (seconds)
    pub secret_watch_retry_jitter_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            public_namespace: DEFAULT_PUBLIC_NAMESPACE.to_string(),
            operator_name: DEFAULT_OPERATOR_NAME.to_string(),
            project_id: String::new(),
            location: String::new(),
            cluster: String::new(),
            backoff_start_ms: DEFAULT_BACKOFF_START_MS,
            backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            reconcile_timeout_secs: DEFAULT_RECONCILE_TIMEOUT_SECS,
            ca_bundle_publish_interval_secs: DEFAULT_CA_BUNDLE_PUBLISH_INTERVAL_SECS,
            secret_watch_retry_base_secs: DEFAULT_SECRET_WATCH_RETRY_BASE_SECS,
            secret_watch_retry_jitter_secs: DEFAULT_SECRET_WATCH_RETRY_JITTER_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    #[must_use]
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            operator_namespace: env_var_opt("OPERATOR_NAMESPACE")
                .or_else(|| env_var_opt("POD_NAMESPACE"))
                .unwrap_or_else(|| DEFAULT_OPERATOR_NAMESPACE.to_string()),
            public_namespace: env_var_or_default_str("PUBLIC_NAMESPACE", DEFAULT_PUBLIC_NAMESPACE),
            operator_name: env_var_or_default_str("OPERATOR_NAME", DEFAULT_OPERATOR_NAME),
            project_id: env_var_or_default_str("PROJECT_ID", ""),
            location: env_var_or_default_str("LOCATION", ""),
            cluster: env_var_or_default_str("CLUSTER_NAME", ""),
            backoff_start_ms: env_var_or_default("BACKOFF_START_MS", DEFAULT_BACKOFF_START_MS),
            backoff_max_ms: env_var_or_default("BACKOFF_MAX_MS", DEFAULT_BACKOFF_MAX_MS),
            reconcile_timeout_secs: env_var_or_default(
                "RECONCILE_TIMEOUT_SECS",
                DEFAULT_RECONCILE_TIMEOUT_SECS,
            ),
            ca_bundle_publish_interval_secs: env_var_or_default(
                "CA_BUNDLE_PUBLISH_INTERVAL_SECS",
                DEFAULT_CA_BUNDLE_PUBLISH_INTERVAL_SECS,
            ),
            secret_watch_retry_base_secs: env_var_or_default(
                "SECRET_WATCH_RETRY_BASE_SECS",
                DEFAULT_SECRET_WATCH_RETRY_BASE_SECS,
            ),
            secret_watch_retry_jitter_secs: env_var_or_default(
                "SECRET_WATCH_RETRY_JITTER_SECS",
                DEFAULT_SECRET_WATCH_RETRY_JITTER_SECS,
            ),
        }
    }

    /// Controller-wide export labels, before `OperatorConfig` overrides
    #[must_use]
    pub fn default_labels(&self) -> ExportLabels {
        ExportLabels {
            project_id: self.project_id.clone(),
            location: self.location.clone(),
            cluster: self.cluster.clone(),
        }
    }

    /// Get backoff start duration
    #[must_use]
    pub fn backoff_start_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_start_ms)
    }

    /// Get backoff max duration
    #[must_use]
    pub fn backoff_max_duration(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    /// Get reconcile timeout duration
    #[must_use]
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    /// Get CA bundle publish interval
    #[must_use]
    pub fn ca_bundle_publish_interval(&self) -> Duration {
        Duration::from_secs(self.ca_bundle_publish_interval_secs)
    }

    /// Webhook registration name shared by the validating and mutating configurations
    #[must_use]
    pub fn webhook_config_name(&self) -> String {
        format!(
            "{}.{}.{}",
            self.operator_name,
            self.operator_namespace,
            crate::constants::API_GROUP
        )
    }

    /// In-cluster DNS name the webhook service answers on
    #[must_use]
    pub fn webhook_fqdn(&self) -> String {
        format!("{}.{}.svc", self.operator_name, self.operator_namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_names_derive_from_identity() {
        let config = ControllerConfig::default();
        assert_eq!(
            config.webhook_config_name(),
            "monitoring-operator.octopilot-monitoring.monitoring.octopilot.io"
        );
        assert_eq!(
            config.webhook_fqdn(),
            "monitoring-operator.octopilot-monitoring.svc"
        );
    }

    #[test]
    fn test_default_durations() {
        let config = ControllerConfig::default();
        assert_eq!(config.backoff_start_duration(), Duration::from_secs(1));
        assert_eq!(config.backoff_max_duration(), Duration::from_secs(30));
        assert_eq!(config.reconcile_timeout(), Duration::from_secs(60));
        assert_eq!(config.ca_bundle_publish_interval(), Duration::from_secs(60));
    }
}
