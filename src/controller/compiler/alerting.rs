//! # Alertmanager Targets
//!
//! Compiles `OperatorConfig.rules.alerting.alertmanagers` into the evaluator's
//! `alerting.alertmanagers` block. Credentials and TLS material are never
//! inlined: every reference becomes a file path below the secrets mount and
//! is returned to the caller for mirroring.

use super::duration::parse_duration;
use super::prometheus::{
    AlertmanagerConfig, AuthorizationConfig, DiscoveryRole, KubernetesSdConfig, RelabelConfig,
    StaticConfig, TlsFileConfig,
};
use super::relabel::{META_ENDPOINT_PORT_NAME, META_SERVICE_NAME};
use super::CompileError;
use crate::constants::{ALERTMANAGER_NAME, ALERTMANAGER_PORT};
use crate::controller::secrets::SecretSource;
use crate::crd::{AlertmanagerEndpoints, ScrapePort, SecretOrConfigMap};

/// One compiled target and the references its files point at
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledAlertmanager {
    pub config: AlertmanagerConfig,
    pub references: Vec<SecretSource>,
}

/// Compile one declared Alertmanager.
///
/// `secret_namespace` is where credential references are looked up.
///
/// # Errors
///
/// Fails on an invalid timeout or a TLS reference that names neither or both
/// of secret and config map.
pub fn compile_alertmanager(
    endpoint: &AlertmanagerEndpoints,
    secret_namespace: &str,
) -> Result<CompiledAlertmanager, CompileError> {
    let timeout = endpoint.timeout.clone().unwrap_or_else(|| "10s".to_string());
    parse_duration(&timeout).map_err(|reason| CompileError::InvalidDuration {
        field: "timeout".to_string(),
        value: timeout.clone(),
        reason,
    })?;
    let scheme = endpoint.scheme.clone().unwrap_or_else(|| "http".to_string());
    if scheme != "http" && scheme != "https" {
        return Err(CompileError::InvalidScheme(scheme));
    }

    let mut references = Vec::new();

    let authorization = endpoint.authorization.as_ref().map(|auth| {
        let credentials_file = auth.credentials.as_ref().map(|selector| {
            let source = SecretSource::secret(secret_namespace, selector);
            let path = source.mount_path();
            references.push(source);
            path
        });
        AuthorizationConfig {
            auth_type: auth.auth_type.clone(),
            credentials_file,
        }
    });

    let tls_config = match &endpoint.tls {
        None => None,
        Some(tls) => {
            let mut file = |selector: &SecretOrConfigMap| -> Result<String, CompileError> {
                let source = SecretSource::from_secret_or_config_map(secret_namespace, selector)
                    .map_err(|e| CompileError::InvalidReference(e.to_string()))?;
                let path = source.mount_path();
                references.push(source);
                Ok(path)
            };
            let ca_file = tls.ca.as_ref().map(&mut file).transpose()?;
            let cert_file = tls.cert.as_ref().map(&mut file).transpose()?;
            let key_file = tls.key_secret.as_ref().map(|selector| {
                let source = SecretSource::secret(secret_namespace, selector);
                let path = source.mount_path();
                references.push(source);
                path
            });
            Some(TlsFileConfig {
                ca_file,
                cert_file,
                key_file,
                server_name: tls.server_name.clone(),
                insecure_skip_verify: tls.insecure_skip_verify,
                min_version: tls.min_version.clone(),
            })
        }
    };

    let port_filter = match &endpoint.port {
        ScrapePort::Name(name) => RelabelConfig::keep(META_ENDPOINT_PORT_NAME, regex::escape(name)),
        ScrapePort::Number(number) => RelabelConfig::keep("__address__", format!(".+:{number}")),
    };

    let config = AlertmanagerConfig {
        scheme,
        path_prefix: endpoint.path_prefix.clone().unwrap_or_else(|| "/".to_string()),
        api_version: endpoint.api_version.clone().unwrap_or_else(|| "v2".to_string()),
        timeout,
        authorization,
        tls_config,
        kubernetes_sd_configs: vec![
            KubernetesSdConfig::new(DiscoveryRole::Endpoints).in_namespace(&endpoint.namespace)
        ],
        static_configs: Vec::new(),
        relabel_configs: vec![
            RelabelConfig::keep(META_SERVICE_NAME, regex::escape(&endpoint.name)),
            port_filter,
        ],
    };

    Ok(CompiledAlertmanager { config, references })
}

/// Static target for the Alertmanager the operator deploys itself
#[must_use]
pub fn managed_alertmanager(operator_namespace: &str) -> AlertmanagerConfig {
    AlertmanagerConfig {
        scheme: "http".to_string(),
        path_prefix: "/".to_string(),
        api_version: "v2".to_string(),
        timeout: "10s".to_string(),
        static_configs: vec![StaticConfig {
            targets: vec![format!(
                "{ALERTMANAGER_NAME}.{operator_namespace}:{ALERTMANAGER_PORT}"
            )],
        }],
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Authorization, SecretKeySelector, TlsConfig};

    fn endpoint(port: ScrapePort) -> AlertmanagerEndpoints {
        AlertmanagerEndpoints {
            namespace: "monitoring".to_string(),
            name: "am".to_string(),
            port,
            scheme: None,
            path_prefix: None,
            api_version: None,
            timeout: None,
            authorization: None,
            tls: None,
        }
    }

    #[test]
    fn test_discovery_and_filters() {
        let compiled =
            compile_alertmanager(&endpoint(ScrapePort::Name("web".to_string())), "public").unwrap();
        let config = compiled.config;
        assert_eq!(config.api_version, "v2");
        assert_eq!(config.timeout, "10s");
        assert_eq!(
            config.kubernetes_sd_configs[0].namespaces.as_ref().unwrap().names,
            vec!["monitoring"]
        );
        assert_eq!(config.relabel_configs[0].regex.as_deref(), Some("am"));
        assert_eq!(
            config.relabel_configs[1].source_labels,
            vec![META_ENDPOINT_PORT_NAME]
        );
        assert!(compiled.references.is_empty());
    }

    #[test]
    fn test_numeric_port_filters_address() {
        let compiled = compile_alertmanager(&endpoint(ScrapePort::Number(9093)), "public").unwrap();
        assert_eq!(
            compiled.config.relabel_configs[1].regex.as_deref(),
            Some(".+:9093")
        );
    }

    #[test]
    fn test_credentials_become_paths() {
        let mut ep = endpoint(ScrapePort::Number(9093));
        ep.authorization = Some(Authorization {
            auth_type: Some("Bearer".to_string()),
            credentials: Some(SecretKeySelector {
                name: "am-token".to_string(),
                key: "token".to_string(),
            }),
        });
        ep.tls = Some(TlsConfig {
            ca: Some(SecretOrConfigMap {
                secret: None,
                config_map: Some(crate::crd::ConfigMapKeySelector {
                    name: "am-ca".to_string(),
                    key: "ca.crt".to_string(),
                }),
            }),
            ..Default::default()
        });

        let compiled = compile_alertmanager(&ep, "public").unwrap();
        assert_eq!(compiled.references.len(), 2);
        let auth = compiled.config.authorization.unwrap();
        assert_eq!(
            auth.credentials_file.as_deref(),
            Some("/etc/secrets/secret_public_am-token_token")
        );
        let tls = compiled.config.tls_config.unwrap();
        assert_eq!(
            tls.ca_file.as_deref(),
            Some("/etc/secrets/configmap_public_am-ca_ca.crt")
        );
    }

    #[test]
    fn test_ambiguous_tls_reference_is_rejected() {
        let mut ep = endpoint(ScrapePort::Number(9093));
        let selector = SecretKeySelector {
            name: "x".to_string(),
            key: "y".to_string(),
        };
        ep.tls = Some(TlsConfig {
            ca: Some(SecretOrConfigMap {
                secret: Some(selector.clone()),
                config_map: Some(crate::crd::ConfigMapKeySelector {
                    name: selector.name,
                    key: selector.key,
                }),
            }),
            ..Default::default()
        });
        assert!(matches!(
            compile_alertmanager(&ep, "public"),
            Err(CompileError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_managed_alertmanager_is_static() {
        let config = managed_alertmanager("octopilot-monitoring");
        assert_eq!(
            config.static_configs[0].targets,
            vec!["alertmanager.octopilot-monitoring:9093"]
        );
        assert!(config.kubernetes_sd_configs.is_empty());
    }
}
